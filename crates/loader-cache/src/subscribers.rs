use std::fmt;

/// A callback waiting on the result of an outstanding fetch.
pub type Subscriber<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// The callbacks registered for one outstanding fetch of one key.
///
/// Registration needs exclusive access, so concurrent subscribers are serialized by whoever owns
/// the list (the [`Coalescer`](crate::Coalescer) keeps it behind its registry lock) and no
/// registration can get lost.
///
/// [`publish`](Self::publish) consumes the list, which makes broadcasting a second result
/// impossible.
pub struct SubscriberList<T> {
    subscribers: Vec<Subscriber<T>>,
}

impl<T> SubscriberList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Appends `subscriber` to the list.
    pub fn subscribe<F>(&mut self, subscriber: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.subscribers.push(Box::new(subscriber));
    }

    /// The number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no subscriber has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T: Clone> SubscriberList<T> {
    /// Invokes every subscriber with `result`, in the order they were registered.
    ///
    /// Every subscriber but the last one receives a clone, the last one gets `result` itself.
    pub fn publish(self, result: T) {
        let mut subscribers = self.subscribers.into_iter();
        let Some(last) = subscribers.next_back() else {
            return;
        };

        for subscriber in subscribers {
            subscriber(result.clone());
        }
        last(result);
    }
}

impl<T> Default for SubscriberList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SubscriberList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberList")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
