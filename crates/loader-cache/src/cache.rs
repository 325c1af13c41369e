use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    Abandoned, CacheConfig, Coalescer, Completion, Fetcher, InFlightInvalidation, Key, lock,
};

/// Where a [`Cache`] answer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// The value was already stored, no fetch was started.
    Local,
    /// The answer comes from a fetch that was started for, or joined by, this request.
    ///
    /// A request that misses the stored values just before a concurrent fetch stores its value
    /// is answered from storage, but still as `Remote`. No external fetch runs in that case,
    /// though it is counted in `caches.computation`.
    Remote,
}

impl Source {
    /// A lowercase name suitable for logs and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Store<K, V> {
    values: HashMap<K, V>,
    /// Keys with an outstanding fetch, flagged once the key is invalidated mid-flight.
    pending: HashMap<K, bool>,
}

impl<K: Key, V> Store<K, V> {
    fn invalidate(&mut self, key: &K) {
        self.values.remove(key);
        if let Some(invalidated) = self.pending.get_mut(key) {
            *invalidated = true;
        }
    }
}

struct Shared<K, V> {
    name: Arc<str>,
    in_flight_invalidation: InFlightInvalidation,
    store: Mutex<Store<K, V>>,
}

impl<K: Key, V: Clone> Shared<K, V> {
    /// Returns the stored value for `key`.
    fn lookup(&self, key: &K) -> Option<V> {
        lock(&self.store).values.get(key).cloned()
    }

    /// Returns the stored value for `key`, or marks a fetch for `key` as started.
    fn lookup_or_start(&self, key: &K) -> Option<V> {
        let mut store = lock(&self.store);
        match store.values.get(key) {
            Some(value) => Some(value.clone()),
            None => {
                store.pending.insert(key.clone(), false);
                None
            }
        }
    }

    /// Stores the outcome of a finished fetch, if it should be stored.
    fn settle<E>(&self, key: &K, result: Option<&Result<V, E>>) {
        let discarded = {
            let mut store = lock(&self.store);
            let invalidated = store.pending.remove(key).unwrap_or(false);
            match result {
                Some(Ok(_))
                    if invalidated
                        && self.in_flight_invalidation == InFlightInvalidation::Discard =>
                {
                    true
                }
                Some(Ok(value)) => {
                    store.values.insert(key.clone(), value.clone());
                    false
                }
                _ => false,
            }
        };

        if discarded {
            tracing::debug!(
                cache = &*self.name,
                ?key,
                "Discarding value of a key invalidated during its fetch"
            );
            metric!(counter("caches.commit.discarded") += 1, "cache" => &*self.name);
        }
    }
}

/// The [`Fetcher`] a [`Cache`] hands to its [`Coalescer`].
///
/// It records which fetches are outstanding, and stores successful results before they are
/// published to any callback.
struct Committing<K, V, F> {
    shared: Arc<Shared<K, V>>,
    fetcher: F,
}

impl<K, V, E, F> Fetcher<K, V, E> for Committing<K, V, F>
where
    K: Key,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fetcher<K, V, E>,
{
    fn fetch(&self, key: K, done: Completion<K, V, E>) {
        // A previous fetch might have stored the value after our caller's lookup missed.
        if let Some(value) = self.shared.lookup_or_start(&key) {
            done.complete(Ok(value));
            return;
        }

        let shared = Arc::clone(&self.shared);
        let done = done.on_resolve(move |key, result| shared.settle(key, result));
        self.fetcher.fetch(key, done);
    }
}

/// A keyed cache of successful fetch results, with request coalescing for missing keys.
///
/// [`fetch`](Self::fetch) answers from the stored values if it can, and otherwise starts, or joins,
/// a fetch through the configured [`Fetcher`]. Successful results are stored before any callback
/// sees them, failures are passed to all waiting callbacks and forgotten.
///
/// Stored values never expire on their own; use [`invalidate`](Self::invalidate),
/// [`invalidate_many`](Self::invalidate_many) or [`invalidate_all`](Self::invalidate_all).
///
/// Cloning a `Cache` is cheap, all clones share the same storage and in-flight fetches.
pub struct Cache<K, V, E, F> {
    shared: Arc<Shared<K, V>>,
    coalescer: Coalescer<K, V, E, Committing<K, V, F>>,
}

impl<K: Key, V, E, F> Cache<K, V, E, F> {
    /// Creates a new cache around `fetcher`.
    pub fn new(config: CacheConfig, fetcher: F) -> Self {
        let name: Arc<str> = config.name.into();
        let shared = Arc::new(Shared {
            name: Arc::clone(&name),
            in_flight_invalidation: config.in_flight_invalidation,
            store: Mutex::new(Store {
                values: HashMap::new(),
                pending: HashMap::new(),
            }),
        });
        let committing = Committing {
            shared: Arc::clone(&shared),
            fetcher,
        };

        Self {
            shared,
            coalescer: Coalescer::new(name, committing),
        }
    }

    /// The name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The number of stored values.
    pub fn len(&self) -> usize {
        lock(&self.shared.store).values.len()
    }

    /// Whether no value is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of keys that currently have an outstanding fetch.
    pub fn in_flight(&self) -> usize {
        self.coalescer.in_flight()
    }

    /// Removes the stored value for `key`.
    ///
    /// An outstanding fetch for `key` is not cancelled. Whether its result gets stored depends
    /// on the configured [`InFlightInvalidation`].
    pub fn invalidate(&self, key: &K) {
        lock(&self.shared.store).invalidate(key);
    }

    /// Removes the stored values for all `keys`.
    pub fn invalidate_many<I>(&self, keys: I)
    where
        I: IntoIterator,
        I::Item: Borrow<K>,
    {
        let keys: Vec<_> = keys.into_iter().collect();
        let mut store = lock(&self.shared.store);
        for key in &keys {
            store.invalidate(<I::Item as Borrow<K>>::borrow(key));
        }
    }

    /// Removes all stored values.
    pub fn invalidate_all(&self) {
        let mut store = lock(&self.shared.store);
        store.values.clear();
        for invalidated in store.pending.values_mut() {
            *invalidated = true;
        }
    }
}

impl<K, V, E, F> Cache<K, V, E, F>
where
    K: Key,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fetcher<K, V, E>,
{
    /// Requests the value for `key`, invoking `callback` with the answer and where it came from.
    ///
    /// A stored value is passed to `callback` right away, on the current thread, without
    /// starting a fetch. Otherwise `callback` is invoked once the fetch for `key` resolves, on
    /// whichever thread the fetcher completes on.
    pub fn fetch<C>(&self, key: K, callback: C)
    where
        C: FnOnce(Source, Result<V, E>) + Send + 'static,
    {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        if let Some(value) = self.shared.lookup(&key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => name);
            tracing::trace!(cache = name, ?key, "Cache hit");
            callback(Source::Local, Ok(value));
            return;
        }

        tracing::trace!(cache = name, ?key, "Cache miss");
        self.coalescer
            .fetch(key, move |result| callback(Source::Remote, result));
    }

    /// Requests the value for `key` and waits for the answer.
    ///
    /// This is [`fetch`](Self::fetch) with the callback turned into a future. If the fetch is
    /// abandoned, the answer is an [`Abandoned`] error converted into `E`.
    pub async fn get(&self, key: K) -> (Source, Result<V, E>)
    where
        E: From<Abandoned>,
    {
        let (sender, receiver) = oneshot::channel();
        self.fetch(key, move |source, result| {
            // The receiver only goes away if the caller stopped waiting.
            sender.send((source, result)).ok();
        });

        match receiver.await {
            Ok(answer) => answer,
            Err(_) => (Source::Remote, Err(Abandoned.into())),
        }
    }
}

impl<K, V, E, F> Clone for Cache<K, V, E, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            coalescer: self.coalescer.clone(),
        }
    }
}

impl<K, V, E, F> fmt::Debug for Cache<K, V, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self
            .shared
            .store
            .try_lock()
            .map(|s| s.values.len())
            .unwrap_or_default();
        f.debug_struct("Cache")
            .field("name", &self.shared.name)
            .field("in_flight_invalidation", &self.shared.in_flight_invalidation)
            .field("in-memory items", &values)
            .field("coalescer", &self.coalescer)
            .finish()
    }
}
