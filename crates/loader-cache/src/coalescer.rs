use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::{Fetcher, Key, SubscriberList, lock};

type Registry<K, V, E> = HashMap<K, SubscriberList<Result<V, E>>>;

type ResolveHook<K, V, E> = Box<dyn FnOnce(&K, Option<&Result<V, E>>) + Send + 'static>;

/// The outstanding fetches of one [`Coalescer`], shared with their [`Completion`]s.
struct InFlight<K, V, E> {
    name: Arc<str>,
    /// A key is present if and only if exactly one fetch for it is outstanding.
    registry: Mutex<Registry<K, V, E>>,
}

/// Deduplicates concurrent fetches of the same key.
///
/// The first [`fetch`](Self::fetch) of a key registers an in-flight record and calls the
/// [`Fetcher`]. Every further `fetch` of that key, until the fetcher completes, only adds its
/// callback to the in-flight record. Once the fetcher completes, the record is removed and the
/// result is published to all callbacks in the order they were registered.
///
/// Results are never remembered: the first `fetch` after a completion starts a fresh fetch, which
/// also means that failures are retried by simply asking again. See [`Cache`](crate::Cache) for
/// a variant that keeps successful results.
pub struct Coalescer<K, V, E, F> {
    in_flight: Arc<InFlight<K, V, E>>,
    fetcher: Arc<F>,
}

impl<K: Key, V, E, F> Coalescer<K, V, E, F> {
    /// Creates a new coalescer around `fetcher`.
    ///
    /// The `name` is attached to logs and metrics.
    pub fn new(name: impl Into<Arc<str>>, fetcher: F) -> Self {
        let in_flight = InFlight {
            name: name.into(),
            registry: Mutex::new(HashMap::new()),
        };
        Self {
            in_flight: Arc::new(in_flight),
            fetcher: Arc::new(fetcher),
        }
    }

    /// The name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.in_flight.name
    }

    /// The number of keys that currently have an outstanding fetch.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight.registry).len()
    }
}

impl<K, V, E, F> Coalescer<K, V, E, F>
where
    K: Key,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fetcher<K, V, E>,
{
    /// Requests the value for `key`, invoking `callback` once it is available.
    ///
    /// This never blocks on the fetch itself. The `callback` is invoked from whichever thread the
    /// fetcher completes on, which may be the current thread if the fetcher completes
    /// synchronously.
    pub fn fetch<C>(&self, key: K, callback: C)
    where
        C: FnOnce(Result<V, E>) + Send + 'static,
    {
        let name = self.name();

        let in_flight = {
            let mut registry = lock(&self.in_flight.registry);
            if let Some(subscribers) = registry.get_mut(&key) {
                subscribers.subscribe(callback);
                let subscribers = subscribers.len();
                drop(registry);

                tracing::trace!(cache = name, ?key, subscribers, "Joining in-flight fetch");
                return;
            }

            let mut subscribers = SubscriberList::new();
            subscribers.subscribe(callback);
            registry.insert(key.clone(), subscribers);
            registry.len()
        };

        metric!(counter("caches.computation") += 1, "cache" => name);
        metric!(gauge("caches.in_flight") = in_flight as u64, "cache" => name);
        tracing::trace!(cache = name, ?key, "Starting fetch");

        // The record is registered before calling out, so a fetcher may complete synchronously.
        let done = Completion::new(Arc::clone(&self.in_flight), key.clone());
        self.fetcher.fetch(key, done);
    }
}

impl<K, V, E, F> Clone for Coalescer<K, V, E, F> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            fetcher: Arc::clone(&self.fetcher),
        }
    }
}

impl<K, V, E, F> fmt::Debug for Coalescer<K, V, E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self
            .in_flight
            .registry
            .try_lock()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("Coalescer")
            .field("name", &self.in_flight.name)
            .field("in-flight fetches", &in_flight)
            .finish()
    }
}

/// The handle a [`Fetcher`] uses to deliver the result of one fetch.
///
/// [`complete`](Self::complete) consumes the handle, so a result can be delivered at most once.
/// It can be moved to and completed from any thread.
///
/// Dropping the handle without completing it abandons the fetch: the in-flight record is
/// removed so that the next request starts over, and the waiting callbacks are dropped without
/// being invoked.
#[must_use = "dropping a `Completion` abandons the fetch"]
pub struct Completion<K: Key, V, E> {
    in_flight: Arc<InFlight<K, V, E>>,
    key: K,
    started: Instant,
    hooks: Vec<ResolveHook<K, V, E>>,
    resolved: bool,
}

impl<K: Key, V, E> Completion<K, V, E> {
    fn new(in_flight: Arc<InFlight<K, V, E>>, key: K) -> Self {
        Self {
            in_flight,
            key,
            started: Instant::now(),
            hooks: Vec::new(),
            resolved: false,
        }
    }

    /// The key this fetch was started for.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Registers a hook that runs once the fetch resolves, before any callback sees the result.
    ///
    /// The hook receives `None` if the fetch is abandoned. While hooks run, the in-flight record
    /// for the key is still registered, so concurrent requests keep joining this fetch.
    pub fn on_resolve<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&K, Option<&Result<V, E>>) + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Runs the hooks and takes the subscribers out of the registry.
    fn resolve(&mut self, result: Option<&Result<V, E>>) -> Option<SubscriberList<Result<V, E>>> {
        self.resolved = true;

        for hook in self.hooks.drain(..) {
            hook(&self.key, result);
        }

        let (subscribers, in_flight) = {
            let mut registry = lock(&self.in_flight.registry);
            let subscribers = registry.remove(&self.key);
            (subscribers, registry.len())
        };

        metric!(gauge("caches.in_flight") = in_flight as u64, "cache" => &*self.in_flight.name);

        if subscribers.is_none() {
            tracing::error!(
                cache = &*self.in_flight.name,
                key = ?self.key,
                "Resolved a fetch without in-flight record"
            );
        }
        subscribers
    }
}

impl<K: Key, V: Clone, E: Clone> Completion<K, V, E> {
    /// Delivers `result` to every callback waiting on this fetch.
    ///
    /// The in-flight record is removed before the first callback runs, so a callback that
    /// requests the same key again starts a new fetch instead of joining this one.
    pub fn complete(mut self, result: Result<V, E>) {
        let Some(subscribers) = self.resolve(Some(&result)) else {
            return;
        };

        let name = &*self.in_flight.name;
        metric!(timer("caches.computation.duration") = self.started.elapsed(), "cache" => name);
        metric!(histogram("caches.subscribers") = subscribers.len() as u64, "cache" => name);
        if result.is_err() {
            metric!(counter("caches.computation.error") += 1, "cache" => name);
        }
        tracing::trace!(
            cache = name,
            key = ?self.key,
            subscribers = subscribers.len(),
            ok = result.is_ok(),
            "Publishing fetch result"
        );

        subscribers.publish(result);
    }
}

impl<K: Key, V, E> Drop for Completion<K, V, E> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let subscribers = self.resolve(None);
        tracing::error!(
            cache = &*self.in_flight.name,
            key = ?self.key,
            subscribers = subscribers.as_ref().map_or(0, SubscriberList::len),
            "Fetch was dropped without a result"
        );
    }
}

impl<K: Key, V, E> fmt::Debug for Completion<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("cache", &self.in_flight.name)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Pending = Arc<Mutex<Vec<Completion<u32, String, String>>>>;

    fn ok(value: &str) -> Result<String, String> {
        Ok(value.to_owned())
    }

    fn err(error: &str) -> Result<String, String> {
        Err(error.to_owned())
    }

    /// A fetcher that parks its completions until the test resolves them.
    fn parking(pending: &Pending) -> impl Fetcher<u32, String, String> + use<> {
        let pending = Arc::clone(pending);
        move |_key: u32, done: Completion<u32, String, String>| {
            pending.lock().unwrap().push(done);
        }
    }

    fn recorder() -> (
        Arc<Mutex<Vec<(usize, Result<String, String>)>>>,
        impl Fn(usize) -> Box<dyn FnOnce(Result<String, String>) + Send>,
    ) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let received = Arc::clone(&received);
            move |id: usize| -> Box<dyn FnOnce(Result<String, String>) + Send> {
                let received = Arc::clone(&received);
                Box::new(move |result| received.lock().unwrap().push((id, result)))
            }
        };
        (received, make)
    }

    #[test]
    fn test_coalesces_and_fans_out_in_order() {
        loader_test::setup();
        let pending = Pending::default();
        let coalescer = Coalescer::new("test", parking(&pending));
        let (received, callback) = recorder();

        for id in 1..=3 {
            coalescer.fetch(7, callback(id));
        }
        assert_eq!(pending.lock().unwrap().len(), 1);
        assert_eq!(coalescer.in_flight(), 1);

        let done = pending.lock().unwrap().pop().unwrap();
        assert_eq!(*done.key(), 7);
        done.complete(Ok("v7".into()));

        assert_eq!(coalescer.in_flight(), 0);
        assert_eq!(
            *received.lock().unwrap(),
            [
                (1, ok("v7")),
                (2, ok("v7")),
                (3, ok("v7")),
            ]
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let pending = Pending::default();
        let coalescer = Coalescer::new("test", parking(&pending));
        let (received, callback) = recorder();

        coalescer.fetch(1, callback(1));
        coalescer.fetch(2, callback(2));
        assert_eq!(coalescer.in_flight(), 2);

        let second = pending.lock().unwrap().pop().unwrap();
        assert_eq!(*second.key(), 2);
        second.complete(Err("boom".into()));

        assert_eq!(*received.lock().unwrap(), [(2, err("boom"))]);
        assert_eq!(coalescer.in_flight(), 1);
    }

    #[test]
    fn test_failure_is_not_remembered() {
        let pending = Pending::default();
        let coalescer = Coalescer::new("test", parking(&pending));
        let (received, callback) = recorder();

        coalescer.fetch(7, callback(1));
        coalescer.fetch(7, callback(2));
        let done = pending.lock().unwrap().pop().unwrap();
        done.complete(Err("offline".into()));

        coalescer.fetch(7, callback(3));
        assert_eq!(pending.lock().unwrap().len(), 1);

        let done = pending.lock().unwrap().pop().unwrap();
        done.complete(Ok("v7".into()));

        assert_eq!(
            *received.lock().unwrap(),
            [
                (1, err("offline")),
                (2, err("offline")),
                (3, ok("v7")),
            ]
        );
    }

    #[test]
    fn test_synchronous_completion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = Arc::clone(&calls);
            move |key: u32, done: Completion<u32, String, String>| {
                calls.fetch_add(1, Ordering::Relaxed);
                done.complete(Ok(format!("v{key}")));
            }
        };
        let coalescer = Coalescer::new("test", fetcher);
        let (received, callback) = recorder();

        coalescer.fetch(1, callback(1));
        coalescer.fetch(1, callback(2));

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(coalescer.in_flight(), 0);
        assert_eq!(
            *received.lock().unwrap(),
            [(1, ok("v1")), (2, ok("v1"))]
        );
    }

    #[test]
    fn test_reentrant_fetch_starts_new_fetch() {
        let pending = Pending::default();
        let coalescer = Coalescer::new("test", parking(&pending));
        let (received, callback) = recorder();

        let inner = coalescer.clone();
        let nested = callback(2);
        coalescer.fetch(7, move |result| {
            // The first fetch has already been unregistered at this point.
            assert_eq!(inner.in_flight(), 0);
            inner.fetch(7, nested);
            drop(result);
        });

        let done = pending.lock().unwrap().pop().unwrap();
        done.complete(Ok("first".into()));

        assert_eq!(coalescer.in_flight(), 1);
        let done = pending.lock().unwrap().pop().unwrap();
        done.complete(Ok("second".into()));

        assert_eq!(*received.lock().unwrap(), [(2, ok("second"))]);
    }

    #[test]
    fn test_abandoned_fetch() {
        loader_test::setup();
        let pending = Pending::default();
        let coalescer = Coalescer::new("test", parking(&pending));
        let (received, callback) = recorder();

        coalescer.fetch(7, callback(1));
        let done = pending.lock().unwrap().pop().unwrap();
        drop(done);

        assert_eq!(coalescer.in_flight(), 0);
        assert!(received.lock().unwrap().is_empty());

        coalescer.fetch(7, callback(2));
        let done = pending.lock().unwrap().pop().unwrap();
        done.complete(Ok("v7".into()));
        assert_eq!(*received.lock().unwrap(), [(2, ok("v7"))]);
    }

    #[test]
    fn test_resolve_hook_runs_before_callbacks() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let fetcher = {
            let order = Arc::clone(&order);
            move |_key: u32, done: Completion<u32, String, String>| {
                let order = Arc::clone(&order);
                let done = done.on_resolve(move |key, result| {
                    let ok = result.is_some_and(|r| r.is_ok());
                    order.lock().unwrap().push(format!("hook {key} {ok}"));
                });
                done.complete(Ok("v".into()));
            }
        };
        let coalescer = Coalescer::new("test", fetcher);

        let callback_order = Arc::clone(&order);
        coalescer.fetch(3, move |_| {
            callback_order.lock().unwrap().push("callback".into());
        });

        assert_eq!(*order.lock().unwrap(), ["hook 3 true", "callback"]);
    }
}
