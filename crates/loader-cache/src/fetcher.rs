use std::fmt;
use std::future::Future;

use tokio::runtime::Handle;

use crate::{Completion, Key};

/// The external fetch function a [`Coalescer`](crate::Coalescer) or [`Cache`](crate::Cache) is
/// configured with.
///
/// An implementation starts fetching the value for `key` and eventually hands the outcome to
/// [`Completion::complete`], exactly once, from any thread. Completing synchronously, before
/// `fetch` returns, is allowed as well.
///
/// This is implemented for all closures with a matching signature:
///
/// ```
/// use loader_cache::{Coalescer, Completion};
///
/// let coalescer = Coalescer::new("lengths", |key: String, done: Completion<String, usize, ()>| {
///     done.complete(Ok(key.len()));
/// });
/// coalescer.fetch("hello".to_owned(), |result| assert_eq!(result, Ok(5)));
/// ```
pub trait Fetcher<K: Key, V, E>: Send + Sync + 'static {
    /// Starts fetching the value for `key`, reporting the result through `done`.
    fn fetch(&self, key: K, done: Completion<K, V, E>);
}

impl<K, V, E, T> Fetcher<K, V, E> for T
where
    K: Key,
    T: Fn(K, Completion<K, V, E>) + Send + Sync + 'static,
{
    fn fetch(&self, key: K, done: Completion<K, V, E>) {
        self(key, done)
    }
}

/// A [`Fetcher`] that runs an async function on a tokio runtime.
///
/// Every fetch is spawned as a separate task. If that task panics or the runtime shuts down
/// before it finishes, the fetch is abandoned.
pub struct AsyncFetcher<F> {
    handle: Handle,
    fetch: F,
}

impl<F> AsyncFetcher<F> {
    /// Creates a fetcher that spawns its tasks onto `handle`.
    pub fn new(handle: Handle, fetch: F) -> Self {
        Self { handle, fetch }
    }

    /// Creates a fetcher that spawns its tasks onto the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn current(fetch: F) -> Self {
        Self::new(Handle::current(), fetch)
    }
}

impl<K, V, E, F, Fut> Fetcher<K, V, E> for AsyncFetcher<F>
where
    K: Key,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    fn fetch(&self, key: K, done: Completion<K, V, E>) {
        let computation = (self.fetch)(key);
        self.handle.spawn(async move {
            let result = computation.await;
            done.complete(result);
        });
    }
}

impl<F> fmt::Debug for AsyncFetcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFetcher")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
