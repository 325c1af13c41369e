//! Helpers for testing caches and the code built on them.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Use a [`Gate`] to control exactly when a fetch resolves. Fetches started through a gate stay
//!    outstanding until the test calls [`Gate::release`] or [`Gate::abandon`].
//!
//!  - Use [`sleeping`] for tests that need real asynchronous fetches running on a tokio runtime.
//!
//!  - When using a [`Server`] or [`HitCounter`], hold it until all requests to it have been made.
//!    Dropping it stops the server, and later requests fail to connect.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{OriginalUri, Request};
use axum::{Router, middleware};
use loader_cache::{AsyncFetcher, Completion, Fetcher, Key};
use tokio::task::JoinHandle;
use url::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `loader_cache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("loader_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Records the keys a fetcher was called with, in call order.
pub struct Calls<K>(Arc<Mutex<Vec<K>>>);

impl<K: Clone> Calls<K> {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Default::default())
    }

    /// Records a call for `key`.
    pub fn record(&self, key: &K) {
        self.0.lock().unwrap().push(key.clone());
    }

    /// The number of recorded calls.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// All recorded keys, in call order.
    pub fn keys(&self) -> Vec<K> {
        self.0.lock().unwrap().clone()
    }
}

impl<K: Clone> Default for Calls<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for Calls<K> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K: fmt::Debug> fmt::Debug for Calls<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Calls").field(&self.0.lock().unwrap()).finish()
    }
}

/// A fetcher that parks every fetch until the test resolves it.
///
/// Clones share their parked fetches, so one clone can be handed to a cache while the test keeps
/// another to release fetches.
pub struct Gate<K: Key, V, E> {
    calls: Calls<K>,
    parked: Arc<Mutex<Vec<Completion<K, V, E>>>>,
}

impl<K: Key, V, E> Gate<K, V, E> {
    /// Creates a gate without parked fetches.
    pub fn new() -> Self {
        Self {
            calls: Calls::new(),
            parked: Default::default(),
        }
    }

    /// The keys this gate was asked to fetch.
    pub fn calls(&self) -> &Calls<K> {
        &self.calls
    }

    /// The number of fetches waiting to be resolved.
    pub fn parked(&self) -> usize {
        self.parked.lock().unwrap().len()
    }

    fn take(&self, key: &K) -> Option<Completion<K, V, E>> {
        let mut parked = self.parked.lock().unwrap();
        let position = parked.iter().position(|done| done.key() == key)?;
        Some(parked.remove(position))
    }

    /// Drops the oldest parked fetch for `key` without a result.
    ///
    /// Returns `false` if no fetch for `key` is parked.
    pub fn abandon(&self, key: &K) -> bool {
        self.take(key).is_some()
    }
}

impl<K: Key, V: Clone, E: Clone> Gate<K, V, E> {
    /// Resolves the oldest parked fetch for `key` with `result`.
    ///
    /// All callbacks run on the current thread before this returns. Returns `false` if no fetch
    /// for `key` is parked.
    pub fn release(&self, key: &K, result: Result<V, E>) -> bool {
        match self.take(key) {
            Some(done) => {
                done.complete(result);
                true
            }
            None => false,
        }
    }
}

impl<K: Key, V, E> Default for Gate<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V, E> Clone for Gate<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            calls: self.calls.clone(),
            parked: Arc::clone(&self.parked),
        }
    }
}

impl<K, V, E> Fetcher<K, V, E> for Gate<K, V, E>
where
    K: Key,
    V: Send + 'static,
    E: Send + 'static,
{
    fn fetch(&self, key: K, done: Completion<K, V, E>) {
        self.calls.record(&key);
        self.parked.lock().unwrap().push(done);
    }
}

/// The future type returned by the functions behind [`sleeping`] fetchers.
pub type Sleep<V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send>>;

/// Creates a fetcher that records each call in `calls`, sleeps for `delay` and then returns
/// `f(key)`.
///
/// # Panics
///
/// Panics if called outside the context of a tokio runtime.
pub fn sleeping<K, V, E, F>(
    delay: Duration,
    calls: &Calls<K>,
    f: F,
) -> AsyncFetcher<impl Fn(K) -> Sleep<V, E> + Send + Sync + 'static>
where
    K: Key,
    V: Send + 'static,
    E: Send + 'static,
    F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
{
    let calls = calls.clone();
    let f = Arc::new(f);
    AsyncFetcher::current(move |key: K| -> Sleep<V, E> {
        calls.record(&key);
        let f = Arc::clone(&f);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            (*f)(&key)
        })
    })
}

/// An HTTP server on an ephemeral local port, serving a test [`Router`].
#[derive(Debug)]
pub struct Server {
    handle: JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Binds to a free port on `127.0.0.1` and serves `router` on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a tokio runtime, or if no port can be bound.
    pub fn new(router: Router) -> Self {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A [`Server`] that counts the requests it receives per path.
#[derive(Debug)]
pub struct HitCounter {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl HitCounter {
    /// Serves `router`, counting every request before it is routed.
    pub fn new(router: Router) -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = Arc::clone(&hits);
            move |OriginalUri(uri): OriginalUri, req: Request, next: middleware::Next| {
                let hits = Arc::clone(&hits);
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        *hits.entry(uri.path().to_owned()).or_default() += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let server = Server::new(router.layer(middleware::from_fn(hitcounter)));
        Self { server, hits }
    }

    /// The number of requests received for `path` so far.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    /// Returns the number of requests received so far and resets all counts.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}
