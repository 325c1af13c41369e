//! Keyed caching primitives with in-flight request coalescing.
//!
//! These primitives are composed bottom-up:
//!
//! - A [`SubscriberList`] collects the callbacks waiting on one outstanding fetch and fans the
//!   eventual result out to all of them, exactly once and in registration order.
//! - A [`Coalescer`] makes sure there is at most one outstanding call to its [`Fetcher`] per key,
//!   no matter how many callers ask for that key concurrently.
//! - A [`Cache`] wraps a [`Coalescer`] with a persistent key/value map, answering from the map
//!   when it can ([`Source::Local`]) and fetching otherwise ([`Source::Remote`]).
//!
//! None of these types spawn threads on their own. All waiting is expressed as callbacks that are
//! invoked from whichever thread the [`Fetcher`] completes on.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod cache;
mod coalescer;
mod config;
mod error;
mod fetcher;
pub mod logging;
mod subscribers;

pub use cache::*;
pub use coalescer::*;
pub use config::*;
pub use error::*;
pub use fetcher::*;
pub use subscribers::*;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A key identifying one cacheable resource.
///
/// This is implemented for every type with a total equality and hash relation that can be
/// moved across threads.
pub trait Key: Eq + Hash + Clone + Debug + Send + 'static {}

impl<T> Key for T where T: Eq + Hash + Clone + Debug + Send + 'static {}

/// Locks the `mutex`, recovering the guard if a previous holder panicked.
///
/// Callbacks never run while one of our locks is held, so a poisoned lock still guards
/// consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
