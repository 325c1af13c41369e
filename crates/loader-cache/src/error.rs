use thiserror::Error;

/// A fetch was dropped without ever producing a result.
///
/// This happens when a [`Fetcher`](crate::Fetcher) drops its [`Completion`](crate::Completion)
/// instead of completing it, for example because the task driving the fetch panicked.
/// Callback-based subscribers of such a fetch are dropped without being invoked, whereas
/// [`Cache::get`](crate::Cache::get) reports this error through the fetch error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("fetch was abandoned before producing a result")]
pub struct Abandoned;
