use serde::{Deserialize, Serialize};

/// What happens to a fetch result if its key is invalidated while the fetch is outstanding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightInvalidation {
    /// The result is delivered to all waiting callbacks, but not stored.
    ///
    /// This keeps the guarantee that every stored value was fetched after the most recent
    /// invalidation of its key.
    #[default]
    Discard,
    /// The result is delivered and stored as if the invalidation had not happened.
    Commit,
}

/// Configuration of one [`Cache`](crate::Cache) instance.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// The name used in logs and metrics.
    pub name: String,
    /// Whether a fetch that outlives an invalidation of its key still stores its result.
    pub in_flight_invalidation: InFlightInvalidation,
}

impl CacheConfig {
    /// Creates a default configuration with the given `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the [`InFlightInvalidation`] policy.
    pub fn in_flight_invalidation(mut self, policy: InFlightInvalidation) -> Self {
        self.in_flight_invalidation = policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            in_flight_invalidation: InFlightInvalidation::default(),
        }
    }
}
