//! Statsd reporting for caches.
//!
//! Nothing is sent until [`configure_statsd`] has installed a client. Before that, and in
//! processes that never call it, [`metric!`](crate::metric) does nothing.
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use cadence::{Metric, MetricBuilder, MetricResult, StatsdClient, UdpMetricSink};

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// Re-exports the cadence traits that [`metric!`](crate::metric) calls into.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// The installed statsd client and the tags added to everything it sends.
#[derive(Debug)]
pub struct MetricsClient {
    pub statsd_client: StatsdClient,
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Adds the configured tags to `metric` and sends it.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.tags
            .iter()
            .fold(metric, |metric, (tag, value)| metric.with_tag(tag, value))
            .send()
    }
}

/// Installs a statsd client that prefixes every metric with `prefix` and tags it with `tags`.
///
/// Only the first successful call has an effect, later calls are logged and ignored.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> MetricResult<()> {
    let addrs: Vec<_> = host.to_socket_addrs()?.collect();
    if let Some(addr) = addrs.first() {
        tracing::info!(%addr, "Reporting cache metrics to statsd");
    }
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket)?;

    let client = MetricsClient {
        statsd_client: StatsdClient::from_sink(prefix, sink),
        tags,
    };
    if METRICS_CLIENT.set(client).is_err() {
        tracing::warn!("statsd metrics were already configured");
    }

    Ok(())
}

/// The installed client, if any.
///
/// Used by [`metric!`](crate::metric).
#[inline(always)]
pub fn client() -> Option<&'static MetricsClient> {
    METRICS_CLIENT.get()
}

/// Emits a metric through the installed client, with optional `tag => value` pairs.
///
/// ```
/// use loader_cache::metric;
///
/// metric!(counter("caches.access") += 1, "cache" => "stories");
/// metric!(gauge("caches.in_flight") = 3u64, "cache" => "stories");
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send count_with_tags, $id, $value $(, $k => $v)*)
    };
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $id, $value $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags, $id, $value $(, $k => $v)*)
    };
    (histogram($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send histogram_with_tags, $id, $value $(, $k => $v)*)
    };

    (@send $method:ident, $id:expr, $value:expr $(, $k:expr => $v:expr)*) => {{
        use $crate::metrics::prelude::*;
        if let Some(client) = $crate::metrics::client() {
            client.send_metric(client.statsd_client.$method($id, $value)$(.with_tag($k, $v))*);
        }
    }};
}
