//! Structured logging setup for applications built on these caches.
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};

/// Installs a global subscriber that writes one JSON object per event to `make_writer`.
///
/// Events are filtered according to `env_filter`, which uses the `RUST_LOG` syntax. Event fields
/// are flattened into the top-level object, and the current span as well as the span list are
/// attached to every line.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
        .init();
}
