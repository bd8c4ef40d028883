use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_INVALIDATION_TOTAL, METRIC_MUTATION_TOTAL, METRIC_QUERY_DEDUP_TOTAL,
    METRIC_QUERY_DISCARDED_TOTAL, METRIC_QUERY_FETCH_MS, METRIC_QUERY_FETCH_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the query cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_QUERY_FETCH_TOTAL,
            Unit::Count,
            "Total number of query fetches sent to the API."
        );
        describe_counter!(
            METRIC_QUERY_DEDUP_TOTAL,
            Unit::Count,
            "Total number of reads that joined an in-flight fetch."
        );
        describe_counter!(
            METRIC_QUERY_DISCARDED_TOTAL,
            Unit::Count,
            "Total number of superseded responses that were not written to the cache."
        );
        describe_histogram!(
            METRIC_QUERY_FETCH_MS,
            Unit::Milliseconds,
            "Query fetch latency in milliseconds."
        );
        describe_counter!(
            METRIC_MUTATION_TOTAL,
            Unit::Count,
            "Total number of settled mutations, by outcome."
        );
        describe_counter!(
            METRIC_INVALIDATION_TOTAL,
            Unit::Count,
            "Total number of entity tag invalidations."
        );
    });
}
