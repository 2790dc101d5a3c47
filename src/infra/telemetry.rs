use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::pipeline::{METRIC_PIPELINE_REQUESTS, METRIC_PIPELINE_STAGE_MS};
use crate::cache::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Fingerprint cache lookups that found a published artifact."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Fingerprint cache lookups that found nothing."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Fingerprint cache entries dropped to stay within capacity."
        );
        describe_counter!(
            METRIC_PIPELINE_REQUESTS,
            Unit::Count,
            "Generation requests by final HTTP status."
        );
        describe_histogram!(
            METRIC_PIPELINE_STAGE_MS,
            Unit::Milliseconds,
            "Latency of the render, export and publish stages in milliseconds."
        );
    });
}
