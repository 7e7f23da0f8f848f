use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

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
        describe_histogram!(
            "olian_render_shell_ms",
            Unit::Milliseconds,
            "Time from render start until the shell was ready."
        );
        describe_counter!(
            "olian_render_prerender_failure_total",
            Unit::Count,
            "Renders that failed before any byte was sent."
        );
        describe_counter!(
            "olian_render_stream_error_total",
            Unit::Count,
            "Render failures reported after the response started streaming."
        );
        describe_counter!(
            "olian_render_deadline_total",
            Unit::Count,
            "Renders aborted because they exceeded their deadline."
        );
        describe_histogram!(
            "olian_bridge_buffered_bytes",
            Unit::Bytes,
            "Bytes queued in a response body awaiting the client."
        );
    });
}
