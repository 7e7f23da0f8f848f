use std::time::Duration;

use tracing::error;
use uuid::Uuid;

use super::types::PostStreamFailure;

/// A failure that happened after the response started streaming.
#[derive(Debug, Clone)]
pub struct StreamErrorEvent {
    pub render_id: Uuid,
    pub url: String,
    pub failure: PostStreamFailure,
    /// Time since the render started.
    pub elapsed: Duration,
}

/// Destination for post-stream render failures.
///
/// Shared by every concurrent render, so implementations must be cheap and
/// must not block the caller.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, event: StreamErrorEvent);
}

/// Default sink: one structured `error!` event per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, event: StreamErrorEvent) {
        error!(
            target = "olian::render::stream",
            render_id = %event.render_id,
            url = %event.url,
            elapsed_ms = event.elapsed.as_millis() as u64,
            error = %event.failure,
            "render failed after the response started streaming"
        );
    }
}
