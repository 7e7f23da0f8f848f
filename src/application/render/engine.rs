use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    signal::RenderSignal,
    types::{RenderError, RenderRequest},
};

/// A rendering engine that walks a UI description and emits markup.
///
/// The engine reports progress through the [`ShellContext`] it is handed:
/// markup via [`ShellContext::write`], readiness via [`ShellContext::shell_ready`],
/// and failures via [`ShellContext::shell_error`] or [`ShellContext::render_error`].
/// Returning `Err` from [`RenderEngine::render`] counts as a shell error when no
/// shell was announced yet, and as a streaming error afterwards.
///
/// The engine may be terminated at any await point when its deadline expires.
#[async_trait]
pub trait RenderEngine: Send + Sync + 'static {
    type View: Send + 'static;

    /// Synchronous pre-flight check run before any task is spawned.
    fn start(&self, _request: &RenderRequest<Self::View>) -> Result<(), RenderError> {
        Ok(())
    }

    async fn render(
        &self,
        request: RenderRequest<Self::View>,
        shell: ShellContext,
    ) -> Result<(), RenderError>;
}

/// Handle through which an engine reports lifecycle signals and output.
///
/// Every call is fire-and-forget: once the coordinator has stopped listening,
/// signals are dropped silently.
#[derive(Debug, Clone)]
pub struct ShellContext {
    signals: UnboundedSender<RenderSignal>,
}

impl ShellContext {
    pub(crate) fn new(signals: UnboundedSender<RenderSignal>) -> Self {
        Self { signals }
    }

    pub fn shell_ready(&self) {
        self.emit(RenderSignal::ShellReady);
    }

    pub fn shell_error(&self, error: RenderError) {
        self.emit(RenderSignal::ShellError(error));
    }

    pub fn render_error(&self, error: RenderError) {
        self.emit(RenderSignal::RenderError(error));
    }

    pub fn write(&self, chunk: impl Into<Bytes>) {
        self.emit(RenderSignal::Chunk(chunk.into()));
    }

    /// True once the coordinator no longer accepts output, e.g. after the
    /// client went away. Engines can use this to stop early.
    pub fn is_detached(&self) -> bool {
        self.signals.is_closed()
    }

    fn emit(&self, signal: RenderSignal) {
        let _ = self.signals.send(signal);
    }
}
