//! Streaming render coordination.
//!
//! A [`RenderCoordinator`] turns one [`RenderRequest`] into either a
//! [`ResponseDescriptor`] whose body streams while the engine keeps working, or
//! a [`PrerenderFailure`] when nothing could be sent. The engine's output flows
//! through a byte bridge; a deadline guard aborts renders that run too long.

mod bridge;
mod coordinator;
mod deadline;
mod engine;
mod signal;
mod sink;
mod types;

pub use bridge::{BridgeClosed, BridgeReader, BridgeWriter, byte_bridge};
pub use coordinator::{
    HTML_CONTENT_TYPE, RenderCoordinator, RenderPipelineConfig, ResponseDescriptor,
};
pub use deadline::{DeadlineGuard, DeadlineState};
pub use engine::{RenderEngine, ShellContext};
pub use signal::{Effect, Phase, RenderMachine, RenderSignal};
pub use sink::{ErrorSink, StreamErrorEvent, TracingErrorSink};
pub use types::{PostStreamFailure, PrerenderFailure, RenderError, RenderRequest};
