use std::time::Duration;

use thiserror::Error;

/// A single render invocation: the UI description plus the URL it was requested at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest<V> {
    /// Request path (and query) the engine uses to decide what to render.
    pub url: String,
    /// Engine-specific description of the UI to render.
    pub view: V,
}

impl<V> RenderRequest<V> {
    pub fn new(url: impl Into<String>, view: V) -> Self {
        Self {
            url: url.into(),
            view,
        }
    }
}

/// Errors reported by a render engine, either through a lifecycle signal or
/// by returning from its render routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("component `{component}` failed: {message}")]
    Component { component: String, message: String },
    #[error("template rendering failed: {message}")]
    Template { message: String },
    #[error("render engine failure: {message}")]
    Engine { message: String },
    #[error("render engine panicked: {message}")]
    Panicked { message: String },
}

impl RenderError {
    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }
}

/// Failure before any byte of the response was committed. The caller is free
/// to produce its own error response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrerenderFailure {
    #[error("render engine could not start: {0}")]
    Startup(#[source] RenderError),
    #[error("shell rendering failed: {0}")]
    Shell(#[source] RenderError),
    #[error("render did not produce a shell within {0:?}")]
    DeadlineExceeded(Duration),
    #[error("render engine stopped before the shell was ready")]
    Interrupted,
}

impl PrerenderFailure {
    /// The engine error carried by this failure, if any.
    pub fn render_error(&self) -> Option<&RenderError> {
        match self {
            PrerenderFailure::Startup(err) | PrerenderFailure::Shell(err) => Some(err),
            PrerenderFailure::DeadlineExceeded(_) | PrerenderFailure::Interrupted => None,
        }
    }
}

/// Failure after headers were handed to the transport. Never returned to the
/// caller; only reported to the error sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostStreamFailure {
    #[error("render error after the shell was sent: {0}")]
    Render(#[source] RenderError),
    #[error("render aborted after {0:?}; response body truncated")]
    DeadlineExceeded(Duration),
}
