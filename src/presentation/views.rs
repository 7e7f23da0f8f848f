use askama::{Error as AskamaError, Template};
use thiserror::Error;

use crate::application::render::RenderError;

pub const SITE_NAME: &str = "Olian Enterprise LLM Platform";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) origin: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(origin: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            origin,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for RenderError {
    fn from(err: TemplateRenderError) -> Self {
        RenderError::template(format!("{} ({}): {}", err.public_message, err.origin, err.error))
    }
}

pub fn render_template<T: Template>(template: &T) -> Result<String, TemplateRenderError> {
    template.render().map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
    })
}

#[derive(Debug, Clone)]
pub struct PageMetaView {
    pub title: String,
    pub description: String,
}

impl PageMetaView {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexView {
    pub heading: String,
    pub tagline: String,
}

impl Default for IndexView {
    fn default() -> Self {
        Self {
            heading: SITE_NAME.to_string(),
            tagline: "Your secure AI platform is being set up...".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorPageView {
    pub title: String,
    pub message: String,
    pub home_href: String,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "The page you requested does not exist.".to_string(),
            home_href: "/".to_string(),
        }
    }
}

/// Document head and the opening `<body>`; everything needed before the first paint.
#[derive(Template)]
#[template(path = "shell.html")]
pub struct ShellTemplate<'a> {
    pub meta: &'a PageMetaView,
}

#[derive(Template)]
#[template(path = "shell_end.html")]
pub struct ShellEndTemplate;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate<'a> {
    pub view: &'a IndexView,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate<'a> {
    pub view: &'a ErrorPageView,
}
