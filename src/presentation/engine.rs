//! Template-backed render engine for the application's pages.

use async_trait::async_trait;

use crate::application::render::{RenderEngine, RenderError, RenderRequest, ShellContext};

use super::views::{
    ErrorPageView, ErrorTemplate, IndexTemplate, IndexView, PageMetaView, SITE_NAME,
    ShellEndTemplate, ShellTemplate, render_template,
};

/// UI description understood by [`PageEngine`].
#[derive(Debug, Clone)]
pub enum PageView {
    Index(IndexView),
    NotFound(ErrorPageView),
}

impl PageView {
    pub fn index() -> Self {
        PageView::Index(IndexView::default())
    }

    pub fn not_found() -> Self {
        PageView::NotFound(ErrorPageView::not_found())
    }

    fn meta(&self) -> PageMetaView {
        match self {
            PageView::Index(_) => PageMetaView::new(SITE_NAME, "Secure enterprise AI chat"),
            PageView::NotFound(view) => {
                PageMetaView::new(format!("{} | {SITE_NAME}", view.title), view.message.clone())
            }
        }
    }
}

/// Streams a page in three fragments: the shell (head and opening body), the
/// page content, and the closing tags. The shell is announced as soon as its
/// fragment is written.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageEngine;

#[async_trait]
impl RenderEngine for PageEngine {
    type View = PageView;

    async fn render(
        &self,
        request: RenderRequest<PageView>,
        shell: ShellContext,
    ) -> Result<(), RenderError> {
        let meta = request.view.meta();
        shell.write(render_template(&ShellTemplate { meta: &meta })?);
        shell.shell_ready();

        let content = match &request.view {
            PageView::Index(view) => render_template(&IndexTemplate { view }),
            PageView::NotFound(view) => render_template(&ErrorTemplate { view }),
        };
        match content {
            Ok(html) => shell.write(html),
            Err(err) => shell.render_error(err.into()),
        }

        shell.write(render_template(&ShellEndTemplate)?);
        Ok(())
    }
}
