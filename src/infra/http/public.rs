use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        error::{ErrorReport, HttpError},
        render::{RenderCoordinator, RenderRequest},
    },
    presentation::engine::{PageEngine, PageView},
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub renderer: RenderCoordinator<PageEngine>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_health", get(health))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index(State(state): State<HttpState>, uri: Uri) -> Response {
    render_page(&state, &uri, PageView::index(), StatusCode::OK).await
}

async fn not_found(State(state): State<HttpState>, uri: Uri) -> Response {
    let mut response = render_page(&state, &uri, PageView::not_found(), StatusCode::NOT_FOUND).await;
    if response.status() == StatusCode::NOT_FOUND {
        ErrorReport::from_message(
            "infra::http::public::not_found",
            StatusCode::NOT_FOUND,
            format!("no route for `{}`", uri.path()),
        )
        .attach(&mut response);
    }
    response
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn render_page(state: &HttpState, uri: &Uri, view: PageView, status: StatusCode) -> Response {
    let request = RenderRequest::new(uri.to_string(), view);
    match state.renderer.render(request, status, HeaderMap::new()).await {
        Ok(descriptor) => descriptor.into_response(),
        Err(failure) => HttpError::from(failure).into_response(),
    }
}
