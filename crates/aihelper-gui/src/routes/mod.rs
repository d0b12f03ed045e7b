mod api;
mod health;

use api::api_router;
use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use health::health_router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes();

    Router::new()
        .route("/", get(index))
        .nest("/health", health_router())
        .nest("/api", api_router())
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Response {
    if !state.gui_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Html(INDEX_HTML).into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
