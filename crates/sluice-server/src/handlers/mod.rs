pub mod chunk;
pub mod merge;
pub mod stream;

#[cfg(test)]
pub mod test_helpers;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use sluice_protocol::UploadSettings;

use crate::response::success;
use crate::state::AppState;

/// Per-request body ceiling. Intermediaries in front of this server cap
/// bodies around 100 MB; the chunk engines are sized to fit under it.
const MAX_REQUEST_BODY: usize = 100 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/fs/put", axum::routing::put(stream::put_stream))
        .route("/fs/form", axum::routing::put(stream::put_form))
        .route("/fs/put/chunk", axum::routing::put(chunk::put_chunk))
        .route(
            "/fs/put/chunk/merge",
            axum::routing::post(merge::merge_chunks),
        )
        .route("/fs/task", axum::routing::get(merge::task_info))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Health and settings are unauthenticated: clients read the advertised
    // chunk sizes before they have anything to upload.
    let public = Router::new()
        .route("/health", axum::routing::get(health))
        .route("/settings", axum::routing::get(settings));

    public
        .merge(authed)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn settings(State(state): State<AppState>) -> Response {
    success(UploadSettings {
        chunked_upload_chunk_size: state.inner.config.chunked_upload_chunk_size,
        stream_upload_chunk_size: state.inner.config.stream_upload_chunk_size,
    })
}

async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.inner.config.token.as_bytes();

    let provided = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if provided.as_bytes().ct_eq(expected).into() {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "invalid or missing token").into_response()
    }
}
