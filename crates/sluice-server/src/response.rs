use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use sluice_protocol::ApiResponse;

/// Render a payload in the common success envelope.
pub fn success<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

/// Success with no payload.
pub fn success_empty() -> Response {
    Json(ApiResponse::<()> {
        code: 200,
        message: "success".to_string(),
        data: None,
    })
    .into_response()
}
