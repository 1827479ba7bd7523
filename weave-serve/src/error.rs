//! Maps [`weave::DispatchError`] onto
//! HTTP responses matching the wire contract's status-code table (§6).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use weave::{ActorError, DispatchError};

pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

impl From<ActorError> for ApiError {
    fn from(e: ActorError) -> Self {
        ApiError(DispatchError::Actor(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            DispatchError::NotFound(identifier) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": format!("no brain matches {identifier:?}")}))).into_response()
            }
            DispatchError::Ambiguous(identifier, candidates) => (
                StatusCode::MULTIPLE_CHOICES,
                Json(json!({"matchType": "multiple", "identifier": identifier, "candidates": candidates})),
            )
                .into_response(),
            DispatchError::RunNotFound(run_id) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": format!("run {run_id} not found")}))).into_response()
            }
            DispatchError::Actor(actor_err) => {
                (StatusCode::CONFLICT, Json(json!({"error": actor_err.to_string()}))).into_response()
            }
        }
    }
}
