pub mod health;
pub mod run;
pub mod status;

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};

use super::AppState;
use crate::core::backup::rfc3339;

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub(crate) fn timestamp(state: &AppState) -> String {
    rfc3339(&state.service.now())
}
