//! HTTP handlers and the shared response envelope.
//!
//! Every endpoint answers `{isSuccess, message, data}`. Failures carry the
//! stable error code in `data.error` so clients can tell a mistyped code from
//! an expired one without parsing the message.

pub mod health;
pub mod types;
pub mod users;
pub mod websites;

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub is_success: bool,
    pub message: String,
    #[schema(value_type = Object)]
    pub data: Value,
}

impl Envelope {
    pub fn success<T: Serialize>(message: impl Into<String>, data: &T) -> Self {
        Self {
            is_success: true,
            message: message.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn failure(message: impl Into<String>, data: Value) -> Self {
        Self {
            is_success: false,
            message: message.into(),
            data,
        }
    }
}

pub(crate) fn respond<T: Serialize>(status: StatusCode, message: &str, data: &T) -> Response {
    (status, Json(Envelope::success(message, data))).into_response()
}

pub(crate) fn missing_payload() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(Envelope::failure(
            "Missing payload",
            json!({ "error": "validation_error" }),
        )),
    )
        .into_response()
}

pub(crate) const fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Validation { .. }
        | AuthError::InvalidCode
        | AuthError::Expired
        | AuthError::NoToken
        | AuthError::InvalidToken(_)
        | AuthError::TokenMismatch => StatusCode::BAD_REQUEST,
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::DuplicateDevice(_) => StatusCode::CONFLICT,
        AuthError::Provider(_) | AuthError::CodeGeneration(_) | AuthError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Map a core error to its status and envelope. Storage details stay in the
/// log.
pub(crate) fn failure(err: &AuthError) -> Response {
    let status = status_for(err);

    let message = match err {
        AuthError::Store(source) => {
            error!("storage failure: {source:?}");
            "Internal server error".to_string()
        }
        AuthError::CodeGeneration(source) => {
            error!("challenge code generation failed: {source:?}");
            "Internal server error".to_string()
        }
        AuthError::Provider(detail) => {
            error!("push provider failure: {detail}");
            err.to_string()
        }
        _ => {
            debug!(code = err.code(), "request rejected: {err}");
            err.to_string()
        }
    };

    let data = match err {
        AuthError::Validation { field, .. } => json!({ "error": err.code(), "field": field }),
        _ => json!({ "error": err.code() }),
    };

    (status, Json(Envelope::failure(message, data))).into_response()
}
