//! HTTP error envelope.
//!
//! Every failure leaves the server as an OpenAI-style body
//! `{"error": {"message", "type", "code"}}` with the status the relay
//! error taxonomy prescribes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use relay_core::RelayError;

/// An error ready to be rendered to the client.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// HTTP status to answer with
    #[serde(skip)]
    pub status: StatusCode,
    /// Human-readable message
    pub message: String,
    /// OpenAI-style `error.type`
    pub error_type: &'static str,
    /// Machine-readable code
    pub code: &'static str,
}

impl ApiError {
    /// 400 with `invalid_request_error`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            error_type: "invalid_request_error",
            code: "invalid_request",
        }
    }

    /// 404 with `invalid_request_error`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            error_type: "invalid_request_error",
            code: "not_found",
        }
    }

    /// 500 with `relay_hub_error`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            error_type: "relay_hub_error",
            code: "internal_error",
        }
    }

    /// The JSON body this error renders to.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.message,
                "type": self.error_type,
                "code": self.code,
            }
        })
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self {
            status: StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
            error_type: err.error_type(),
            code: err.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}
