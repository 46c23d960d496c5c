//! Mapping from service errors to HTTP responses.
//!
//! Every response body carries a machine-stable `kind` and a human-readable
//! `message`; internal causes are logged, never serialized.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use service::ServiceError;
use tracing::error;

/// An HTTP-mapped error. Built from [`ServiceError`] or directly by handlers
/// for transport-level problems.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => Self {
                status: StatusCode::BAD_REQUEST,
                kind: "validation",
                message,
            },
            ServiceError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                kind: "not_found",
                message: "resource not found".into(),
            },
            ServiceError::MissingProduct(id) => Self {
                status: StatusCode::CONFLICT,
                kind: "missing_product",
                message: format!("product {id} does not exist"),
            },
            ServiceError::Auth => Self {
                status: StatusCode::UNAUTHORIZED,
                kind: "auth",
                message: "invalid credentials".into(),
            },
            ServiceError::Upload(cause) => {
                error!("Image upload failed: {}", cause);
                Self {
                    status: StatusCode::BAD_GATEWAY,
                    kind: "upload",
                    message: "image upload failed".into(),
                }
            }
            ServiceError::Store(cause) => {
                error!("Storage error: {}", cause);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    kind: "store",
                    message: "storage temporarily unavailable".into(),
                }
            }
            ServiceError::Unexpected(cause) => {
                error!("Unexpected error: {}", cause);
                Self::internal("internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}
