use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::application::{AppError, ErrorKind};

/// Seconds a client should wait before retrying a retryable failure.
const RETRY_AFTER_SECS: &str = "1";

/// An [`AppError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ValidationFailed | ErrorKind::SameAccountTransfer => StatusCode::BAD_REQUEST,
        ErrorKind::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::AccountInactive | ErrorKind::ConcurrencyConflict => StatusCode::CONFLICT,
        ErrorKind::PersistenceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        match kind {
            ErrorKind::PersistenceUnavailable => error!(error = %self.0, "Storage failure"),
            ErrorKind::ConcurrencyConflict => warn!(error = %self.0, "Request lost a concurrency race"),
            _ => {}
        }

        let body = Json(json!({
            "error": {
                "kind": kind.as_str(),
                "message": self.0.to_string(),
            }
        }));
        let mut response = (status, body).into_response();
        if kind.is_retryable() {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}
