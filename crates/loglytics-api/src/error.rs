//! Centralized API error type.
//!
//! Maps every failure surface (credential checks, ingest admission, storage,
//! analytics) onto the error kinds the wire contract names, and renders each
//! as a JSON body with a matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },
    #[error("request timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<loglytics_core::CoreError> for ApiError {
    fn from(err: loglytics_core::CoreError) -> Self {
        match err {
            loglytics_core::CoreError::TenantNotFound(id) => {
                ApiError::NotFound(format!("tenant '{id}' not found"))
            }
            loglytics_core::CoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Error kind tag in the JSON body, matching the wire contract's `kXxx` names.
fn kind(err: &ApiError) -> &'static str {
    match err {
        ApiError::BadRequest(_) => "kBadRequest",
        ApiError::Unauthorized => "kUnauthorized",
        ApiError::Forbidden(_) => "kForbidden",
        ApiError::NotFound(_) => "kNotFound",
        ApiError::Conflict(_) => "kConflict",
        ApiError::PayloadTooLarge => "kPayloadTooLarge",
        ApiError::RateLimited { .. } => "kRateLimited",
        ApiError::Timeout => "kTimeout",
        ApiError::Internal(_) => "kInternal",
    }
}

fn status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        ApiError::Conflict(_) => StatusCode::CONFLICT,
        ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = status(&self);
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        } else {
            tracing::warn!(error = %self, status = %code, "request rejected");
        }
        let body = ErrorBody {
            error: kind(&self),
            message: self.to_string(),
        };
        let mut response = (code, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
