use std::any::Any;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::unfurl::{UnfurlError, ValidationError};
use crate::utils::error_codes;

#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    InvalidJson,
    RateLimited { retry_after_secs: u64 },
    Unfurl(UnfurlError),
    InternalServerError,
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    error: String,
}

impl From<UnfurlError> for AppError {
    fn from(err: UnfurlError) -> Self {
        AppError::Unfurl(err)
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Unfurl(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "Unauthorized".to_string(),
            ),
            AppError::InvalidJson => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                "Invalid JSON body.".to_string(),
            ),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                error_codes::RATE_LIMIT,
                "Too many requests".to_string(),
            ),
            AppError::Unfurl(UnfurlError::Validation(e)) => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, e.to_string())
            }
            // 不向调用方透露被拦截的原因
            AppError::Unfurl(UnfurlError::Ssrf(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_codes::FETCH_FAILED,
                "Could not fetch URL.".to_string(),
            ),
            AppError::Unfurl(UnfurlError::Fetch(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_codes::FETCH_FAILED,
                e.to_string(),
            ),
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "An unexpected error occurred.".to_string(),
            ),
        };

        let mut response = (status, Json(ErrorResponse { code, error })).into_response();

        if let AppError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

/// Turns a handler panic into a generic 500.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "handler panicked");

    AppError::InternalServerError.into_response()
}
