use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Header carrying the remaining admission budget for the caller.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "ratelimit-remaining";

/// Canonical error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    Unauthorized,
    Forbidden,
    Conflict,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not-found",
            ErrorCode::BadRequest => "bad-request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Conflict => "conflict",
            ErrorCode::RateLimited => "rate-limited",
            ErrorCode::InternalError => "internal-error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    /// Correctly signed token whose `exp` is in the past. Callers may refresh.
    #[error("Token expired")]
    TokenExpired,

    /// Token that failed signature or structural validation. Callers must re-authenticate.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Cache error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Out-of-band delivery failed after earlier steps already took effect. The
    /// message names the failing step and is shown to the caller.
    #[error("Delivery error: {0}")]
    DeliveryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => ErrorCode::BadRequest,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Unauthorized(_) | AppError::TokenExpired | AppError::InvalidToken => {
                ErrorCode::Unauthorized
            }
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::TooManyRequests(..) => ErrorCode::RateLimited,
            AppError::InternalError(_)
            | AppError::RedisError(_)
            | AppError::DeliveryError(_)
            | AppError::ConfigError(_) => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();

        let (error_message, reason, details, retry_after) = match self {
            AppError::ValidationError(err) => (
                "Validation error".to_string(),
                None,
                Some(err.to_string()),
                None,
            ),
            AppError::BadRequest(err) => (err.to_string(), None, None, None),
            AppError::NotFound(err) => (err.to_string(), None, None, None),
            AppError::Unauthorized(err) => (err.to_string(), None, None, None),
            AppError::TokenExpired => (
                "Access token expired".to_string(),
                Some("token_expired"),
                None,
                None,
            ),
            AppError::InvalidToken => (
                "Invalid token".to_string(),
                Some("invalid_token"),
                None,
                None,
            ),
            AppError::Forbidden(err) => (err.to_string(), None, None, None),
            AppError::Conflict(err) => (err.to_string(), None, None, None),
            AppError::TooManyRequests(msg, retry) => (msg, None, None, retry),
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal error");
                ("Internal server error".to_string(), None, None, None)
            }
            AppError::RedisError(err) => {
                tracing::error!(error = %err, "Cache error");
                ("Internal server error".to_string(), None, None, None)
            }
            AppError::DeliveryError(step) => {
                tracing::error!(step = %step, "Delivery failed");
                (step, None, None, None)
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                ("Internal server error".to_string(), None, None, None)
            }
        };

        let mut res = (
            code.status(),
            Json(ErrorResponse {
                error: error_message,
                code,
                reason,
                details,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
            res.headers_mut().insert(
                RATE_LIMIT_REMAINING_HEADER,
                HeaderValue::from_static("0"),
            );
        }

        res
    }
}
