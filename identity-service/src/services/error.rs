use service_core::error::AppError;
use service_core::middleware::rate_limit::RateLimitError;
use thiserror::Error;

use super::jwt::TokenError;
use super::otp::OtpError;
use super::redis::StoreError;
use super::repository::RepositoryError;
use crate::models::AuthMethod;
use crate::utils::{CodecError, PasswordError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sign-in method {0} is disabled")]
    MethodDisabled(AuthMethod),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CodecError> for ServiceError {
    fn from(err: CodecError) -> Self {
        ServiceError::MalformedInput(err.to_string())
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ServiceError::TokenExpired,
            TokenError::InvalidSignature | TokenError::Malformed(_) => {
                ServiceError::InvalidSignature
            }
            TokenError::Signing(e) => ServiceError::Internal(anyhow::anyhow!(e)),
        }
    }
}

impl From<OtpError> for ServiceError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::NotFound | OtpError::Mismatch => ServiceError::InvalidCredentials,
            OtpError::Store(e) => ServiceError::StoreUnavailable(e.into()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::StoreUnavailable(err.into())
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(reason) => ServiceError::Conflict(reason),
            other => ServiceError::StoreUnavailable(other.into()),
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(err: PasswordError) -> Self {
        ServiceError::Internal(err.into())
    }
}

impl From<RateLimitError> for ServiceError {
    fn from(err: RateLimitError) -> Self {
        ServiceError::StoreUnavailable(err.into())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::MalformedInput(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::TokenExpired => AppError::TokenExpired,
            ServiceError::InvalidSignature => AppError::InvalidToken,
            ServiceError::RateLimited(retry) => {
                AppError::TooManyRequests("Too many requests".to_string(), Some(retry))
            }
            ServiceError::Forbidden(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::MethodDisabled(method) => AppError::Forbidden(anyhow::anyhow!(
                "Sign-in method {} is disabled",
                method
            )),
            ServiceError::Unauthenticated(e) => AppError::Unauthorized(anyhow::anyhow!(e)),
            ServiceError::StoreUnavailable(e) => AppError::InternalError(e),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Delivery(step) => AppError::DeliveryError(step),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::ErrorCode;

    #[test]
    fn test_otp_failures_collapse_to_invalid_credentials() {
        assert!(matches!(
            ServiceError::from(OtpError::NotFound),
            ServiceError::InvalidCredentials
        ));
        assert!(matches!(
            ServiceError::from(OtpError::Mismatch),
            ServiceError::InvalidCredentials
        ));
    }

    #[test]
    fn test_token_errors_keep_expired_distinct() {
        assert!(matches!(
            ServiceError::from(TokenError::Expired),
            ServiceError::TokenExpired
        ));
        assert!(matches!(
            ServiceError::from(TokenError::Malformed("x".to_string())),
            ServiceError::InvalidSignature
        ));
    }

    #[test]
    fn test_http_mapping() {
        let cases = [
            (ServiceError::MalformedInput("x".into()), ErrorCode::BadRequest),
            (ServiceError::InvalidCredentials, ErrorCode::Unauthorized),
            (ServiceError::TokenExpired, ErrorCode::Unauthorized),
            (ServiceError::RateLimited(3), ErrorCode::RateLimited),
            (ServiceError::MethodDisabled(AuthMethod::Otp), ErrorCode::Forbidden),
            (ServiceError::Conflict("x".into()), ErrorCode::Conflict),
            (
                ServiceError::StoreUnavailable(anyhow::anyhow!("down")),
                ErrorCode::InternalError,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(AppError::from(err).code(), code);
        }
    }
}
