use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidationError};

use crate::utils::secret_codec::SEPARATOR;

/// JSON body that has already passed its `validator` rules.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// `+` followed by 8 to 15 digits, first digit non-zero.
pub fn is_e164(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

pub fn validate_e164(value: &str) -> Result<(), ValidationError> {
    if is_e164(value) {
        Ok(())
    } else {
        let mut err = ValidationError::new("e164");
        err.message = Some("Phone number must be in E.164 format, e.g. +15551234567".into());
        Err(err)
    }
}

/// Tenant ids travel inside the basic-auth token, so they cannot contain the separator.
pub fn validate_tenant_id(value: &str) -> Result<(), ValidationError> {
    let valid = !value.is_empty()
        && !value.contains(SEPARATOR)
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("tenant_id");
        err.message = Some("Tenant id may only contain letters, digits, '-', '_' and '.'".into());
        Err(err)
    }
}
