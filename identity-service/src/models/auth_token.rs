//! Reset-password and magic-link tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthTokenType {
    ResetPassword,
    MagicLink,
}

impl AuthTokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthTokenType::ResetPassword => "reset-password",
            AuthTokenType::MagicLink => "magic-link",
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid auth token type: {0}")]
pub struct ParseAuthTokenTypeError(pub String);

impl FromStr for AuthTokenType {
    type Err = ParseAuthTokenTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset-password" => Ok(AuthTokenType::ResetPassword),
            "magic-link" => Ok(AuthTokenType::MagicLink),
            _ => Err(ParseAuthTokenTypeError(s.to_string())),
        }
    }
}

impl TryFrom<String> for AuthTokenType {
    type Error = ParseAuthTokenTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Typed single-purpose token, looked up by `(token, token_type)`.
#[derive(Debug, Clone, FromRow)]
pub struct AuthToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    #[sqlx(try_from = "String")]
    pub token_type: AuthTokenType,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn new(user_id: Uuid, token_type: AuthTokenType, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token: generate_token(),
            token_type,
            expires_utc: now + ttl,
            created_utc: now,
            deleted_utc: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_utc
    }

    pub fn is_consumed(&self) -> bool {
        self.deleted_utc.is_some()
    }
}

/// 256 bits from the thread-local CSPRNG, URL-safe.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let now = Utc::now();
        let a = AuthToken::new(Uuid::new_v4(), AuthTokenType::MagicLink, now, Duration::minutes(60));
        let b = AuthToken::new(Uuid::new_v4(), AuthTokenType::MagicLink, now, Duration::minutes(60));
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 43);
        assert!(a
            .token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let token = AuthToken::new(Uuid::new_v4(), AuthTokenType::ResetPassword, now, Duration::minutes(60));
        assert!(!token.is_expired_at(now + Duration::minutes(59)));
        assert!(token.is_expired_at(now + Duration::minutes(60)));
    }

    #[test]
    fn test_type_round_trips_through_column_text() {
        assert_eq!(
            AuthTokenType::try_from(AuthTokenType::ResetPassword.as_str().to_string()).unwrap(),
            AuthTokenType::ResetPassword
        );
        assert!("reset".parse::<AuthTokenType>().is_err());
    }
}
