use chrono::Duration;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::User;
use crate::utils::clock::SharedClock;

/// Claims for access tokens (short-lived, carried in the signed cookie).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    /// User id
    pub id: Uuid,
    pub name: String,
    /// Absent for phone-only accounts
    pub email: Option<String>,
    pub tenant_id: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Claims for refresh tokens. No personal data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshClaims {
    pub id: Uuid,
    pub tenant_id: String,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token is malformed: {0}")]
    Malformed(String),

    #[error("Token has expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

#[derive(Clone)]
struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKey {
    fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }
}

/// Mints and parses HS256 access and refresh tokens.
///
/// Access and refresh tokens use independent secrets and TTLs. Parsing checks
/// signature and shape only; expiry is a separate check against the injected
/// clock, so an expired token still parses.
#[derive(Clone)]
pub struct TokenIssuer {
    access: SigningKey,
    refresh: SigningKey,
    clock: SharedClock,
}

impl TokenIssuer {
    pub fn new(
        access_secret: &[u8],
        access_ttl: Duration,
        refresh_secret: &[u8],
        refresh_ttl: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            access: SigningKey::new(access_secret, access_ttl),
            refresh: SigningKey::new(refresh_secret, refresh_ttl),
            clock,
        }
    }

    pub fn from_config(config: &JwtConfig, clock: SharedClock) -> Self {
        let issuer = Self::new(
            config.access_secret.expose_secret().as_bytes(),
            Duration::hours(config.access_ttl_hours),
            config.refresh_secret.expose_secret().as_bytes(),
            Duration::hours(config.refresh_ttl_hours),
            clock,
        );
        tracing::info!(
            access_ttl_hours = config.access_ttl_hours,
            refresh_ttl_hours = config.refresh_ttl_hours,
            "Token issuer initialized with HS256 keys"
        );
        issuer
    }

    pub fn issue_access(&self, user: &User, tenant_id: &str) -> Result<String, TokenError> {
        let claims = AccessClaims {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            tenant_id: tenant_id.to_string(),
            exp: (self.clock.now() + self.access.ttl).timestamp(),
        };
        sign(&claims, &self.access)
    }

    pub fn parse_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        parse(token, &self.access)
    }

    pub fn issue_refresh(&self, user: &User, tenant_id: &str) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            id: user.id,
            tenant_id: tenant_id.to_string(),
            exp: (self.clock.now() + self.refresh.ttl).timestamp(),
        };
        sign(&claims, &self.refresh)
    }

    pub fn parse_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        parse(token, &self.refresh)
    }

    /// A token is expired from the second named by `exp` onwards.
    pub fn check_expiry(&self, exp: i64) -> Result<(), TokenError> {
        if self.clock.now().timestamp() >= exp {
            return Err(TokenError::Expired);
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }
}

fn sign<T: Serialize>(claims: &T, key: &SigningKey) -> Result<String, TokenError> {
    encode(&Header::new(Algorithm::HS256), claims, &key.encoding)
        .map_err(|e| TokenError::Signing(e.to_string()))
}

fn parse<T: DeserializeOwned>(token: &str, key: &SigningKey) -> Result<T, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.leeway = 0;

    decode::<T>(token, &key.decoding, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                TokenError::InvalidSignature
            }
            _ => TokenError::Malformed(e.to_string()),
        })
}
