//! Services layer for identity-service.
//!
//! Credential and token engine components, plus the collaborators they consume
//! behind traits.

pub mod auth;
mod database;
pub mod error;
pub mod jwt;
pub mod notifier;
pub mod otp;
pub mod redis;
pub mod repository;
pub mod tenant_auth;

pub use auth::{AuthService, AuthSettings, RegisterInput, Session};
pub use database::PgRepository;
pub use error::ServiceError;
pub use jwt::{AccessClaims, RefreshClaims, TokenError, TokenIssuer};
pub use notifier::{
    DeliveryError, LogNotifier, Notifier, OutboundNotifier, RecordingNotifier, SentMessage,
    SharedNotifier,
};
pub use otp::{OtpError, OtpStore};
pub use redis::{EphemeralStore, InMemoryStore, RedisStore, StoreError};
pub use repository::{IdentityRepository, InMemoryRepository, RepositoryError, SharedRepository};
pub use tenant_auth::{OnboardedTenant, TenantAuthenticator, TenantTokenError};
