//! Tenant model - an isolated customer organization ("department").

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Tenant entity.
///
/// `id` is chosen by the onboarding caller and never changes. Only the bcrypt
/// hash of the tenant secret is kept; the secret itself leaves the service once,
/// inside the onboarding response.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub secret_hash: String,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: String, name: String, secret_hash: String) -> Self {
        Self {
            id,
            name,
            secret_hash,
            created_utc: Utc::now(),
        }
    }
}
