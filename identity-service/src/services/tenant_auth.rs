//! Tenant onboarding and validation of basic-auth tenant tokens.

use thiserror::Error;
use uuid::Uuid;

use super::error::ServiceError;
use super::repository::{RepositoryError, SharedRepository};
use crate::models::Tenant;
use crate::utils::{CodecError, PasswordHasher, SecretCodec};

#[derive(Debug, Error)]
pub enum TenantTokenError {
    #[error(transparent)]
    Malformed(#[from] CodecError),

    #[error("Unknown tenant or wrong secret")]
    InvalidTenant,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TenantTokenError> for ServiceError {
    fn from(err: TenantTokenError) -> Self {
        match err {
            TenantTokenError::Malformed(e) => e.into(),
            TenantTokenError::InvalidTenant => {
                ServiceError::Unauthenticated("Invalid tenant credentials".to_string())
            }
            TenantTokenError::Repository(e) => e.into(),
        }
    }
}

/// Result of onboarding. `token` is the only copy of the tenant secret.
#[derive(Debug, Clone)]
pub struct OnboardedTenant {
    pub tenant_id: String,
    pub name: String,
    pub token: String,
}

#[derive(Clone)]
pub struct TenantAuthenticator {
    repo: SharedRepository,
    hasher: PasswordHasher,
}

impl TenantAuthenticator {
    pub fn new(repo: SharedRepository, hasher: PasswordHasher) -> Self {
        Self { repo, hasher }
    }

    /// Creates the tenant with a fresh random secret and returns the encoded
    /// `tenant_id:secret` token. Only the bcrypt hash of the secret is stored.
    pub async fn onboard(&self, tenant_id: &str, name: &str) -> Result<OnboardedTenant, ServiceError> {
        if self.repo.find_tenant(tenant_id).await?.is_some() {
            return Err(ServiceError::Conflict("Tenant already exists".to_string()));
        }

        let secret = Uuid::new_v4().simple().to_string();
        let secret_hash = self.hasher.hash_blocking(secret.clone()).await?;

        let tenant = Tenant::new(tenant_id.to_string(), name.to_string(), secret_hash);
        self.repo.create_tenant(&tenant).await?;

        tracing::info!(tenant_id = %tenant_id, "Tenant onboarded");

        Ok(OnboardedTenant {
            tenant_id: tenant.id,
            name: tenant.name,
            token: SecretCodec::encode(tenant_id, &secret),
        })
    }

    /// Returns the tenant id when the token names an existing tenant and its
    /// secret matches the stored hash.
    pub async fn validate_tenant_token(&self, token: &str) -> Result<String, TenantTokenError> {
        let (tenant_id, secret) = SecretCodec::decode(token)?;

        let tenant = self
            .repo
            .find_tenant(&tenant_id)
            .await?
            .ok_or(TenantTokenError::InvalidTenant)?;

        if !self
            .hasher
            .verify_blocking(secret, tenant.secret_hash)
            .await
        {
            return Err(TenantTokenError::InvalidTenant);
        }

        Ok(tenant_id)
    }

    pub async fn delete(&self, tenant_id: &str) -> Result<(), ServiceError> {
        if !self.repo.delete_tenant(tenant_id).await? {
            return Err(ServiceError::NotFound("Tenant not found".to_string()));
        }
        tracing::info!(tenant_id = %tenant_id, "Tenant deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::InMemoryRepository;
    use std::sync::Arc;

    fn authenticator() -> (TenantAuthenticator, SharedRepository) {
        let repo: SharedRepository = Arc::new(InMemoryRepository::new());
        (
            TenantAuthenticator::new(repo.clone(), PasswordHasher::new(4)),
            repo,
        )
    }

    #[tokio::test]
    async fn test_onboarded_token_validates() {
        let (tenants, repo) = authenticator();
        let onboarded = tenants.onboard("acme", "Acme Corp").await.unwrap();

        assert_eq!(tenants.validate_tenant_token(&onboarded.token).await.unwrap(), "acme");

        let stored = repo.find_tenant("acme").await.unwrap().unwrap();
        let (_, secret) = SecretCodec::decode(&onboarded.token).unwrap();
        assert_ne!(stored.secret_hash, secret);
        assert!(stored.secret_hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_known_secret_validates() {
        let (tenants, repo) = authenticator();
        let hash = PasswordHasher::new(4).hash("s3cret").unwrap();
        repo.create_tenant(&Tenant::new("acme".to_string(), "Acme".to_string(), hash))
            .await
            .unwrap();

        let token = SecretCodec::encode("acme", "s3cret");
        assert_eq!(tenants.validate_tenant_token(&token).await.unwrap(), "acme");

        let wrong = SecretCodec::encode("acme", "guess");
        assert!(matches!(
            tenants.validate_tenant_token(&wrong).await,
            Err(TenantTokenError::InvalidTenant)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tenant_and_garbage_are_rejected() {
        let (tenants, _) = authenticator();
        let token = SecretCodec::encode("ghost", "s3cret");
        assert!(matches!(
            tenants.validate_tenant_token(&token).await,
            Err(TenantTokenError::InvalidTenant)
        ));
        assert!(matches!(
            tenants.validate_tenant_token("%%%not-base64").await,
            Err(TenantTokenError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_onboarding_conflicts() {
        let (tenants, _) = authenticator();
        tenants.onboard("acme", "Acme").await.unwrap();
        assert!(matches!(
            tenants.onboard("acme", "Acme again").await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_tenant_no_longer_validates() {
        let (tenants, _) = authenticator();
        let onboarded = tenants.onboard("acme", "Acme").await.unwrap();
        tenants.delete("acme").await.unwrap();
        assert!(tenants.validate_tenant_token(&onboarded.token).await.is_err());
        assert!(matches!(
            tenants.delete("acme").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
