use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AuthToken, AuthTokenType, DepartmentRole, Tenant, User};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Repository error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Durable state consumed by the credential engine.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_tenant(&self, id: &str) -> Result<Option<Tenant>, RepositoryError>;

    /// Fails with `Conflict` when the id is taken.
    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), RepositoryError>;

    /// Removes the tenant and its role bindings. Returns whether it existed.
    async fn delete_tenant(&self, id: &str) -> Result<bool, RepositoryError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError>;

    /// Fails with `Conflict` when the email or phone number is taken.
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError>;

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError>;

    async fn find_role(
        &self,
        tenant_id: &str,
        user_id: Uuid,
    ) -> Result<Option<DepartmentRole>, RepositoryError>;

    async fn upsert_role(&self, role: &DepartmentRole) -> Result<(), RepositoryError>;

    async fn create_auth_token(&self, token: &AuthToken) -> Result<(), RepositoryError>;

    /// Soft-deleted tokens are never returned.
    async fn find_auth_token(
        &self,
        token: &str,
        token_type: AuthTokenType,
    ) -> Result<Option<AuthToken>, RepositoryError>;

    /// Soft-deletes a live token. Returns `false` when it was already consumed,
    /// so concurrent redeemers see exactly one success.
    async fn consume_auth_token(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn health_check(&self) -> Result<(), RepositoryError>;
}

pub type SharedRepository = Arc<dyn IdentityRepository>;

#[derive(Default)]
struct Tables {
    tenants: HashMap<String, Tenant>,
    users: HashMap<Uuid, User>,
    roles: HashMap<(String, Uuid), DepartmentRole>,
    auth_tokens: HashMap<Uuid, AuthToken>,
}

impl Tables {
    fn identity_taken(&self, user: &User) -> Option<&'static str> {
        self.users.values().filter(|u| u.id != user.id).find_map(|u| {
            if user.email.is_some() && u.email == user.email {
                Some("Email already registered")
            } else if user.phone_number.is_some() && u.phone_number == user.phone_number {
                Some("Phone number already registered")
            } else {
                None
            }
        })
    }
}

/// Process-local repository for development and tests.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityRepository for InMemoryRepository {
    async fn find_tenant(&self, id: &str) -> Result<Option<Tenant>, RepositoryError> {
        Ok(self.tables().tenants.get(id).cloned())
    }

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        if tables.tenants.contains_key(&tenant.id) {
            return Err(RepositoryError::Conflict(
                "Tenant already exists".to_string(),
            ));
        }
        tables.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut tables = self.tables();
        let existed = tables.tenants.remove(id).is_some();
        tables.roles.retain(|(tenant_id, _), _| tenant_id != id);
        Ok(existed)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.phone_number.as_deref() == Some(phone))
            .cloned())
    }

    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        if let Some(reason) = tables.identity_taken(user) {
            return Err(RepositoryError::Conflict(reason.to_string()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&user.id) {
            return Err(RepositoryError::Internal(anyhow::anyhow!(
                "User {} does not exist",
                user.id
            )));
        }
        if let Some(reason) = tables.identity_taken(user) {
            return Err(RepositoryError::Conflict(reason.to_string()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_role(
        &self,
        tenant_id: &str,
        user_id: Uuid,
    ) -> Result<Option<DepartmentRole>, RepositoryError> {
        Ok(self
            .tables()
            .roles
            .get(&(tenant_id.to_string(), user_id))
            .cloned())
    }

    async fn upsert_role(&self, role: &DepartmentRole) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        let key = (role.tenant_id.clone(), role.user_id);
        let mut binding = role.clone();
        if let Some(existing) = tables.roles.get(&key) {
            binding.created_utc = existing.created_utc;
        }
        tables.roles.insert(key, binding);
        Ok(())
    }

    async fn create_auth_token(&self, token: &AuthToken) -> Result<(), RepositoryError> {
        self.tables().auth_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_auth_token(
        &self,
        token: &str,
        token_type: AuthTokenType,
    ) -> Result<Option<AuthToken>, RepositoryError> {
        Ok(self
            .tables()
            .auth_tokens
            .values()
            .find(|t| t.token == token && t.token_type == token_type && !t.is_consumed())
            .cloned())
    }

    async fn consume_auth_token(&self, id: Uuid) -> Result<bool, RepositoryError> {
        match self.tables().auth_tokens.get_mut(&id) {
            Some(token) if token.deleted_utc.is_none() => {
                token.deleted_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
