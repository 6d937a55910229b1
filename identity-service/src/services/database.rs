//! PostgreSQL implementation of the identity repository.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use super::repository::{IdentityRepository, RepositoryError};
use crate::config::DatabaseConfig;
use crate::models::{AuthToken, AuthTokenType, DepartmentRole, Tenant, User};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        tracing::info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(config.url.expose_secret())
            .await?;

        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }
}

fn map_write_error(err: sqlx::Error, conflict: &str) -> RepositoryError {
    let is_unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if is_unique_violation {
        RepositoryError::Conflict(conflict.to_string())
    } else {
        RepositoryError::Database(err)
    }
}

#[async_trait]
impl IdentityRepository for PgRepository {
    async fn find_tenant(&self, id: &str) -> Result<Option<Tenant>, RepositoryError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_tenant(&self, tenant: &Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, secret_hash, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.secret_hash)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Tenant already exists"))?;
        Ok(())
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool, RepositoryError> {
        // Role bindings go with the tenant through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone_number = $1")
                .bind(phone)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, phone_number, password_hash, email_verified, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.password_hash)
        .bind(user.email_verified)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Email or phone number already registered"))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE users
            SET name = $2, email = $3, phone_number = $4, password_hash = $5,
                email_verified = $6, updated_utc = $7
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.password_hash)
        .bind(user.email_verified)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Email or phone number already registered"))?;
        Ok(())
    }

    async fn find_role(
        &self,
        tenant_id: &str,
        user_id: Uuid,
    ) -> Result<Option<DepartmentRole>, RepositoryError> {
        Ok(sqlx::query_as::<_, DepartmentRole>(
            "SELECT * FROM department_roles WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_role(&self, role: &DepartmentRole) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO department_roles (tenant_id, user_id, role, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, user_id)
            DO UPDATE SET role = EXCLUDED.role, updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(&role.tenant_id)
        .bind(role.user_id)
        .bind(role.role.as_str())
        .bind(role.created_utc)
        .bind(role.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_auth_token(&self, token: &AuthToken) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (id, user_id, token, token_type, expires_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.token_type.as_str())
        .bind(token.expires_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "Auth token collision"))?;
        Ok(())
    }

    async fn find_auth_token(
        &self,
        token: &str,
        token_type: AuthTokenType,
    ) -> Result<Option<AuthToken>, RepositoryError> {
        Ok(sqlx::query_as::<_, AuthToken>(
            r#"
            SELECT * FROM auth_tokens
            WHERE token = $1 AND token_type = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(token)
        .bind(token_type.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn consume_auth_token(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE auth_tokens SET deleted_utc = NOW() WHERE id = $1 AND deleted_utc IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Database health check failed");
            RepositoryError::Database(e)
        })?;
        Ok(())
    }
}
