//! Tenant-scoped role enforcement for protected routes.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use super::tenant::RequestContext;
use crate::models::Role;
use crate::services::{
    AccessClaims, RepositoryError, ServiceError, SharedRepository, TokenError, TokenIssuer,
};

/// Name of the signed cookie holding the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "access-token";

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("No access token presented")]
    Unauthenticated,

    #[error("Access token is invalid")]
    InvalidToken,

    #[error("Access token has expired")]
    Expired,

    #[error("Access token lacks user or tenant")]
    MissingClaims,

    #[error("User has no role in this tenant")]
    RoleNotFound,

    #[error("Role {role} is not allowed here")]
    Forbidden { role: Role },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TokenError> for AuthzError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthzError::Expired,
            _ => AuthzError::InvalidToken,
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthenticated => {
                ServiceError::Unauthenticated("Authentication required".to_string())
            }
            AuthzError::InvalidToken | AuthzError::MissingClaims => ServiceError::InvalidSignature,
            AuthzError::Expired => ServiceError::TokenExpired,
            AuthzError::RoleNotFound => {
                ServiceError::Forbidden("No role in this tenant".to_string())
            }
            AuthzError::Forbidden { role } => {
                ServiceError::Forbidden(format!("Role {} is not allowed", role))
            }
            AuthzError::Repository(e) => e.into(),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        ServiceError::from(err).into()
    }
}

/// Identity of a caller that passed the role guard.
#[derive(Debug, Clone)]
pub struct AuthorizedCaller {
    pub user_id: Uuid,
    pub tenant_id: String,
    pub role: Role,
    pub claims: AccessClaims,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthorizedCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthorizedCaller>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}

#[derive(Clone)]
pub struct RoleAuthorizer {
    tokens: TokenIssuer,
    repo: SharedRepository,
}

impl RoleAuthorizer {
    pub fn new(tokens: TokenIssuer, repo: SharedRepository) -> Self {
        Self { tokens, repo }
    }

    /// Walks token presence, signature, expiry, claims and role resolution in
    /// order, then checks the role against `allowed`.
    pub async fn authorize(
        &self,
        token: Option<&str>,
        allowed: &[Role],
    ) -> Result<AuthorizedCaller, AuthzError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AuthzError::Unauthenticated)?;

        let claims = self.tokens.parse_access(token)?;
        self.tokens.check_expiry(claims.exp)?;

        if claims.id.is_nil() || claims.tenant_id.is_empty() {
            return Err(AuthzError::MissingClaims);
        }

        let binding = self
            .repo
            .find_role(&claims.tenant_id, claims.id)
            .await?
            .ok_or(AuthzError::RoleNotFound)?;

        if !allowed.contains(&binding.role) {
            return Err(AuthzError::Forbidden { role: binding.role });
        }

        Ok(AuthorizedCaller {
            user_id: claims.id,
            tenant_id: claims.tenant_id.clone(),
            role: binding.role,
            claims,
        })
    }
}

/// Route-layer state: who may pass and how to read the signed cookie.
#[derive(Clone)]
pub struct RoleGuard {
    authorizer: RoleAuthorizer,
    key: Key,
    allowed: &'static [Role],
}

impl RoleGuard {
    pub fn new(authorizer: RoleAuthorizer, key: Key, allowed: &'static [Role]) -> Self {
        Self {
            authorizer,
            key,
            allowed,
        }
    }
}

pub async fn role_guard_middleware(
    State(guard): State<RoleGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // A cookie whose signature does not verify reads as absent.
    let jar = SignedCookieJar::from_headers(request.headers(), guard.key.clone());
    let token = jar
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string());

    let caller = guard
        .authorizer
        .authorize(token.as_deref(), guard.allowed)
        .await
        .map_err(|e| {
            match &e {
                AuthzError::Repository(inner) => {
                    tracing::error!(error = %inner, "Role lookup failed")
                }
                other => tracing::info!(reason = %other, "Request not authorized"),
            }
            AppError::from(e)
        })?;

    let mut context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    context.user_id = Some(caller.user_id);
    context.role = Some(caller.role);

    tracing::debug!(
        user_id = %caller.user_id,
        tenant_id = %caller.tenant_id,
        role = %caller.role,
        "Caller authorized"
    );

    request.extensions_mut().insert(context);
    request.extensions_mut().insert(caller);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DepartmentRole, User};
    use crate::services::InMemoryRepository;
    use crate::utils::ManualClock;
    use chrono::Duration;
    use std::sync::Arc;

    struct Fixture {
        authorizer: RoleAuthorizer,
        tokens: TokenIssuer,
        repo: SharedRepository,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let tokens = TokenIssuer::new(
            b"access-secret",
            Duration::hours(1),
            b"refresh-secret",
            Duration::hours(24),
            Arc::new(clock.clone()),
        );
        let repo: SharedRepository = Arc::new(InMemoryRepository::new());
        Fixture {
            authorizer: RoleAuthorizer::new(tokens.clone(), repo.clone()),
            tokens,
            repo,
            clock,
        }
    }

    async fn member(f: &Fixture, role: Role) -> (User, String) {
        let user = User::new("Jane".to_string(), Some("jane@example.com".to_string()), None);
        f.repo
            .upsert_role(&DepartmentRole::new("acme".to_string(), user.id, role))
            .await
            .unwrap();
        let token = f.tokens.issue_access(&user, "acme").unwrap();
        (user, token)
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthenticated() {
        let f = fixture();
        assert!(matches!(
            f.authorizer.authorize(None, &[Role::User]).await,
            Err(AuthzError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_is_invalid() {
        let f = fixture();
        assert!(matches!(
            f.authorizer.authorize(Some("a.b.c"), &[Role::User]).await,
            Err(AuthzError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_distinct() {
        let f = fixture();
        let (_, token) = member(&f, Role::User).await;
        f.clock.advance(Duration::hours(1));
        assert!(matches!(
            f.authorizer.authorize(Some(&token), &[Role::User]).await,
            Err(AuthzError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_user_without_role_is_rejected() {
        let f = fixture();
        let stranger = User::new("Sam".to_string(), Some("sam@example.com".to_string()), None);
        let token = f.tokens.issue_access(&stranger, "acme").unwrap();
        assert!(matches!(
            f.authorizer.authorize(Some(&token), &[Role::User]).await,
            Err(AuthzError::RoleNotFound)
        ));
    }

    #[tokio::test]
    async fn test_role_outside_allow_list_is_forbidden() {
        let f = fixture();
        let (_, token) = member(&f, Role::User).await;
        assert!(matches!(
            f.authorizer.authorize(Some(&token), &[Role::Admin]).await,
            Err(AuthzError::Forbidden { role: Role::User })
        ));
    }

    #[tokio::test]
    async fn test_allowed_role_passes_with_resolved_identity() {
        let f = fixture();
        let (user, token) = member(&f, Role::Admin).await;
        let caller = f
            .authorizer
            .authorize(Some(&token), &[Role::User, Role::Admin])
            .await
            .unwrap();
        assert_eq!(caller.user_id, user.id);
        assert_eq!(caller.tenant_id, "acme");
        assert_eq!(caller.role, Role::Admin);
    }

    #[test]
    fn test_http_mapping_separates_expired_from_forbidden() {
        use service_core::error::ErrorCode;
        assert!(matches!(AppError::from(AuthzError::Expired), AppError::TokenExpired));
        assert_eq!(
            AppError::from(AuthzError::Forbidden { role: Role::User }).code(),
            ErrorCode::Forbidden
        );
        assert_eq!(
            AppError::from(AuthzError::Unauthenticated).code(),
            ErrorCode::Unauthorized
        );
    }
}
