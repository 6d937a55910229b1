//! Request context and the tenant-resolving middleware.
//!
//! Runs on every request. Assigns a correlation id, and when an
//! `Authorization: Bearer <token>` header carries a valid tenant token, binds
//! the tenant id to the request. An invalid token is logged and ignored.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use service_core::middleware::tracing::{echo_trace_id, resolve_trace_id, TRACE_ID_HEADER};
use uuid::Uuid;

use crate::models::Role;
use crate::services::{ServiceError, TenantAuthenticator};

/// Request-scoped identity, carried once per request in the extensions.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub tenant_id: Option<String>,
    /// Set by the role guard once the caller is authorized.
    pub user_id: Option<Uuid>,
    pub role: Option<Role>,
}

impl RequestContext {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            ..Default::default()
        }
    }

    /// Tokens can only be issued for a request with a bound tenant.
    pub fn require_tenant(&self) -> Result<&str, ServiceError> {
        self.tenant_id.as_deref().ok_or_else(|| {
            ServiceError::Unauthenticated("A valid tenant token is required".to_string())
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::new(resolve_trace_id(&parts.headers))))
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn tenant_resolver_middleware(
    State(tenants): State<TenantAuthenticator>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = resolve_trace_id(request.headers());

    // TraceLayer runs inside this middleware and reads the id from the header.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(TRACE_ID_HEADER, value);
    }

    let mut context = RequestContext::new(request_id.clone());

    if let Some(token) = bearer_token(&request).map(str::to_string) {
        match tenants.validate_tenant_token(&token).await {
            Ok(tenant_id) => {
                tracing::debug!(request_id = %request_id, tenant_id = %tenant_id, "Tenant bound");
                context.tenant_id = Some(tenant_id);
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Tenant token rejected");
            }
        }
    }

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    echo_trace_id(&mut response, &request_id);
    response
}
