pub mod rbac;
pub mod tenant;

pub use rbac::{
    role_guard_middleware, AuthorizedCaller, AuthzError, RoleAuthorizer, RoleGuard,
    ACCESS_TOKEN_COOKIE,
};
pub use tenant::{tenant_resolver_middleware, RequestContext};
