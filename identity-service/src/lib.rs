pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    body::Body,
    extract::FromRef,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::Key;
use secrecy::ExposeSecret;
use service_core::error::{AppError, RATE_LIMIT_REMAINING_HEADER};
use service_core::middleware::rate_limit::{
    rate_limit_middleware, AdmissionControl, SharedRateLimiter,
};
use service_core::middleware::tracing::{http_span, TRACE_ID_HEADER};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, IdentityConfig};
use crate::handlers::REFRESH_TOKEN_HEADER;
use crate::middleware::{
    role_guard_middleware, tenant_resolver_middleware, RoleAuthorizer, RoleGuard,
    ACCESS_TOKEN_COOKIE,
};
use crate::models::Role;
use crate::services::otp::CodeGenerator;
use crate::services::{
    AuthService, AuthSettings, EphemeralStore, OtpStore, SharedNotifier, SharedRepository,
    TenantAuthenticator, TokenIssuer,
};
use crate::utils::{PasswordHasher, SharedClock};

const ADMIN_ONLY: &[Role] = &[Role::Admin];
const ANY_MEMBER: &[Role] = &[Role::User, Role::Admin];

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::alive,
        handlers::health::status,
        handlers::tenant::onboard,
        handlers::tenant::delete,
        handlers::credentials::register,
        handlers::credentials::login,
        handlers::credentials::forgot_password,
        handlers::credentials::reset_password,
        handlers::otp::send,
        handlers::otp::verify,
        handlers::email::send_verification,
        handlers::email::verify,
        handlers::magic_link::send,
        handlers::magic_link::verify,
        handlers::session::refresh,
        handlers::session::me,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::tenant::OnboardTenantRequest,
            dtos::tenant::TenantData,
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::ForgotPasswordRequest,
            dtos::auth::ResetPasswordRequest,
            dtos::auth::SendOtpRequest,
            dtos::auth::VerifyOtpRequest,
            dtos::auth::SendEmailVerificationRequest,
            dtos::auth::VerifyEmailRequest,
            dtos::auth::SendMagicLinkRequest,
            dtos::auth::VerifyMagicLinkRequest,
            dtos::auth::SessionData,
            models::UserProfile,
            models::Role,
            models::AuthMethod,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Tenants", description = "Tenant onboarding and deletion"),
        (name = "Credentials", description = "Password registration, sign-in and reset"),
        (name = "OTP", description = "One-time passcode sign-in"),
        (name = "Email", description = "Email verification"),
        (name = "Magic Link", description = "Passwordless email links"),
        (name = "Session", description = "Access and refresh tokens"),
        (name = "User", description = "Signed-in user"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "tenant_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("base64(tenantId:secret) from tenant onboarding"))
                        .build(),
                ),
            );
            components.add_security_scheme(
                "access_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(ACCESS_TOKEN_COOKIE))),
            );
        }
    }
}

/// Collaborators the engine is built on. Swapped for in-memory versions in tests.
pub struct Collaborators {
    pub repo: SharedRepository,
    pub store: Arc<dyn EphemeralStore>,
    pub notifier: SharedNotifier,
    pub rate_limiter: SharedRateLimiter,
    pub clock: SharedClock,
    /// Overrides random OTP generation.
    pub code_generator: Option<CodeGenerator>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdentityConfig>,
    pub repo: SharedRepository,
    pub store: Arc<dyn EphemeralStore>,
    pub tenants: TenantAuthenticator,
    pub auth_service: AuthService,
    pub authorizer: RoleAuthorizer,
    pub rate_limiter: SharedRateLimiter,
    pub cookie_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl AppState {
    pub fn new(config: Arc<IdentityConfig>, deps: Collaborators) -> Result<Self, AppError> {
        let cookie_key = Key::try_from(config.cookie.key.expose_secret().as_bytes())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid COOKIE_KEY: {}", e)))?;

        let hasher = PasswordHasher::new(config.credentials.bcrypt_cost);
        let tokens = TokenIssuer::from_config(&config.jwt, deps.clock.clone());

        let mut otp = OtpStore::new(
            deps.store.clone(),
            config.otp_ttl(),
            config.credentials.otp_policy,
        );
        if let Some(generator) = deps.code_generator {
            otp = otp.with_generator(generator);
        }

        let tenants = TenantAuthenticator::new(deps.repo.clone(), hasher);
        let authorizer = RoleAuthorizer::new(tokens.clone(), deps.repo.clone());
        let auth_service = AuthService::new(
            deps.repo.clone(),
            otp,
            tokens,
            hasher,
            deps.notifier,
            deps.clock,
            AuthSettings::from_config(&config),
        );

        tracing::info!(
            methods = ?config.credentials.auth_methods,
            otp_single_use = config.credentials.otp_policy.is_single_use(),
            auth_token_single_use = config.credentials.auth_token_policy.is_single_use(),
            "Credential engine initialized"
        );

        Ok(Self {
            config,
            repo: deps.repo,
            store: deps.store,
            tenants,
            auth_service,
            authorizer,
            rate_limiter: deps.rate_limiter,
            cookie_key,
        })
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REFRESH_TOKEN_HEADER),
        ])
        .expose_headers([
            header::AUTHORIZATION,
            header::RETRY_AFTER,
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REFRESH_TOKEN_HEADER),
            HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
        ]);

    // Credentialed CORS cannot be combined with a wildcard origin.
    if allowed_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    base.allow_origin(origins).allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/tenants/:id", delete(handlers::tenant::delete))
        .route_layer(from_fn_with_state(
            RoleGuard::new(state.authorizer.clone(), state.cookie_key.clone(), ADMIN_ONLY),
            role_guard_middleware,
        ));

    let member_routes = Router::new()
        .route("/users/me", get(handlers::session::me))
        .route_layer(from_fn_with_state(
            RoleGuard::new(state.authorizer.clone(), state.cookie_key.clone(), ANY_MEMBER),
            role_guard_middleware,
        ));

    let api = Router::new()
        .route("/health/alive", get(handlers::health::alive))
        .route("/health/status", get(handlers::health::status))
        .route("/tenants", post(handlers::tenant::onboard))
        .route("/users/credentials", post(handlers::credentials::register))
        .route("/users/credentials/login", post(handlers::credentials::login))
        .route(
            "/users/credentials/forgot-password",
            post(handlers::credentials::forgot_password),
        )
        .route(
            "/users/credentials/reset-password/:token",
            post(handlers::credentials::reset_password),
        )
        .route("/users/otp/send", post(handlers::otp::send))
        .route("/users/otp/verify", post(handlers::otp::verify))
        .route(
            "/users/email/verify/send",
            post(handlers::email::send_verification),
        )
        .route("/users/email/verify", post(handlers::email::verify))
        .route("/users/magic-link/send", post(handlers::magic_link::send))
        .route("/users/magic-link/verify", post(handlers::magic_link::verify))
        .route("/users/token/refresh", post(handlers::session::refresh))
        .merge(admin_routes)
        .merge(member_routes);

    let mut app = Router::new().nest("/api/v1", api);

    if state.config.environment == Environment::Dev {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    // Layers run outermost-last: CORS, tenant resolution, trace span, admission.
    app.with_state(state.clone())
        .layer(from_fn_with_state(
            AdmissionControl::new(
                state.rate_limiter.clone(),
                state.config.security.trusted_proxies.clone(),
            ),
            rate_limit_middleware,
        ))
        .layer(TimeoutLayer::new(state.config.common.http_timeout()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| http_span(request)),
        )
        .layer(from_fn_with_state(
            state.tenants.clone(),
            tenant_resolver_middleware,
        ))
        .layer(cors_layer(&state.config.security.allowed_origins))
}
