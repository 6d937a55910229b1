use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::SignedCookieJar;
use service_core::error::AppError;

use super::session::session_response;
use crate::{
    dtos::{
        auth::{ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
        ApiResponse,
    },
    middleware::RequestContext,
    models::{Credential, UserProfile},
    services::RegisterInput,
    utils::ValidatedJson,
    AppState,
};

/// Register with email, phone number and password
#[utoipa::path(
    post,
    path = "/api/v1/users/credentials",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = UserProfile),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "No tenant bound to the request", body = ErrorResponse),
        (status = 409, description = "Email or phone number already registered", body = ErrorResponse),
    ),
    tag = "Credentials",
    security(("tenant_token" = []))
)]
pub async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<Response, AppError> {
    let tenant_id = ctx.require_tenant()?;

    let user = state
        .auth_service
        .register(
            tenant_id,
            RegisterInput {
                name: req.name,
                email: req.email,
                phone_number: req.phone_number,
                password: req.password,
            },
        )
        .await?;

    let profile = state.auth_service.profile(user.id, tenant_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new("User registered", profile)),
    )
        .into_response())
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/api/v1/users/credentials/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; access cookie and refresh header set", body = SessionData),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Password sign-in disabled", body = ErrorResponse),
    ),
    tag = "Credentials",
    security(("tenant_token" = []))
)]
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: SignedCookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let tenant_id = ctx.require_tenant()?;

    let user = state
        .auth_service
        .authenticate(
            tenant_id,
            Credential::Password {
                email: req.email,
                password: req.password,
            },
        )
        .await?;

    let session = state.auth_service.issue_session(&user, tenant_id)?;
    session_response(&state, jar, session, "Login successful").await
}

/// Request a password reset link
///
/// Always answers success so callers cannot probe for registered emails.
#[utoipa::path(
    post,
    path = "/api/v1/users/credentials/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent if the account exists", body = MessageResponse),
        (status = 500, description = "Link created but delivery failed", body = ErrorResponse),
    ),
    tag = "Credentials"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.auth_service.forgot_password(&req.email).await?;
    Ok(Json(ApiResponse::message(
        "If the account exists, a reset link has been sent",
    )))
}

/// Set a new password using a reset token
#[utoipa::path(
    post,
    path = "/api/v1/users/credentials/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the emailed link")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 401, description = "Unknown, expired or used token", body = ErrorResponse),
    ),
    tag = "Credentials"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state
        .auth_service
        .reset_password(&token, req.password)
        .await?;
    Ok(Json(ApiResponse::message("Password updated")))
}
