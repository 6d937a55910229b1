use axum::{extract::State, response::Response, Json};
use axum_extra::extract::cookie::SignedCookieJar;
use service_core::error::AppError;

use super::session::session_response;
use crate::{
    dtos::{
        auth::{SendMagicLinkRequest, VerifyMagicLinkRequest},
        ApiResponse,
    },
    middleware::RequestContext,
    models::Credential,
    utils::ValidatedJson,
    AppState,
};

/// Email a sign-in link
#[utoipa::path(
    post,
    path = "/api/v1/users/magic-link/send",
    request_body = SendMagicLinkRequest,
    responses(
        (status = 200, description = "Link sent", body = MessageResponse),
        (status = 403, description = "Magic-link sign-in disabled", body = ErrorResponse),
        (status = 500, description = "Link created but delivery failed", body = ErrorResponse),
    ),
    tag = "Magic Link"
)]
pub async fn send(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendMagicLinkRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.auth_service.send_magic_link(&req.email).await?;
    Ok(Json(ApiResponse::message("Sign-in link sent")))
}

/// Sign in with a magic-link token
#[utoipa::path(
    post,
    path = "/api/v1/users/magic-link/verify",
    request_body = VerifyMagicLinkRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionData),
        (status = 401, description = "Unknown, expired or used link", body = ErrorResponse),
    ),
    tag = "Magic Link",
    security(("tenant_token" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: SignedCookieJar,
    ValidatedJson(req): ValidatedJson<VerifyMagicLinkRequest>,
) -> Result<Response, AppError> {
    let tenant_id = ctx.require_tenant()?;

    let user = state
        .auth_service
        .authenticate(tenant_id, Credential::MagicLink { token: req.token })
        .await?;

    let session = state.auth_service.issue_session(&user, tenant_id)?;
    session_response(&state, jar, session, "Signed in").await
}
