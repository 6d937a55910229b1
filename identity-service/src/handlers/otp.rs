//! One-time passcode sign-in for phone and email targets.

use axum::{extract::State, response::Response, Json};
use axum_extra::extract::cookie::SignedCookieJar;
use service_core::error::AppError;

use super::session::session_response;
use crate::{
    dtos::{
        auth::{SendOtpRequest, VerifyOtpRequest},
        ApiResponse,
    },
    middleware::RequestContext,
    models::Credential,
    utils::ValidatedJson,
    AppState,
};

/// Send a one-time code by SMS or email
#[utoipa::path(
    post,
    path = "/api/v1/users/otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "Target is neither an email nor an E.164 number", body = ErrorResponse),
        (status = 403, description = "OTP sign-in disabled", body = ErrorResponse),
        (status = 500, description = "Code issued but delivery failed", body = ErrorResponse),
    ),
    tag = "OTP"
)]
pub async fn send(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendOtpRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.auth_service.send_otp(&req.target).await?;
    Ok(Json(ApiResponse::message("Code sent")))
}

/// Verify a one-time code and sign in
///
/// The first successful verification for an unseen target creates the account.
#[utoipa::path(
    post,
    path = "/api/v1/users/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionData),
        (status = 401, description = "Invalid credentials or no tenant bound", body = ErrorResponse),
    ),
    tag = "OTP",
    security(("tenant_token" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: SignedCookieJar,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Response, AppError> {
    let tenant_id = ctx.require_tenant()?;

    let user = state
        .auth_service
        .authenticate(
            tenant_id,
            Credential::Otp {
                target: req.target,
                code: req.code,
            },
        )
        .await?;

    let session = state.auth_service.issue_session(&user, tenant_id)?;
    session_response(&state, jar, session, "Code verified").await
}
