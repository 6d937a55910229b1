use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{SendEmailVerificationRequest, VerifyEmailRequest},
        ApiResponse,
    },
    models::UserProfile,
    utils::ValidatedJson,
    AppState,
};

/// Send an email verification code
#[utoipa::path(
    post,
    path = "/api/v1/users/email/verify/send",
    request_body = SendEmailVerificationRequest,
    responses(
        (status = 200, description = "Verification code sent", body = MessageResponse),
        (status = 404, description = "No account for this email", body = ErrorResponse),
        (status = 500, description = "Code issued but delivery failed", body = ErrorResponse),
    ),
    tag = "Email"
)]
pub async fn send_verification(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendEmailVerificationRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.auth_service.send_email_verification(&req.email).await?;
    Ok(Json(ApiResponse::message("Verification code sent")))
}

/// Confirm an email address with the emailed code
#[utoipa::path(
    post,
    path = "/api/v1/users/email/verify",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = UserProfile),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
    ),
    tag = "Email"
)]
pub async fn verify(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    let user = state.auth_service.verify_email(&req.email, &req.code).await?;
    Ok(Json(ApiResponse::new("Email verified", user.profile(None))))
}
