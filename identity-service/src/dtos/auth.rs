use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::UserProfile;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 128, message = "Name is required"))]
    #[schema(example = "Jane Doe")]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "jane@example.com")]
    pub email: String,

    #[validate(custom(function = "crate::utils::validation::validate_e164"))]
    #[schema(example = "+15551234567")]
    pub phone_number: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "password123", min_length = 8)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "jane@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "jane@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "newpassword123", min_length = 8)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendOtpRequest {
    /// Email address or E.164 phone number.
    #[validate(length(min = 1, message = "Target is required"))]
    #[schema(example = "+15551234567")]
    pub target: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 1, message = "Target is required"))]
    #[schema(example = "+15551234567")]
    pub target: String,

    #[validate(length(equal = 4, message = "Code must be 4 digits"))]
    #[schema(example = "4821")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendEmailVerificationRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "jane@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyEmailRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "jane@example.com")]
    pub email: String,

    #[validate(length(equal = 4, message = "Code must be 4 digits"))]
    #[schema(example = "4821")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendMagicLinkRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "jane@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyMagicLinkRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "Zm9vYmFyYmF6...")]
    pub token: String,
}

/// Returned on sign-in. The access token travels in the `access-token`
/// cookie and the refresh token in the `X-Refresh-Token` header.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: UserProfile,
    #[schema(example = "acme")]
    pub tenant_id: String,
    /// Access token lifetime in seconds.
    #[schema(example = 3600)]
    pub expires_in: i64,
}
