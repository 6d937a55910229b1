use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use service_core::error::AppError;

use crate::{
    dtos::{auth::SessionData, ApiResponse},
    middleware::{AuthorizedCaller, RequestContext, ACCESS_TOKEN_COOKIE},
    models::UserProfile,
    services::Session,
    AppState,
};

/// Response header carrying the refresh token on sign-in and refresh.
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// Sets the signed access cookie and the refresh header around a session body.
pub(crate) async fn session_response(
    state: &AppState,
    jar: SignedCookieJar,
    session: Session,
    message: &str,
) -> Result<Response, AppError> {
    let expires_in = state.auth_service.tokens().access_ttl().num_seconds();

    let cookie = Cookie::build((ACCESS_TOKEN_COOKIE, session.access_token.clone()))
        .http_only(true)
        .secure(true)
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(expires_in))
        .build();

    let refresh = HeaderValue::from_str(&session.refresh_token)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid refresh header: {}", e)))?;

    let user = state
        .auth_service
        .profile(session.user.id, &session.tenant_id)
        .await?;

    let body = ApiResponse::new(
        message,
        SessionData {
            user,
            tenant_id: session.tenant_id,
            expires_in,
        },
    );

    Ok((
        StatusCode::OK,
        jar.add(cookie),
        [(REFRESH_TOKEN_HEADER, refresh)],
        Json(body),
    )
        .into_response())
}

/// Exchange a refresh token for a new session
#[utoipa::path(
    post,
    path = "/api/v1/users/token/refresh",
    params(
        ("X-Refresh-Token" = String, Header, description = "Refresh token issued at sign-in")
    ),
    responses(
        (status = 200, description = "Session renewed", body = SessionData),
        (status = 401, description = "Missing, invalid or expired refresh token", body = ErrorResponse),
    ),
    tag = "Session",
    security(("tenant_token" = []))
)]
pub async fn refresh(
    State(state): State<AppState>,
    ctx: RequestContext,
    jar: SignedCookieJar,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let tenant_id = ctx.require_tenant()?;

    let refresh_token = headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Refresh token is required")))?;

    let session = state.auth_service.refresh(tenant_id, refresh_token).await?;
    session_response(&state, jar, session, "Session refreshed").await
}

/// Current user's profile and role in the tenant
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Profile of the signed-in user", body = UserProfile),
        (status = 401, description = "Not signed in or token expired", body = ErrorResponse),
        (status = 403, description = "No role in this tenant", body = ErrorResponse),
    ),
    tag = "User",
    security(("access_cookie" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
) -> Result<Json<ApiResponse<UserProfile>>, AppError> {
    let profile = state
        .auth_service
        .profile(caller.user_id, &caller.tenant_id)
        .await?;
    Ok(Json(ApiResponse::new("Profile retrieved", profile)))
}
