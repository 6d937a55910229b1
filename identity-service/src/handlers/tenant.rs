use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        tenant::{OnboardTenantRequest, TenantData},
        ApiResponse,
    },
    middleware::AuthorizedCaller,
    utils::ValidatedJson,
    AppState,
};

/// Onboard a tenant
///
/// The generated tenant token is returned once, in the body and as an
/// `Authorization: Bearer` header. Only a hash of its secret is kept.
#[utoipa::path(
    post,
    path = "/api/v1/tenants",
    request_body = OnboardTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = TenantData),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Tenant already exists", body = ErrorResponse),
    ),
    tag = "Tenants"
)]
pub async fn onboard(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<OnboardTenantRequest>,
) -> Result<Response, AppError> {
    let onboarded = state.tenants.onboard(&req.id, &req.name).await?;

    let authorization = HeaderValue::from_str(&format!("Bearer {}", onboarded.token))
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid token header: {}", e)))?;

    let body = ApiResponse::new(
        "Tenant created",
        TenantData {
            tenant_id: onboarded.tenant_id,
            name: onboarded.name,
            token: onboarded.token,
        },
    );

    Ok((
        StatusCode::CREATED,
        [(header::AUTHORIZATION, authorization)],
        Json(body),
    )
        .into_response())
}

/// Delete a tenant and its role bindings
///
/// Admins may only delete the tenant their session belongs to.
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{id}",
    params(("id" = String, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant deleted"),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin of this tenant", body = ErrorResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse),
    ),
    tag = "Tenants",
    security(("access_cookie" = []))
)]
pub async fn delete(
    State(state): State<AppState>,
    caller: AuthorizedCaller,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    if caller.tenant_id != id {
        tracing::warn!(
            user_id = %caller.user_id,
            tenant_id = %caller.tenant_id,
            target_tenant = %id,
            "Cross-tenant delete refused"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Admins can only delete their own tenant"
        )));
    }

    state.tenants.delete(&id).await?;
    Ok(Json(ApiResponse::message("Tenant deleted")))
}
