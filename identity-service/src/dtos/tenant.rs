use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OnboardTenantRequest {
    #[validate(
        length(min = 1, max = 64, message = "Tenant id must be 1 to 64 characters"),
        custom(function = "crate::utils::validation::validate_tenant_id")
    )]
    #[schema(example = "acme")]
    pub id: String,

    #[validate(length(min = 1, max = 128, message = "Name is required"))]
    #[schema(example = "Acme Corp")]
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantData {
    #[schema(example = "acme")]
    pub tenant_id: String,
    #[schema(example = "Acme Corp")]
    pub name: String,
    /// Basic-auth token for `Authorization: Bearer`. Returned only once.
    #[schema(example = "YWNtZTpzM2NyZXQ=")]
    pub token: String,
}
