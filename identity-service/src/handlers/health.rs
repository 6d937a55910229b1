use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/v1/health/alive",
    responses((status = 200, description = "Process is up")),
    tag = "Observability"
)]
pub async fn alive() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// Readiness probe covering the database and the ephemeral store
#[utoipa::path(
    get,
    path = "/api/v1/health/status",
    responses(
        (status = 200, description = "All dependencies reachable"),
        (status = 503, description = "A dependency is unreachable")
    ),
    tag = "Observability"
)]
pub async fn status(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match state.repo.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "down"
        }
    };

    let store = match state.store.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Ephemeral store health check failed");
            "down"
        }
    };

    let healthy = database == "up" && store == "up";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": state.config.service_name,
            "version": state.config.service_version,
            "environment": format!("{:?}", state.config.environment),
            "checks": {
                "database": database,
                "store": store
            }
        })),
    )
}
