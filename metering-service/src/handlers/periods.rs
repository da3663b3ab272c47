//! Period seeding endpoint.

use crate::dtos::MetricQuery;
use crate::middleware::TenantContext;
use crate::services::SeedResult;
use crate::startup::AppState;
use axum::extract::{Query, State};
use axum::Json;
use service_core::error::AppError;

/// `POST /v1/periods/seed`
pub async fn seed_period(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<MetricQuery>,
) -> Result<Json<SeedResult>, AppError> {
    let result = state
        .services
        .seeder
        .seed_metric(tenant.tenant_id, query.metric())
        .await?;

    Ok(Json(result))
}
