//! Usage recording and ledger history endpoints.

use crate::dtos::{ListUsageQuery, RecordUsageRequest, UsageRecordResponse};
use crate::middleware::TenantContext;
use crate::models::DEFAULT_METRIC;
use crate::services::{RecordUsage, UsageResult};
use crate::startup::AppState;
use axum::extract::{Query, State};
use axum::Json;
use service_core::error::AppError;
use validator::Validate;

/// `POST /v1/usage`
pub async fn record_usage(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<RecordUsageRequest>,
) -> Result<Json<UsageResult>, AppError> {
    payload.validate()?;

    let result = state
        .services
        .recorder
        .record(RecordUsage {
            tenant_id: tenant.tenant_id,
            metric: payload.metric.unwrap_or_else(|| DEFAULT_METRIC.to_string()),
            value: payload.value,
            occurred_at: payload.occurred_at,
            idempotency_key: payload.request_id,
            metadata: payload.metadata,
        })
        .await?;

    Ok(Json(result))
}

/// `GET /v1/usage/records`
pub async fn list_usage_records(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListUsageQuery>,
) -> Result<Json<Vec<UsageRecordResponse>>, AppError> {
    query.validate()?;

    let records = state
        .services
        .recorder
        .list_records(tenant.tenant_id, &query.into())
        .await?;

    Ok(Json(records.into_iter().map(UsageRecordResponse::from).collect()))
}
