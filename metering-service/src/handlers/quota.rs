//! Quota and entitlement endpoints.

use crate::dtos::{MetricQuery, QuotaResponse};
use crate::middleware::TenantContext;
use crate::services::{Entitlement, QuotaDecision};
use crate::startup::AppState;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use service_core::error::AppError;

/// `GET /v1/quota`. A denial is a 429 carrying `Retry-After`, never an error body.
pub async fn check_quota(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<MetricQuery>,
) -> Result<Response, AppError> {
    let decision = state
        .services
        .quota
        .check(tenant.tenant_id, query.metric())
        .await?;

    let body = Json(QuotaResponse {
        allow: decision.allow(),
        remaining: decision.remaining(),
    });

    Ok(match decision {
        QuotaDecision::Allowed { .. } => (StatusCode::OK, body).into_response(),
        QuotaDecision::Exceeded { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            body,
        )
            .into_response(),
    })
}

/// `GET /v1/entitlement`
pub async fn get_entitlement(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<MetricQuery>,
) -> Result<Json<Entitlement>, AppError> {
    let entitlement = state
        .services
        .quota
        .entitlement(tenant.tenant_id, query.metric())
        .await?;

    Ok(Json(entitlement))
}
