//! Operator endpoints for replaying queued events and forcing a sync.

use crate::dtos::{PendingEventResponse, PendingEventsQuery, SubscriptionResponse};
use crate::services::Convergence;
use crate::startup::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// `GET /internal/webhooks/pending`
pub async fn list_pending_events(
    State(state): State<AppState>,
    Query(query): Query<PendingEventsQuery>,
) -> Result<Json<Vec<PendingEventResponse>>, AppError> {
    query.validate()?;

    let events = state
        .services
        .processor
        .list_pending(query.limit.unwrap_or(100))
        .await?;

    Ok(Json(events.into_iter().map(PendingEventResponse::from).collect()))
}

/// `POST /internal/webhooks/:event_id/process`
pub async fn process_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Convergence>, AppError> {
    Ok(Json(state.services.processor.process(&event_id).await?))
}

/// `POST /internal/tenants/:tenant_id/subscription/sync`
pub async fn sync_subscription(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state.services.sync.sync(tenant_id).await?;
    Ok(Json(SubscriptionResponse::from(subscription)))
}
