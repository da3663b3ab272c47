//! Billing provider webhook endpoint.

use crate::dtos::WebhookAck;
use crate::startup::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use service_core::error::AppError;

pub const SIGNATURE_HEADER: &str = "Billing-Signature";

/// `POST /webhooks/billing`
///
/// Queues the event, then attempts convergence inline. A failed attempt
/// leaves the event queued and still acknowledges the delivery.
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let receipt = state.services.intake.intake(&body, signature).await?;

    let converged = match state.services.processor.process(&receipt.event_id).await {
        Ok(outcome) => outcome.converged,
        Err(e) => {
            tracing::warn!(
                event_id = %receipt.event_id,
                error = %e,
                "Inline convergence failed, event left queued"
            );
            false
        }
    };

    Ok(Json(WebhookAck {
        queued: receipt.queued,
        event_id: receipt.event_id,
        converged,
    }))
}
