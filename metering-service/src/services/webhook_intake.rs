//! Webhook intake: verify, then durably queue each provider event once.

use crate::error::MeteringError;
use crate::models::NewWebhookEvent;
use crate::services::billing_provider::BillingProvider;
use crate::services::clock::Clock;
use crate::services::metrics::{record_error, record_webhook_event};
use crate::services::store::MeteringStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeReceipt {
    pub queued: bool,
    pub event_id: String,
    /// The event id was already queued by an earlier delivery.
    #[serde(skip)]
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct WebhookIntake {
    store: Arc<dyn MeteringStore>,
    provider: Arc<dyn BillingProvider>,
    clock: Arc<dyn Clock>,
}

impl WebhookIntake {
    pub fn new(
        store: Arc<dyn MeteringStore>,
        provider: Arc<dyn BillingProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
        }
    }

    #[instrument(skip(self, body, signature), fields(body_len = body.len(), event_id = tracing::field::Empty))]
    pub async fn intake(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IntakeReceipt, MeteringError> {
        if body.is_empty() {
            return Err(MeteringError::Validation("Webhook body is empty".to_string()));
        }
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MeteringError::Validation("Missing signature header".to_string()))?;

        let event = self
            .provider
            .verify_webhook(body, signature, self.clock.now())
            .inspect_err(|e| record_error(e.kind(), "webhook_intake"))?;

        let event_id = event.id.clone();
        let event_type = event.event_type.clone();
        tracing::Span::current().record("event_id", event_id.as_str());

        let inserted = self
            .store
            .insert_event_if_absent(&NewWebhookEvent::from(event))
            .await?;

        if inserted {
            record_webhook_event(&event_type, "queued");
            info!(event_id = %event_id, event_type = %event_type, "Webhook event queued");
        } else {
            record_webhook_event(&event_type, "duplicate");
            info!(event_id = %event_id, "Webhook event already queued");
        }

        Ok(IntakeReceipt {
            queued: true,
            event_id,
            duplicate: !inserted,
        })
    }
}
