//! Webhook convergence: apply queued provider events to local subscription
//! state, at most once per event.
//!
//! An event moves `queued -> converged` only after its handler succeeded.
//! A failing handler leaves it queued, so the same `process` call can be
//! replayed later with identical semantics. Concurrent calls for one event
//! are serialized by a store lease; only the holder runs the handler.

use crate::error::MeteringError;
use crate::models::{BillingEvent, ProviderSubscriptionState, Subscription, SubscriptionStatus, WebhookEvent};
use crate::services::clock::Clock;
use crate::services::metrics::{record_error, record_webhook_event};
use crate::services::store::MeteringStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How long a caller may hold an event before another may take it over.
const EVENT_LEASE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Convergence {
    pub converged: bool,
    /// Whether this call ran the handler, as opposed to finding the event
    /// already converged.
    #[serde(skip)]
    pub applied: bool,
}

/// Overwrite the local subscription identified by the provider id.
pub(crate) async fn apply_subscription_state(
    store: &dyn MeteringStore,
    state: &ProviderSubscriptionState,
) -> Result<Subscription, MeteringError> {
    let subscription = find_local(store, &state.external_subscription_id).await?;
    Ok(store
        .apply_provider_state(subscription.subscription_id, state)
        .await?)
}

async fn find_local(
    store: &dyn MeteringStore,
    external_subscription_id: &str,
) -> Result<Subscription, MeteringError> {
    store
        .find_subscription_by_external_id(external_subscription_id)
        .await?
        .ok_or_else(|| MeteringError::SubscriptionNotFound(external_subscription_id.to_string()))
}

#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn MeteringStore>,
    clock: Arc<dyn Clock>,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn MeteringStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn process(&self, event_id: &str) -> Result<Convergence, MeteringError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| MeteringError::WebhookEventNotFound(event_id.to_string()))?;

        if event.processed {
            info!("Webhook event already converged");
            return Ok(Convergence {
                converged: true,
                applied: false,
            });
        }

        let now = self.clock.now();
        let lease_until = now + chrono::Duration::seconds(EVENT_LEASE_SECS);
        if !self.store.claim_event(event_id, now, lease_until).await? {
            // Either converged since the read above or leased to another caller.
            let converged = self
                .store
                .get_event(event_id)
                .await?
                .is_some_and(|e| e.processed);
            info!(converged, "Webhook event held by another caller");
            return Ok(Convergence {
                converged,
                applied: false,
            });
        }

        if let Err(e) = self.handle(&event).await {
            record_webhook_event(&event.event_type, "failed");
            record_error(e.kind(), "webhook_process");
            warn!(event_type = %event.event_type, error = %e, "Webhook handler failed, event stays queued");
            if let Err(release) = self.store.release_event(event_id).await {
                warn!(error = %release, "Failed to release webhook event lease");
            }
            return Err(e);
        }

        self.store.mark_processed(event_id, self.clock.now()).await?;
        record_webhook_event(&event.event_type, "converged");
        info!(event_type = %event.event_type, "Webhook event converged");

        Ok(Convergence {
            converged: true,
            applied: true,
        })
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<(), MeteringError> {
        let store = self.store.as_ref();

        match BillingEvent::decode(&event.event_type, &event.payload)? {
            BillingEvent::SubscriptionCreated(state) | BillingEvent::SubscriptionUpdated(state) => {
                let subscription = apply_subscription_state(store, &state).await?;
                info!(
                    subscription_id = %subscription.subscription_id,
                    status = %subscription.status,
                    "Subscription state applied"
                );
            }
            BillingEvent::SubscriptionDeleted(state) => {
                let local = find_local(store, &state.external_subscription_id).await?;
                store
                    .set_subscription_status(local.subscription_id, SubscriptionStatus::Canceled)
                    .await?;
                info!(subscription_id = %local.subscription_id, "Subscription canceled");
            }
            BillingEvent::Unknown(event_type) => {
                record_webhook_event(&event_type, "skipped");
                info!(event_type = %event_type, "Unhandled webhook event type skipped");
            }
        }

        Ok(())
    }

    /// Queued events, oldest first.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<WebhookEvent>, MeteringError> {
        Ok(self.store.list_pending_events(limit).await?)
    }
}
