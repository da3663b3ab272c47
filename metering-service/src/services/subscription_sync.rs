//! Pull-based convergence: read a tenant's subscription from the provider
//! and apply it locally.

use crate::error::MeteringError;
use crate::models::Subscription;
use crate::services::billing_provider::BillingProvider;
use crate::services::metrics::record_error;
use crate::services::period::resolve_active_subscription;
use crate::services::store::MeteringStore;
use crate::services::webhook_processor::apply_subscription_state;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct SubscriptionSync {
    store: Arc<dyn MeteringStore>,
    provider: Arc<dyn BillingProvider>,
}

impl SubscriptionSync {
    pub fn new(store: Arc<dyn MeteringStore>, provider: Arc<dyn BillingProvider>) -> Self {
        Self { store, provider }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn sync(&self, tenant_id: Uuid) -> Result<Subscription, MeteringError> {
        let local = resolve_active_subscription(self.store.as_ref(), tenant_id).await?;

        let state = self
            .provider
            .fetch_subscription(&local.external_subscription_id)
            .await
            .inspect_err(|e| record_error(e.kind(), "subscription_sync"))?;

        let updated = apply_subscription_state(self.store.as_ref(), &state).await?;
        info!(
            subscription_id = %updated.subscription_id,
            status = %updated.status,
            "Subscription synced from provider"
        );

        Ok(updated)
    }
}
