//! In-process store with the same uniqueness rules as the PostgreSQL schema.
//!
//! One async mutex guards all state, so every trait method is a single
//! critical section. That makes the append-and-increment of
//! `record_usage` atomic the same way the database transaction is.

use crate::models::{
    CounterSeed, CreateSubscription, CreateTenant, ListUsageFilter, NewUsageRecord,
    NewWebhookEvent, ProviderSubscriptionState, RecordOutcome, Subscription, SubscriptionStatus,
    Tenant, UsageCounter, UsageRecord, WebhookEvent,
};
use crate::services::store::{
    MeteringStore, SubscriptionRepository, TenantRepository, UsageLedger, WebhookEventRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<Uuid, Tenant>,
    subscriptions: HashMap<Uuid, Subscription>,
    counters: HashMap<Uuid, UsageCounter>,
    counter_keys: HashMap<(Uuid, String, String), Uuid>,
    records: Vec<UsageRecord>,
    record_keys: HashMap<String, usize>,
    events: HashMap<String, WebhookEvent>,
    event_leases: HashMap<String, DateTime<Utc>>,
    subscription_updates: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscription writes made through the convergence path.
    pub async fn subscription_update_count(&self) -> usize {
        self.state.lock().await.subscription_updates
    }

    /// Number of usage records in the ledger.
    pub async fn usage_record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }
}

#[async_trait]
impl TenantRepository for InMemoryStore {
    async fn create_tenant(&self, input: &CreateTenant) -> Result<Tenant, AppError> {
        let mut state = self.state.lock().await;
        if state
            .tenants
            .values()
            .any(|t| t.external_org_id == input.external_org_id)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Tenant for org '{}' already exists",
                input.external_org_id
            )));
        }

        let now = Utc::now();
        let tenant = Tenant {
            tenant_id: Uuid::new_v4(),
            external_org_id: input.external_org_id.clone(),
            name: input.name.clone(),
            billing_customer_id: input.billing_customer_id.clone(),
            created_utc: now,
            updated_utc: now,
        };
        state.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        Ok(self.state.lock().await.tenants.get(&tenant_id).cloned())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let mut state = self.state.lock().await;
        if !state.tenants.contains_key(&input.tenant_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Tenant {} not found",
                input.tenant_id
            )));
        }
        if state
            .subscriptions
            .values()
            .any(|s| s.external_subscription_id == input.external_subscription_id)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription '{}' already exists",
                input.external_subscription_id
            )));
        }

        let now = Utc::now();
        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            external_subscription_id: input.external_subscription_id.clone(),
            plan_code: input.plan_code.clone(),
            status: input.status.as_str().to_string(),
            current_period_start: input.current_period_start,
            current_period_end: input.current_period_end,
            trial_end: input.trial_end,
            created_utc: now,
            updated_utc: now,
        };
        state
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(subscription)
    }

    async fn find_active_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.is_live())
            .max_by_key(|s| (s.current_period_start, s.created_utc))
            .cloned())
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.external_subscription_id == external_subscription_id)
            .cloned())
    }

    async fn apply_provider_state(
        &self,
        subscription_id: Uuid,
        provider: &ProviderSubscriptionState,
    ) -> Result<Subscription, AppError> {
        let mut state = self.state.lock().await;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
            })?;

        subscription.status = provider.status.as_str().to_string();
        subscription.current_period_start = provider.current_period_start;
        subscription.current_period_end = provider.current_period_end;
        subscription.trial_end = provider.trial_end;
        subscription.updated_utc = Utc::now();
        let updated = subscription.clone();

        state.subscription_updates += 1;
        Ok(updated)
    }

    async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Subscription, AppError> {
        let mut state = self.state.lock().await;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
            })?;

        subscription.status = status.as_str().to_string();
        subscription.updated_utc = Utc::now();
        let updated = subscription.clone();

        state.subscription_updates += 1;
        Ok(updated)
    }
}

#[async_trait]
impl UsageLedger for InMemoryStore {
    async fn upsert_counter(&self, seed: &CounterSeed) -> Result<UsageCounter, AppError> {
        let mut state = self.state.lock().await;
        let key = (seed.tenant_id, seed.period_key.clone(), seed.metric.clone());
        let now = Utc::now();

        if let Some(counter_id) = state.counter_keys.get(&key).copied() {
            let counter = state.counters.get_mut(&counter_id).ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("Counter index out of sync"))
            })?;
            counter.included_units = seed.included_units;
            counter.subscription_id = seed.subscription_id;
            counter.period_start = seed.period_start;
            counter.period_end = seed.period_end;
            counter.updated_utc = now;
            return Ok(counter.clone());
        }

        let counter = UsageCounter {
            counter_id: Uuid::new_v4(),
            tenant_id: seed.tenant_id,
            subscription_id: seed.subscription_id,
            period_key: seed.period_key.clone(),
            period_start: seed.period_start,
            period_end: seed.period_end,
            metric: seed.metric.clone(),
            included_units: seed.included_units,
            used_units: 0,
            created_utc: now,
            updated_utc: now,
        };
        state.counter_keys.insert(key, counter.counter_id);
        state.counters.insert(counter.counter_id, counter.clone());
        Ok(counter)
    }

    async fn find_counter(
        &self,
        tenant_id: Uuid,
        period_key: &str,
        metric: &str,
    ) -> Result<Option<UsageCounter>, AppError> {
        let state = self.state.lock().await;
        let key = (tenant_id, period_key.to_string(), metric.to_string());
        Ok(state
            .counter_keys
            .get(&key)
            .and_then(|id| state.counters.get(id))
            .cloned())
    }

    async fn find_counter_by_id(
        &self,
        counter_id: Uuid,
    ) -> Result<Option<UsageCounter>, AppError> {
        Ok(self.state.lock().await.counters.get(&counter_id).cloned())
    }

    async fn find_record_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<UsageRecord>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .record_keys
            .get(idempotency_key)
            .and_then(|idx| state.records.get(*idx))
            .cloned())
    }

    async fn record_usage(&self, input: &NewUsageRecord) -> Result<RecordOutcome, AppError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .record_keys
            .get(&input.idempotency_key)
            .and_then(|idx| state.records.get(*idx))
        {
            return Ok(RecordOutcome::Duplicate(existing.clone()));
        }

        let now = Utc::now();
        let counter = state.counters.get_mut(&input.counter_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Usage counter {} not found",
                input.counter_id
            ))
        })?;
        let Some(used_units) = counter.used_units.checked_add(input.value) else {
            return Ok(RecordOutcome::Overflow(counter.clone()));
        };
        counter.used_units = used_units;
        counter.updated_utc = now;
        let counter = counter.clone();

        state.records.push(UsageRecord {
            record_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            subscription_id: input.subscription_id,
            counter_id: input.counter_id,
            metric: input.metric.clone(),
            value: input.value,
            occurred_at: input.occurred_at,
            idempotency_key: input.idempotency_key.clone(),
            metadata: input.metadata.clone(),
            created_utc: now,
        });
        let idx = state.records.len() - 1;
        state.record_keys.insert(input.idempotency_key.clone(), idx);

        Ok(RecordOutcome::Recorded(counter))
    }

    async fn list_usage_records(
        &self,
        tenant_id: Uuid,
        filter: &ListUsageFilter,
    ) -> Result<Vec<UsageRecord>, AppError> {
        let state = self.state.lock().await;
        let limit = filter.page_size.clamp(1, 100) as usize;

        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| filter.metric.as_ref().is_none_or(|m| &r.metric == m))
            .filter(|r| {
                filter.period_key.as_ref().is_none_or(|key| {
                    state
                        .counters
                        .get(&r.counter_id)
                        .is_some_and(|c| &c.period_key == key)
                })
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryStore {
    async fn insert_event_if_absent(&self, input: &NewWebhookEvent) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.events.contains_key(&input.event_id) {
            return Ok(false);
        }
        state.events.insert(
            input.event_id.clone(),
            WebhookEvent {
                event_id: input.event_id.clone(),
                event_type: input.event_type.clone(),
                payload: input.payload.clone(),
                processed: false,
                processed_at: None,
                received_utc: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, AppError> {
        Ok(self.state.lock().await.events.get(event_id).cloned())
    }

    async fn claim_event(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let claimable = state.events.get(event_id).is_some_and(|e| !e.processed)
            && state
                .event_leases
                .get(event_id)
                .is_none_or(|until| *until <= now);
        if claimable {
            state.event_leases.insert(event_id.to_string(), lease_until);
        }
        Ok(claimable)
    }

    async fn release_event(&self, event_id: &str) -> Result<(), AppError> {
        self.state.lock().await.event_leases.remove(event_id);
        Ok(())
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.event_leases.remove(event_id);
        if let Some(event) = state.events.get_mut(event_id) {
            if !event.processed {
                event.processed = true;
                event.processed_at = Some(processed_at);
            }
        }
        Ok(())
    }

    async fn list_pending_events(&self, limit: i64) -> Result<Vec<WebhookEvent>, AppError> {
        let state = self.state.lock().await;
        let mut pending: Vec<WebhookEvent> = state
            .events
            .values()
            .filter(|e| !e.processed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.received_utc
                .cmp(&b.received_utc)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        pending.truncate(limit.clamp(1, 500) as usize);
        Ok(pending)
    }
}

#[async_trait]
impl MeteringStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
