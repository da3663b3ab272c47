//! Storage seams for the metering core.
//!
//! Every operation the services need from persistence lives behind one of
//! these traits so the same service code runs against PostgreSQL
//! ([`crate::services::Database`]) and the in-process store
//! ([`crate::services::InMemoryStore`]). Both must enforce the three
//! uniqueness rules: one counter per (tenant, period key, metric), one usage
//! record per idempotency key, one webhook event per provider event id.

use crate::models::{
    CounterSeed, CreateSubscription, CreateTenant, ListUsageFilter, NewUsageRecord,
    NewWebhookEvent, ProviderSubscriptionState, RecordOutcome, Subscription, SubscriptionStatus,
    Tenant, UsageCounter, UsageRecord, WebhookEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create_tenant(&self, input: &CreateTenant) -> Result<Tenant, AppError>;

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError>;

    /// The tenant's live subscription with the latest period start.
    async fn find_active_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError>;

    /// Overwrite status, period bounds and trial end with provider state.
    async fn apply_provider_state(
        &self,
        subscription_id: Uuid,
        state: &ProviderSubscriptionState,
    ) -> Result<Subscription, AppError>;

    async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Subscription, AppError>;
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Create the counter with `used_units = 0`, or refresh `included_units`,
    /// subscription and period bounds of the existing one. Never touches
    /// `used_units` of an existing row.
    async fn upsert_counter(&self, seed: &CounterSeed) -> Result<UsageCounter, AppError>;

    async fn find_counter(
        &self,
        tenant_id: Uuid,
        period_key: &str,
        metric: &str,
    ) -> Result<Option<UsageCounter>, AppError>;

    async fn find_counter_by_id(&self, counter_id: Uuid)
        -> Result<Option<UsageCounter>, AppError>;

    async fn find_record_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<UsageRecord>, AppError>;

    /// Append the record and increment its counter as one atomic unit.
    /// A record with the same idempotency key makes this a no-op returning
    /// [`RecordOutcome::Duplicate`]. An increment that cannot fit in the
    /// counter writes nothing and returns [`RecordOutcome::Overflow`].
    async fn record_usage(&self, input: &NewUsageRecord) -> Result<RecordOutcome, AppError>;

    /// Tenant-scoped records, newest first.
    async fn list_usage_records(
        &self,
        tenant_id: Uuid,
        filter: &ListUsageFilter,
    ) -> Result<Vec<UsageRecord>, AppError>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Queue the event unless its id is already present. Returns whether a
    /// new row was written.
    async fn insert_event_if_absent(&self, input: &NewWebhookEvent) -> Result<bool, AppError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, AppError>;

    /// Lease an unprocessed event to one caller until `lease_until`.
    /// Returns false when the event is converged or another lease is live.
    async fn claim_event(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Drop a lease so the event can be replayed before it expires.
    async fn release_event(&self, event_id: &str) -> Result<(), AppError>;

    /// Mark the event converged and clear its lease.
    async fn mark_processed(
        &self,
        event_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Unprocessed events, oldest first.
    async fn list_pending_events(&self, limit: i64) -> Result<Vec<WebhookEvent>, AppError>;
}

/// Everything the service layer needs from one backing store.
#[async_trait]
pub trait MeteringStore:
    TenantRepository + SubscriptionRepository + UsageLedger + WebhookEventRepository
{
    async fn health_check(&self) -> Result<(), AppError>;
}
