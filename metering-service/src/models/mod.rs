//! Domain models for metering-service.

mod plan;
mod subscription;
mod tenant;
mod usage;
mod webhook;

pub use plan::{PlanCode, PlanLimits, PlanTable};
pub use subscription::{
    CreateSubscription, ProviderSubscriptionState, Subscription, SubscriptionStatus,
};
pub use tenant::{CreateTenant, Tenant};
pub use usage::{
    period_key, CounterSeed, ListUsageFilter, NewUsageRecord, RecordOutcome, UsageCounter,
    UsageRecord, DEFAULT_METRIC,
};
pub use webhook::{
    subscription_state_from_object, BillingEvent, BillingEventKind, NewWebhookEvent,
    ProviderEvent, WebhookEvent,
};
