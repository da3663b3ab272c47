//! Period seeding: materialize the usage counter for a tenant's current
//! billing period from the plan table.

use crate::error::MeteringError;
use crate::models::{period_key, CounterSeed, PlanTable, Subscription, UsageCounter, DEFAULT_METRIC};
use crate::services::store::MeteringStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Result of a seed call. `remaining` is raw `included - used`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub period_key: String,
    pub remaining: i64,
}

/// Resolve the tenant and its single active subscription.
pub(crate) async fn resolve_active_subscription(
    store: &dyn MeteringStore,
    tenant_id: Uuid,
) -> Result<Subscription, MeteringError> {
    store
        .get_tenant(tenant_id)
        .await?
        .ok_or(MeteringError::TenantNotFound(tenant_id))?;

    store
        .find_active_subscription(tenant_id)
        .await?
        .ok_or(MeteringError::NoActiveSubscription(tenant_id))
}

/// Included units for `metric` under the subscription's plan.
pub(crate) fn included_units(
    plans: &PlanTable,
    subscription: &Subscription,
    metric: &str,
) -> Result<i64, MeteringError> {
    plans
        .limits(&subscription.plan_code)
        .map(|limits| limits.included_units(metric))
        .ok_or_else(|| MeteringError::InvalidPlanCode {
            subscription_id: subscription.subscription_id,
            plan_code: subscription.plan_code.clone(),
        })
}

#[derive(Clone)]
pub struct PeriodSeeder {
    store: Arc<dyn MeteringStore>,
    plans: Arc<PlanTable>,
}

impl PeriodSeeder {
    pub fn new(store: Arc<dyn MeteringStore>, plans: Arc<PlanTable>) -> Self {
        Self { store, plans }
    }

    /// Seed the default metric for the tenant's current period.
    pub async fn seed(&self, tenant_id: Uuid) -> Result<SeedResult, MeteringError> {
        self.seed_metric(tenant_id, DEFAULT_METRIC).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, metric = %metric))]
    pub async fn seed_metric(
        &self,
        tenant_id: Uuid,
        metric: &str,
    ) -> Result<SeedResult, MeteringError> {
        let subscription = resolve_active_subscription(self.store.as_ref(), tenant_id).await?;
        let counter = self.ensure_counter(&subscription, metric).await?;

        info!(
            period_key = %counter.period_key,
            included_units = counter.included_units,
            used_units = counter.used_units,
            "Period seeded"
        );

        Ok(SeedResult {
            remaining: counter.remaining(),
            period_key: counter.period_key,
        })
    }

    /// Find-or-create the counter for the subscription's current period.
    /// An existing counter keeps its `used_units`.
    pub async fn ensure_counter(
        &self,
        subscription: &Subscription,
        metric: &str,
    ) -> Result<UsageCounter, MeteringError> {
        let seed = CounterSeed {
            tenant_id: subscription.tenant_id,
            subscription_id: subscription.subscription_id,
            period_key: period_key(subscription.current_period_start),
            period_start: subscription.current_period_start,
            period_end: subscription.current_period_end,
            metric: metric.to_string(),
            included_units: included_units(&self.plans, subscription, metric)?,
        };

        Ok(self.store.upsert_counter(&seed).await?)
    }
}
