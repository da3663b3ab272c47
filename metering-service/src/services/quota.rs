//! Hot-path quota decisions and the tenant-facing entitlement view.

use crate::error::MeteringError;
use crate::models::{period_key, PlanTable, Subscription, UsageCounter};
use crate::services::clock::Clock;
use crate::services::metrics::record_quota_check;
use crate::services::period::{included_units, resolve_active_subscription};
use crate::services::store::MeteringStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Outcome of a quota check. A denial always reports zero remaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { remaining: i64 },
    Exceeded { retry_after_secs: u64 },
}

impl QuotaDecision {
    /// `allow = used < included`.
    pub fn evaluate(counter: Option<&UsageCounter>, period_end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        match counter {
            Some(c) if c.used_units < c.included_units => QuotaDecision::Allowed {
                remaining: c.remaining(),
            },
            _ => QuotaDecision::Exceeded {
                retry_after_secs: (period_end - now).num_seconds().max(1) as u64,
            },
        }
    }

    pub fn allow(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }

    pub fn remaining(&self) -> i64 {
        match self {
            QuotaDecision::Allowed { remaining } => *remaining,
            QuotaDecision::Exceeded { .. } => 0,
        }
    }
}

/// Plan and usage state for one metric in the current period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    pub plan_code: String,
    pub status: String,
    pub period_key: String,
    pub metric: String,
    pub included: i64,
    pub used: i64,
    pub remaining: i64,
}

#[derive(Clone)]
pub struct QuotaEvaluator {
    store: Arc<dyn MeteringStore>,
    plans: Arc<PlanTable>,
    clock: Arc<dyn Clock>,
}

impl QuotaEvaluator {
    pub fn new(store: Arc<dyn MeteringStore>, plans: Arc<PlanTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            plans,
            clock,
        }
    }

    /// Read-only allow/deny for the tenant's current period. A missing
    /// counter is a denial, not an error.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, metric = %metric))]
    pub async fn check(&self, tenant_id: Uuid, metric: &str) -> Result<QuotaDecision, MeteringError> {
        let (subscription, counter) = self.current_counter(tenant_id, metric).await?;
        let decision = QuotaDecision::evaluate(
            counter.as_ref(),
            subscription.current_period_end,
            self.clock.now(),
        );

        debug!(
            allow = decision.allow(),
            remaining = decision.remaining(),
            seeded = counter.is_some(),
            "Quota evaluated"
        );
        record_quota_check(metric, if decision.allow() { "allow" } else { "deny" });

        Ok(decision)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, metric = %metric))]
    pub async fn entitlement(
        &self,
        tenant_id: Uuid,
        metric: &str,
    ) -> Result<Entitlement, MeteringError> {
        let (subscription, counter) = self.current_counter(tenant_id, metric).await?;

        let (included, used) = match &counter {
            Some(c) => (c.included_units, c.used_units),
            None => (included_units(&self.plans, &subscription, metric)?, 0),
        };

        Ok(Entitlement {
            period_key: period_key(subscription.current_period_start),
            plan_code: subscription.plan_code,
            status: subscription.status,
            metric: metric.to_string(),
            included,
            used,
            remaining: (included - used).max(0),
        })
    }

    async fn current_counter(
        &self,
        tenant_id: Uuid,
        metric: &str,
    ) -> Result<(Subscription, Option<UsageCounter>), MeteringError> {
        let subscription = resolve_active_subscription(self.store.as_ref(), tenant_id).await?;
        let key = period_key(subscription.current_period_start);
        let counter = self.store.find_counter(tenant_id, &key, metric).await?;
        Ok((subscription, counter))
    }
}
