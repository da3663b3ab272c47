//! Idempotent usage recording.

use crate::error::MeteringError;
use crate::models::{ListUsageFilter, NewUsageRecord, RecordOutcome, UsageCounter, UsageRecord};
use crate::services::clock::Clock;
use crate::services::metrics::{record_error, record_usage_outcome, record_usage_units};
use crate::services::period::{resolve_active_subscription, PeriodSeeder};
use crate::services::store::MeteringStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const MAX_METRIC_LEN: usize = 100;

/// One logical usage event reported by a caller.
#[derive(Debug, Clone)]
pub struct RecordUsage {
    pub tenant_id: Uuid,
    pub metric: String,
    pub value: i64,
    /// Defaults to the injected clock's now.
    pub occurred_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
    pub metadata: Option<serde_json::Value>,
}

impl RecordUsage {
    fn validate(&self) -> Result<(), MeteringError> {
        if self.value <= 0 {
            return Err(MeteringError::Validation(format!(
                "value must be positive, got {}",
                self.value
            )));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(MeteringError::Validation(
                "request_id is required".to_string(),
            ));
        }
        if self.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(MeteringError::Validation(format!(
                "request_id exceeds {} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        if self.metric.trim().is_empty() || self.metric.len() > MAX_METRIC_LEN {
            return Err(MeteringError::Validation(format!(
                "metric must be 1-{} characters",
                MAX_METRIC_LEN
            )));
        }
        Ok(())
    }
}

/// Ledger state after a record call. `remaining` is unclamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageResult {
    pub period_key: String,
    pub used: i64,
    pub remaining: i64,
}

impl From<&UsageCounter> for UsageResult {
    fn from(counter: &UsageCounter) -> Self {
        Self {
            period_key: counter.period_key.clone(),
            used: counter.used_units,
            remaining: counter.remaining(),
        }
    }
}

#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn MeteringStore>,
    seeder: PeriodSeeder,
    clock: Arc<dyn Clock>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn MeteringStore>, seeder: PeriodSeeder, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            seeder,
            clock,
        }
    }

    /// Apply a usage event at most once per idempotency key.
    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, metric = %input.metric, value = input.value, request_id = %input.idempotency_key)
    )]
    pub async fn record(&self, input: RecordUsage) -> Result<UsageResult, MeteringError> {
        input.validate()?;

        let result = self.record_validated(&input).await;
        if let Err(e) = &result {
            record_error(e.kind(), "record_usage");
        }
        result
    }

    async fn record_validated(&self, input: &RecordUsage) -> Result<UsageResult, MeteringError> {
        let tenant_label = input.tenant_id.to_string();

        if let Some(existing) = self
            .store
            .find_record_by_idempotency_key(&input.idempotency_key)
            .await?
        {
            let result = self.replay(input.tenant_id, &existing).await?;
            record_usage_outcome(&tenant_label, &input.metric, "duplicate");
            return Ok(result);
        }

        let subscription = resolve_active_subscription(self.store.as_ref(), input.tenant_id).await?;
        let counter = self.seeder.ensure_counter(&subscription, &input.metric).await?;

        let outcome = self
            .store
            .record_usage(&NewUsageRecord {
                tenant_id: input.tenant_id,
                subscription_id: subscription.subscription_id,
                counter_id: counter.counter_id,
                metric: input.metric.clone(),
                value: input.value,
                occurred_at: input.occurred_at.unwrap_or_else(|| self.clock.now()),
                idempotency_key: input.idempotency_key.clone(),
                metadata: input.metadata.clone(),
            })
            .await?;

        match outcome {
            RecordOutcome::Recorded(counter) => {
                record_usage_outcome(&tenant_label, &input.metric, "recorded");
                record_usage_units(&tenant_label, &input.metric, input.value);
                info!(
                    period_key = %counter.period_key,
                    used_units = counter.used_units,
                    remaining = counter.remaining(),
                    "Usage recorded"
                );
                Ok(UsageResult::from(&counter))
            }
            // Lost the race to a concurrent retry of the same request.
            RecordOutcome::Duplicate(existing) => {
                let result = self.replay(input.tenant_id, &existing).await?;
                record_usage_outcome(&tenant_label, &input.metric, "duplicate");
                Ok(result)
            }
            RecordOutcome::Overflow(counter) => {
                record_usage_outcome(&tenant_label, &input.metric, "overflow");
                Err(MeteringError::Validation(format!(
                    "value {} exceeds the headroom of counter {} (used {})",
                    input.value, counter.period_key, counter.used_units
                )))
            }
        }
    }

    /// Current state of the counter an earlier record landed on.
    async fn replay(
        &self,
        tenant_id: Uuid,
        existing: &UsageRecord,
    ) -> Result<UsageResult, MeteringError> {
        if existing.tenant_id != tenant_id {
            warn!(record_id = %existing.record_id, "Idempotency key reused across tenants");
            return Err(MeteringError::Validation(
                "request_id already used by another tenant".to_string(),
            ));
        }

        let counter = self
            .store
            .find_counter_by_id(existing.counter_id)
            .await?
            .ok_or_else(|| {
                MeteringError::Internal(anyhow::anyhow!(
                    "Counter {} of record {} is missing",
                    existing.counter_id,
                    existing.record_id
                ))
            })?;

        info!(record_id = %existing.record_id, used_units = counter.used_units, "Duplicate usage request");
        Ok(UsageResult::from(&counter))
    }

    /// Ledger history for the tenant, newest first.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_records(
        &self,
        tenant_id: Uuid,
        filter: &ListUsageFilter,
    ) -> Result<Vec<UsageRecord>, MeteringError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .ok_or(MeteringError::TenantNotFound(tenant_id))?;

        Ok(self.store.list_usage_records(tenant_id, filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: i64, key: &str) -> RecordUsage {
        RecordUsage {
            tenant_id: Uuid::new_v4(),
            metric: "default-metric".into(),
            value,
            occurred_at: None,
            idempotency_key: key.into(),
            metadata: None,
        }
    }

    #[test]
    fn test_validation() {
        assert!(input(1, "req-1").validate().is_ok());
        assert!(input(0, "req-1").validate().is_err());
        assert!(input(-4, "req-1").validate().is_err());
        assert!(input(1, "").validate().is_err());
        assert!(input(1, "   ").validate().is_err());
        assert!(input(1, &"k".repeat(256)).validate().is_err());

        let mut no_metric = input(1, "req-1");
        no_metric.metric = String::new();
        assert!(no_metric.validate().is_err());
    }
}
