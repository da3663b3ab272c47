//! Usage counter and usage record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metric used when the caller does not name one.
pub const DEFAULT_METRIC: &str = "default-metric";

/// Calendar `YYYY-MM` key for the billing period that starts at `period_start`.
pub fn period_key(period_start: DateTime<Utc>) -> String {
    period_start.format("%Y-%m").to_string()
}

/// Quota ledger row for one tenant, period and metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UsageCounter {
    pub counter_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub period_key: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metric: String,
    pub included_units: i64,
    pub used_units: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UsageCounter {
    /// Raw `included - used`; negative once usage passes the quota.
    pub fn remaining(&self) -> i64 {
        self.included_units - self.used_units
    }
}

/// Input for creating or refreshing a counter. `used_units` of an existing
/// row is never touched by a seed.
#[derive(Debug, Clone)]
pub struct CounterSeed {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub period_key: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metric: String,
    pub included_units: i64,
}

/// Append-only ledger entry for one accepted usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub record_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub counter_id: Uuid,
    pub metric: String,
    pub value: i64,
    pub occurred_at: DateTime<Utc>,
    pub idempotency_key: String,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

/// Input for appending a usage record against a counter.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub counter_id: Uuid,
    pub metric: String,
    pub value: i64,
    pub occurred_at: DateTime<Utc>,
    pub idempotency_key: String,
    pub metadata: Option<serde_json::Value>,
}

/// Result of the atomic append-and-increment.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// The record was inserted and the counter incremented.
    Recorded(UsageCounter),
    /// A record with the same idempotency key already exists; nothing changed.
    Duplicate(UsageRecord),
    /// The increment would overflow `used_units`; nothing was written.
    Overflow(UsageCounter),
}

/// Filter parameters for listing usage records.
#[derive(Debug, Clone, Default)]
pub struct ListUsageFilter {
    pub period_key: Option<String>,
    pub metric: Option<String>,
    pub page_size: i32,
}
