//! HTTP request and response bodies.

use crate::models::{ListUsageFilter, Subscription, UsageRecord, WebhookEvent, DEFAULT_METRIC};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Default)]
pub struct MetricQuery {
    pub metric: Option<String>,
}

impl MetricQuery {
    pub fn metric(&self) -> &str {
        self.metric
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_METRIC)
    }
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub allow: bool,
    pub remaining: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordUsageRequest {
    #[validate(length(min = 1, max = 100))]
    pub metric: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub value: i64,
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(length(min = 1, max = 255))]
    pub request_id: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListUsageQuery {
    #[validate(length(equal = 7))]
    pub period_key: Option<String>,
    pub metric: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i32>,
}

impl From<ListUsageQuery> for ListUsageFilter {
    fn from(query: ListUsageQuery) -> Self {
        Self {
            period_key: query.period_key,
            metric: query.metric,
            page_size: query.limit.unwrap_or(50),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsageRecordResponse {
    pub record_id: Uuid,
    pub metric: String,
    pub value: i64,
    pub occurred_at: DateTime<Utc>,
    pub request_id: String,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl From<UsageRecord> for UsageRecordResponse {
    fn from(record: UsageRecord) -> Self {
        Self {
            record_id: record.record_id,
            metric: record.metric,
            value: record.value,
            occurred_at: record.occurred_at,
            request_id: record.idempotency_key,
            metadata: record.metadata,
            created_utc: record.created_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub queued: bool,
    pub event_id: String,
    pub converged: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PendingEventsQuery {
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PendingEventResponse {
    pub event_id: String,
    pub event_type: String,
    pub received_utc: DateTime<Utc>,
}

impl From<WebhookEvent> for PendingEventResponse {
    fn from(event: WebhookEvent) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            received_utc: event.received_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub external_subscription_id: String,
    pub plan_code: String,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            subscription_id: s.subscription_id,
            tenant_id: s.tenant_id,
            external_subscription_id: s.external_subscription_id,
            plan_code: s.plan_code,
            status: s.status,
            current_period_start: s.current_period_start,
            current_period_end: s.current_period_end,
            trial_end: s.trial_end,
        }
    }
}
