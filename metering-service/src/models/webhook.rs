//! Webhook event queue model and provider event decoding.

use crate::error::MeteringError;
use crate::models::{ProviderSubscriptionState, SubscriptionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A durably queued provider event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub received_utc: DateTime<Utc>,
}

/// Input for queueing an event.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// A signature-verified provider event, before it is queued.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub id: String,
    pub event_type: String,
    pub created: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl ProviderEvent {
    /// Decode the provider envelope `{id, type, created, data: {object}}`.
    pub fn from_body(body: &[u8]) -> Result<Self, MeteringError> {
        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| MeteringError::Validation(format!("Invalid webhook payload: {}", e)))?;
        let envelope: RawEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| MeteringError::Validation(format!("Invalid webhook envelope: {}", e)))?;

        if envelope.id.trim().is_empty() {
            return Err(MeteringError::Validation(
                "Webhook event id is empty".to_string(),
            ));
        }

        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            created: envelope
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            payload,
        })
    }
}

impl From<ProviderEvent> for NewWebhookEvent {
    fn from(event: ProviderEvent) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type,
            payload: event.payload,
        }
    }
}

/// Provider event types this service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    Unknown,
}

impl BillingEventKind {
    const TABLE: [(&'static str, BillingEventKind); 3] = [
        ("customer.subscription.created", BillingEventKind::SubscriptionCreated),
        ("customer.subscription.updated", BillingEventKind::SubscriptionUpdated),
        ("customer.subscription.deleted", BillingEventKind::SubscriptionDeleted),
    ];

    pub fn from_provider_type(event_type: &str) -> Self {
        Self::TABLE
            .iter()
            .find(|(name, _)| *name == event_type)
            .map(|(_, kind)| *kind)
            .unwrap_or(BillingEventKind::Unknown)
    }
}

/// A queued event decoded into the variant its handler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    SubscriptionCreated(ProviderSubscriptionState),
    SubscriptionUpdated(ProviderSubscriptionState),
    SubscriptionDeleted(ProviderSubscriptionState),
    Unknown(String),
}

impl BillingEvent {
    /// Decode a stored event. Unknown types never fail; known types fail when
    /// their object cannot be read.
    pub fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self, MeteringError> {
        let kind = BillingEventKind::from_provider_type(event_type);
        let subscription = || {
            let object = payload.pointer("/data/object").ok_or_else(|| {
                MeteringError::Validation(format!("Event {} has no data.object", event_type))
            })?;
            subscription_state_from_object(object)
        };

        Ok(match kind {
            BillingEventKind::SubscriptionCreated => {
                BillingEvent::SubscriptionCreated(subscription()?)
            }
            BillingEventKind::SubscriptionUpdated => {
                BillingEvent::SubscriptionUpdated(subscription()?)
            }
            BillingEventKind::SubscriptionDeleted => {
                BillingEvent::SubscriptionDeleted(subscription()?)
            }
            BillingEventKind::Unknown => BillingEvent::Unknown(event_type.to_string()),
        })
    }
}

/// Read a provider subscription object (`{id, status, current_period_start,
/// current_period_end, trial_end}` with unix-second timestamps).
pub fn subscription_state_from_object(
    object: &serde_json::Value,
) -> Result<ProviderSubscriptionState, MeteringError> {
    let raw: RawSubscription = serde_json::from_value(object.clone()).map_err(|e| {
        MeteringError::Validation(format!("Invalid subscription object: {}", e))
    })?;

    let status = SubscriptionStatus::from_provider(&raw.status).ok_or_else(|| {
        MeteringError::Validation(format!("Unsupported subscription status: {}", raw.status))
    })?;

    Ok(ProviderSubscriptionState {
        external_subscription_id: raw.id,
        status,
        current_period_start: timestamp(raw.current_period_start, "current_period_start")?,
        current_period_end: timestamp(raw.current_period_end, "current_period_end")?,
        trial_end: raw
            .trial_end
            .map(|secs| timestamp(secs, "trial_end"))
            .transpose()?,
    })
}

fn timestamp(secs: i64, field: &str) -> Result<DateTime<Utc>, MeteringError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| MeteringError::Validation(format!("{} out of range: {}", field, secs)))
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    trial_end: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription_payload(event_type: &str, status: &str) -> serde_json::Value {
        json!({
            "id": "evt_123",
            "type": event_type,
            "created": 1_735_689_600,
            "data": {
                "object": {
                    "id": "sub_abc",
                    "status": status,
                    "current_period_start": 1_735_689_600,
                    "current_period_end": 1_738_368_000,
                    "trial_end": null
                }
            }
        })
    }

    #[test]
    fn test_envelope_decoding() {
        let body = serde_json::to_vec(&subscription_payload(
            "customer.subscription.updated",
            "active",
        ))
        .unwrap();
        let event = ProviderEvent::from_body(&body).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.event_type, "customer.subscription.updated");
        assert_eq!(event.created.unwrap().timestamp(), 1_735_689_600);
    }

    #[test]
    fn test_envelope_requires_id_and_type() {
        assert!(ProviderEvent::from_body(br#"{"type":"x"}"#).is_err());
        assert!(ProviderEvent::from_body(br#"{"id":"evt_1"}"#).is_err());
        assert!(ProviderEvent::from_body(br#"{"id":" ","type":"x"}"#).is_err());
        assert!(ProviderEvent::from_body(b"not json").is_err());
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(
            BillingEventKind::from_provider_type("customer.subscription.deleted"),
            BillingEventKind::SubscriptionDeleted
        );
        assert_eq!(
            BillingEventKind::from_provider_type("invoice.paid"),
            BillingEventKind::Unknown
        );
    }

    #[test]
    fn test_decode_subscription_update() {
        let payload = subscription_payload("customer.subscription.updated", "past_due");
        let event = BillingEvent::decode("customer.subscription.updated", &payload).unwrap();
        match event {
            BillingEvent::SubscriptionUpdated(state) => {
                assert_eq!(state.external_subscription_id, "sub_abc");
                assert_eq!(state.status, SubscriptionStatus::PastDue);
                assert_eq!(state.current_period_start.timestamp(), 1_735_689_600);
                assert!(state.trial_end.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type_ignores_payload() {
        let event = BillingEvent::decode("invoice.paid", &json!({})).unwrap();
        assert_eq!(event, BillingEvent::Unknown("invoice.paid".to_string()));
    }

    #[test]
    fn test_decode_rejects_unsupported_status() {
        let payload = subscription_payload("customer.subscription.updated", "sleeping");
        assert!(BillingEvent::decode("customer.subscription.updated", &payload).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_object() {
        let payload = json!({"id": "evt_1", "type": "customer.subscription.created"});
        assert!(BillingEvent::decode("customer.subscription.created", &payload).is_err());
    }
}
