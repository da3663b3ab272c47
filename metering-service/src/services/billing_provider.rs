//! Billing provider client.
//!
//! Two contracts are consumed from the provider: webhook signature
//! verification (a pure function of body, signature header, shared secret
//! and the current time) and a subscription read used for on-demand sync.

use crate::config::BillingProviderConfig;
use crate::error::MeteringError;
use crate::models::{subscription_state_from_object, ProviderEvent, ProviderSubscriptionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use service_core::utils::signature::SignatureHeader;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Verify a webhook delivery and decode its envelope.
    fn verify_webhook(
        &self,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<ProviderEvent, MeteringError>;

    /// Read the provider's current view of a subscription.
    async fn fetch_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderSubscriptionState, MeteringError>;
}

/// Verify a `t=<unix>,v1=<hex>` signature header against `body`.
///
/// The signed timestamp must be within `tolerance_secs` of `now` in either
/// direction.
pub fn verify_signature_header(
    secret: &str,
    body: &[u8],
    signature: &str,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), MeteringError> {
    let header = SignatureHeader::parse(signature)
        .ok_or_else(|| MeteringError::Unauthorized("Malformed signature header".to_string()))?;

    if (now.timestamp() - header.timestamp).abs() > tolerance_secs {
        return Err(MeteringError::Unauthorized(
            "Signature timestamp outside tolerance".to_string(),
        ));
    }

    let valid = header
        .matches(secret, body)
        .map_err(MeteringError::Internal)?;
    if !valid {
        return Err(MeteringError::Unauthorized(
            "Signature does not match payload".to_string(),
        ));
    }

    Ok(())
}

/// HTTP client for the provider REST API.
#[derive(Clone)]
pub struct HttpBillingProvider {
    client: Client,
    config: BillingProviderConfig,
}

impl HttpBillingProvider {
    pub fn new(config: BillingProviderConfig) -> Result<Self, MeteringError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MeteringError::Internal(anyhow::anyhow!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Check if the API key is present.
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }
}

#[async_trait]
impl BillingProvider for HttpBillingProvider {
    fn verify_webhook(
        &self,
        body: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<ProviderEvent, MeteringError> {
        verify_signature_header(
            self.config.webhook_secret.expose_secret(),
            body,
            signature,
            now,
            self.config.signature_tolerance_secs,
        )
        .inspect_err(|e| warn!(error = %e, "Webhook signature rejected"))?;

        ProviderEvent::from_body(body)
    }

    #[instrument(skip(self))]
    async fn fetch_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<ProviderSubscriptionState, MeteringError> {
        if !self.is_configured() {
            return Err(MeteringError::UpstreamFailure(
                "Billing provider API key not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/subscriptions/{}",
            self.config.api_base_url.trim_end_matches('/'),
            external_subscription_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| MeteringError::UpstreamFailure(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MeteringError::UpstreamFailure(format!("Unreadable response: {}", e)))?;

        debug!(status = %status, "Billing provider subscription response");

        if status == StatusCode::NOT_FOUND {
            return Err(MeteringError::SubscriptionNotFound(
                external_subscription_id.to_string(),
            ));
        }
        if !status.is_success() {
            return Err(MeteringError::UpstreamFailure(format!(
                "Provider returned {}: {}",
                status, body
            )));
        }

        let object: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| MeteringError::UpstreamFailure(format!("Invalid JSON: {}", e)))?;
        let state = subscription_state_from_object(&object)
            .map_err(|e| MeteringError::UpstreamFailure(e.to_string()))?;

        info!(status = state.status.as_str(), "Fetched subscription from provider");

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::utils::signature::signature_header;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.paid"}"#;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let header = signature_header(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(verify_signature_header(SECRET, BODY, &header, at(1_700_000_100), 300).is_ok());
    }

    #[test]
    fn test_wrong_secret() {
        let header = signature_header("other", 1_700_000_000, BODY).unwrap();
        let err = verify_signature_header(SECRET, BODY, &header, at(1_700_000_000), 300)
            .unwrap_err();
        assert!(matches!(err, MeteringError::Unauthorized(_)));
    }

    #[test]
    fn test_stale_and_future_timestamps() {
        let header = signature_header(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(verify_signature_header(SECRET, BODY, &header, at(1_700_000_301), 300).is_err());
        assert!(verify_signature_header(SECRET, BODY, &header, at(1_699_999_699), 300).is_err());
        assert!(verify_signature_header(SECRET, BODY, &header, at(1_699_999_700), 300).is_ok());
    }

    #[test]
    fn test_malformed_header() {
        for header in ["", "v1=abc", "t=notanumber,v1=abc", "garbage"] {
            assert!(matches!(
                verify_signature_header(SECRET, BODY, header, at(1_700_000_000), 300),
                Err(MeteringError::Unauthorized(_))
            ));
        }
    }
}
