//! Domain errors for metering-service.

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the metering core. Quota denial is not one of them:
/// it is a normal [`crate::services::QuotaDecision`].
#[derive(Debug, Error)]
pub enum MeteringError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Tenant {0} not found")]
    TenantNotFound(Uuid),

    #[error("Tenant {0} has no active subscription")]
    NoActiveSubscription(Uuid),

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(String),

    #[error("Webhook event {0} not found")]
    WebhookEventNotFound(String),

    #[error("Plan code '{plan_code}' of subscription {subscription_id} is not configured")]
    InvalidPlanCode {
        subscription_id: Uuid,
        plan_code: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Billing provider call failed: {0}")]
    UpstreamFailure(String),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MeteringError {
    /// Stable label used for error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            MeteringError::Validation(_) => "validation",
            MeteringError::TenantNotFound(_)
            | MeteringError::NoActiveSubscription(_)
            | MeteringError::SubscriptionNotFound(_)
            | MeteringError::WebhookEventNotFound(_) => "not_found",
            MeteringError::InvalidPlanCode { .. } => "conflict",
            MeteringError::Unauthorized(_) => "unauthorized",
            MeteringError::UpstreamFailure(_) => "upstream",
            MeteringError::Storage(_) => "storage",
            MeteringError::Internal(_) => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == "not_found"
    }
}

impl From<MeteringError> for AppError {
    fn from(err: MeteringError) -> Self {
        match err {
            MeteringError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ (MeteringError::TenantNotFound(_)
            | MeteringError::NoActiveSubscription(_)
            | MeteringError::SubscriptionNotFound(_)
            | MeteringError::WebhookEventNotFound(_)) => {
                AppError::NotFound(anyhow::anyhow!(e.to_string()))
            }
            e @ MeteringError::InvalidPlanCode { .. } => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            MeteringError::Unauthorized(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            MeteringError::UpstreamFailure(msg) => AppError::BadGateway(msg),
            MeteringError::Storage(e) => AppError::DatabaseError(e),
            MeteringError::Internal(e) => AppError::InternalError(e),
        }
    }
}

/// Storage layer failures arrive as `AppError::DatabaseError`; keep them in
/// the storage class so callers can tell them from logic faults.
impl From<AppError> for MeteringError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::DatabaseError(e) => MeteringError::Storage(e),
            other => MeteringError::Internal(anyhow::anyhow!(other.to_string())),
        }
    }
}
