//! Tenant context extractor.
//!
//! The upstream gateway authenticates the caller and forwards the resolved
//! tenant in `X-Tenant-ID`. Requests without it never reach a handler.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// Tenant the current request acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing {} header (required from gateway)",
                    TENANT_ID_HEADER
                ))
            })?;

        let tenant_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("{} is not a valid UUID", TENANT_ID_HEADER))
        })?;

        tracing::Span::current().record("tenant_id", raw);

        Ok(TenantContext { tenant_id })
    }
}
