//! Request extractors for metering-service.

pub mod tenant;

pub use tenant::{TenantContext, TENANT_ID_HEADER};
