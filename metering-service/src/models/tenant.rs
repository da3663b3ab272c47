//! Tenant model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A billing account. `tenant_id` is the join key for every other entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub external_org_id: String,
    pub name: String,
    pub billing_customer_id: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for provisioning a tenant.
#[derive(Debug, Clone)]
pub struct CreateTenant {
    pub external_org_id: String,
    pub name: String,
    pub billing_customer_id: Option<String>,
}
