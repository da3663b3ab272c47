//! Configuration module for metering-service.

use crate::models::PlanTable;
use config::Config as Cfg;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct MeteringConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub billing_provider: BillingProviderConfig,
    #[serde(default)]
    pub plans: PlanTable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingProviderConfig {
    pub api_base_url: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub signature_tolerance_secs: i64,
}

impl MeteringConfig {
    /// Load defaults, then `configuration.*`, then `APP__*` environment variables.
    pub fn load() -> Result<Self, AppError> {
        let builder = Cfg::builder()
            .set_default("port", 8080)?
            .set_default("service_name", "metering-service")?
            .set_default("log_level", "info")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("billing_provider.api_base_url", "https://api.stripe.com/v1")?
            .set_default("billing_provider.api_key", "")?
            .set_default("billing_provider.signature_tolerance_secs", 300)?;

        let config = core_config::layered_builder(builder).build()?;
        let config: Self = config.try_deserialize()?;

        if config.database.min_connections > config.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                config.database.min_connections,
                config.database.max_connections
            )));
        }

        Ok(config)
    }
}
