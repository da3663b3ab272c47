//! PostgreSQL store for metering-service.

use crate::models::{
    CounterSeed, CreateSubscription, CreateTenant, ListUsageFilter, NewUsageRecord,
    NewWebhookEvent, ProviderSubscriptionState, RecordOutcome, Subscription, SubscriptionStatus,
    Tenant, UsageCounter, UsageRecord, WebhookEvent,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    MeteringStore, SubscriptionRepository, TenantRepository, UsageLedger, WebhookEventRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, tenant_id, external_subscription_id, plan_code, status, current_period_start, current_period_end, trial_end, created_utc, updated_utc";
const COUNTER_COLUMNS: &str = "counter_id, tenant_id, subscription_id, period_key, period_start, period_end, metric, included_units, used_units, created_utc, updated_utc";
const RECORD_COLUMNS: &str = "record_id, tenant_id, subscription_id, counter_id, metric, value, occurred_at, idempotency_key, metadata, created_utc";
const EVENT_COLUMNS: &str =
    "event_id, event_type, payload, processed, processed_at, received_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "metering-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

// =========================================================================
// Tenant Operations
// =========================================================================

#[async_trait]
impl TenantRepository for Database {
    #[instrument(skip(self, input), fields(external_org_id = %input.external_org_id))]
    async fn create_tenant(&self, input: &CreateTenant) -> Result<Tenant, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_tenant"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (tenant_id, external_org_id, name, billing_customer_id)
            VALUES ($1, $2, $3, $4)
            RETURNING tenant_id, external_org_id, name, billing_customer_id, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.external_org_id)
        .bind(&input.name)
        .bind(&input.billing_customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Tenant for org '{}' already exists",
                    input.external_org_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create tenant: {}", e)),
        })?;

        timer.observe_duration();
        info!(tenant_id = %tenant.tenant_id, "Tenant created");

        Ok(tenant)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tenant"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT tenant_id, external_org_id, name, billing_customer_id, created_utc, updated_utc
            FROM tenants
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get tenant: {}", e)))?;

        timer.observe_duration();

        Ok(tenant)
    }
}

// =========================================================================
// Subscription Operations
// =========================================================================

#[async_trait]
impl SubscriptionRepository for Database {
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let query = format!(
            r#"
            INSERT INTO subscriptions (subscription_id, tenant_id, external_subscription_id, plan_code, status, current_period_start, current_period_end, trial_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let subscription = sqlx::query_as::<_, Subscription>(&query)
            .bind(Uuid::new_v4())
            .bind(input.tenant_id)
            .bind(&input.external_subscription_id)
            .bind(&input.plan_code)
            .bind(input.status.as_str())
            .bind(input.current_period_start)
            .bind(input.current_period_end)
            .bind(input.trial_end)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Subscription '{}' already exists",
                        input.external_subscription_id
                    ))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create subscription: {}",
                    e
                )),
            })?;

        timer.observe_duration();
        info!(
            subscription_id = %subscription.subscription_id,
            plan_code = %subscription.plan_code,
            "Subscription created"
        );

        Ok(subscription)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn find_active_subscription(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_subscription"])
            .start_timer();

        let live: Vec<String> = SubscriptionStatus::live_statuses()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let query = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE tenant_id = $1 AND status = ANY($2)
            ORDER BY current_period_start DESC, created_utc DESC
            LIMIT 1
            "#
        );
        let subscription = sqlx::query_as::<_, Subscription>(&query)
            .bind(tenant_id)
            .bind(live)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to find active subscription: {}",
                    e
                ))
            })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_subscription_by_external_id"])
            .start_timer();

        let query = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE external_subscription_id = $1
            "#
        );
        let subscription = sqlx::query_as::<_, Subscription>(&query)
            .bind(external_subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
            })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, state), fields(subscription_id = %subscription_id, status = state.status.as_str()))]
    async fn apply_provider_state(
        &self,
        subscription_id: Uuid,
        state: &ProviderSubscriptionState,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_provider_state"])
            .start_timer();

        let query = format!(
            r#"
            UPDATE subscriptions
            SET status = $2, current_period_start = $3, current_period_end = $4, trial_end = $5, updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let subscription = sqlx::query_as::<_, Subscription>(&query)
            .bind(subscription_id)
            .bind(state.status.as_str())
            .bind(state.current_period_start)
            .bind(state.current_period_end)
            .bind(state.trial_end)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription: {}", e))
            })?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
            })?;

        timer.observe_duration();
        info!(status = %subscription.status, "Subscription converged");

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id, status = status.as_str()))]
    async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_subscription_status"])
            .start_timer();

        let query = format!(
            r#"
            UPDATE subscriptions
            SET status = $2, updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let subscription = sqlx::query_as::<_, Subscription>(&query)
            .bind(subscription_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to update subscription status: {}",
                    e
                ))
            })?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
            })?;

        timer.observe_duration();

        Ok(subscription)
    }
}

// =========================================================================
// Usage Ledger Operations
// =========================================================================

#[async_trait]
impl UsageLedger for Database {
    #[instrument(skip(self, seed), fields(tenant_id = %seed.tenant_id, period_key = %seed.period_key, metric = %seed.metric))]
    async fn upsert_counter(&self, seed: &CounterSeed) -> Result<UsageCounter, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_counter"])
            .start_timer();

        let query = format!(
            r#"
            INSERT INTO usage_counters (counter_id, tenant_id, subscription_id, period_key, period_start, period_end, metric, included_units, used_units)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)
            ON CONFLICT (tenant_id, period_key, metric) DO UPDATE
            SET included_units = EXCLUDED.included_units,
                subscription_id = EXCLUDED.subscription_id,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                updated_utc = NOW()
            RETURNING {COUNTER_COLUMNS}
            "#
        );
        let counter = sqlx::query_as::<_, UsageCounter>(&query)
            .bind(Uuid::new_v4())
            .bind(seed.tenant_id)
            .bind(seed.subscription_id)
            .bind(&seed.period_key)
            .bind(seed.period_start)
            .bind(seed.period_end)
            .bind(&seed.metric)
            .bind(seed.included_units)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to upsert usage counter: {}", e))
            })?;

        timer.observe_duration();
        debug!(
            counter_id = %counter.counter_id,
            included_units = counter.included_units,
            used_units = counter.used_units,
            "Usage counter seeded"
        );

        Ok(counter)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn find_counter(
        &self,
        tenant_id: Uuid,
        period_key: &str,
        metric: &str,
    ) -> Result<Option<UsageCounter>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_counter"])
            .start_timer();

        let query = format!(
            r#"
            SELECT {COUNTER_COLUMNS}
            FROM usage_counters
            WHERE tenant_id = $1 AND period_key = $2 AND metric = $3
            "#
        );
        let counter = sqlx::query_as::<_, UsageCounter>(&query)
            .bind(tenant_id)
            .bind(period_key)
            .bind(metric)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get usage counter: {}", e))
            })?;

        timer.observe_duration();

        Ok(counter)
    }

    #[instrument(skip(self), fields(counter_id = %counter_id))]
    async fn find_counter_by_id(
        &self,
        counter_id: Uuid,
    ) -> Result<Option<UsageCounter>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_counter_by_id"])
            .start_timer();

        let query = format!(
            r#"
            SELECT {COUNTER_COLUMNS}
            FROM usage_counters
            WHERE counter_id = $1
            "#
        );
        let counter = sqlx::query_as::<_, UsageCounter>(&query)
            .bind(counter_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get usage counter: {}", e))
            })?;

        timer.observe_duration();

        Ok(counter)
    }

    #[instrument(skip(self))]
    async fn find_record_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<UsageRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_record_by_idempotency_key"])
            .start_timer();

        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM usage_records
            WHERE idempotency_key = $1
            "#
        );
        let record = sqlx::query_as::<_, UsageRecord>(&query)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to check idempotency: {}", e))
            })?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, counter_id = %input.counter_id, value = input.value))]
    async fn record_usage(&self, input: &NewUsageRecord) -> Result<RecordOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_usage"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // The unique idempotency key arbitrates concurrent retries: only the
        // winning insert returns a row.
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO usage_records (record_id, tenant_id, subscription_id, counter_id, metric, value, occurred_at, idempotency_key, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING record_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(input.subscription_id)
        .bind(input.counter_id)
        .bind(&input.metric)
        .bind(input.value)
        .bind(input.occurred_at)
        .bind(&input.idempotency_key)
        .bind(&input.metadata)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record usage: {}", e)))?;

        if inserted.is_none() {
            let query = format!(
                "SELECT {RECORD_COLUMNS} FROM usage_records WHERE idempotency_key = $1"
            );
            let existing = sqlx::query_as::<_, UsageRecord>(&query)
                .bind(&input.idempotency_key)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to read duplicate usage record: {}",
                        e
                    ))
                })?;
            tx.rollback().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to roll back: {}", e))
            })?;

            timer.observe_duration();
            debug!(record_id = %existing.record_id, "Duplicate idempotency key");
            return Ok(RecordOutcome::Duplicate(existing));
        }

        // The headroom guard keeps the sum inside BIGINT.
        let query = format!(
            r#"
            UPDATE usage_counters
            SET used_units = used_units + $2, updated_utc = NOW()
            WHERE counter_id = $1 AND used_units <= $3 - $2
            RETURNING {COUNTER_COLUMNS}
            "#
        );
        let incremented = sqlx::query_as::<_, UsageCounter>(&query)
            .bind(input.counter_id)
            .bind(input.value)
            .bind(i64::MAX)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to increment usage counter: {}", e))
            })?;

        let counter = match incremented {
            Some(counter) => counter,
            None => {
                let query = format!(
                    "SELECT {COUNTER_COLUMNS} FROM usage_counters WHERE counter_id = $1"
                );
                let current = sqlx::query_as::<_, UsageCounter>(&query)
                    .bind(input.counter_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to read usage counter: {}",
                            e
                        ))
                    })?
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!(
                            "Usage counter {} not found",
                            input.counter_id
                        ))
                    })?;
                tx.rollback().await.map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to roll back: {}", e))
                })?;

                timer.observe_duration();
                warn!(used_units = current.used_units, "Usage increment would overflow counter");
                return Ok(RecordOutcome::Overflow(current));
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit usage record: {}", e))
        })?;

        timer.observe_duration();
        info!(
            used_units = counter.used_units,
            included_units = counter.included_units,
            "Usage recorded"
        );

        Ok(RecordOutcome::Recorded(counter))
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    async fn list_usage_records(
        &self,
        tenant_id: Uuid,
        filter: &ListUsageFilter,
    ) -> Result<Vec<UsageRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_usage_records"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let records = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT ur.record_id, ur.tenant_id, ur.subscription_id, ur.counter_id, ur.metric, ur.value, ur.occurred_at, ur.idempotency_key, ur.metadata, ur.created_utc
            FROM usage_records ur
            JOIN usage_counters uc ON ur.counter_id = uc.counter_id
            WHERE ur.tenant_id = $1
              AND ($2::varchar IS NULL OR uc.period_key = $2)
              AND ($3::varchar IS NULL OR ur.metric = $3)
            ORDER BY ur.created_utc DESC, ur.record_id
            LIMIT $4
            "#,
        )
        .bind(tenant_id)
        .bind(&filter.period_key)
        .bind(&filter.metric)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list usage records: {}", e))
        })?;

        timer.observe_duration();

        Ok(records)
    }
}

// =========================================================================
// Webhook Event Operations
// =========================================================================

#[async_trait]
impl WebhookEventRepository for Database {
    #[instrument(skip(self, input), fields(event_id = %input.event_id, event_type = %input.event_type))]
    async fn insert_event_if_absent(&self, input: &NewWebhookEvent) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_webhook_event"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, payload, processed)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&input.event_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to queue webhook event: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn get_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_webhook_event"])
            .start_timer();

        let query = format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE event_id = $1");
        let event = sqlx::query_as::<_, WebhookEvent>(&query)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get webhook event: {}", e))
            })?;

        timer.observe_duration();

        Ok(event)
    }

    #[instrument(skip(self))]
    async fn claim_event(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_webhook_event"])
            .start_timer();

        // The row lock taken by UPDATE serializes competing claims.
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET claimed_until = $3
            WHERE event_id = $1
              AND processed = FALSE
              AND (claimed_until IS NULL OR claimed_until <= $2)
            "#,
        )
        .bind(event_id)
        .bind(now)
        .bind(lease_until)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to claim webhook event: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_event(&self, event_id: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["release_webhook_event"])
            .start_timer();

        sqlx::query("UPDATE webhook_events SET claimed_until = NULL WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to release webhook event: {}", e))
            })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_processed(
        &self,
        event_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_webhook_processed"])
            .start_timer();

        // Only the first transition stamps processed_at.
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = TRUE, processed_at = $2, claimed_until = NULL
            WHERE event_id = $1 AND processed = FALSE
            "#,
        )
        .bind(event_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark webhook processed: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_pending_events(&self, limit: i64) -> Result<Vec<WebhookEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_pending_webhook_events"])
            .start_timer();

        let query = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM webhook_events
            WHERE processed = FALSE
            ORDER BY received_utc, event_id
            LIMIT $1
            "#
        );
        let events = sqlx::query_as::<_, WebhookEvent>(&query)
            .bind(limit.clamp(1, 500))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to list pending webhook events: {}",
                    e
                ))
            })?;

        timer.observe_duration();

        Ok(events)
    }
}

#[async_trait]
impl MeteringStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}
