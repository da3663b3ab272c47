//! Period seeding integration tests.

mod common;

use common::TestApp;
use metering_service::models::{
    PlanCode, PlanLimits, PlanTable, RecordOutcome, SubscriptionStatus, DEFAULT_METRIC,
};
use metering_service::services::{RecordUsage, SubscriptionRepository, UsageLedger};
use metering_service::MeteringError;
use uuid::Uuid;

fn record(tenant_id: Uuid, value: i64, key: &str) -> RecordUsage {
    RecordUsage {
        tenant_id,
        metric: DEFAULT_METRIC.to_string(),
        value,
        occurred_at: None,
        idempotency_key: key.to_string(),
        metadata: None,
    }
}

#[tokio::test]
async fn seed_creates_counter_for_current_period() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.trial_tenant().await;

    let seeded = app.services.seeder.seed(tenant.tenant_id).await.unwrap();

    assert_eq!(seeded.period_key, "2025-01");
    assert_eq!(seeded.remaining, 30);

    let counter = app
        .store
        .find_counter(tenant.tenant_id, "2025-01", DEFAULT_METRIC)
        .await
        .unwrap()
        .expect("counter should exist");
    assert_eq!(counter.included_units, 30);
    assert_eq!(counter.used_units, 0);
}

#[tokio::test]
async fn reseed_preserves_used_units() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.trial_tenant().await;

    app.services.seeder.seed(tenant.tenant_id).await.unwrap();
    app.services
        .recorder
        .record(record(tenant.tenant_id, 12, "req-reseed"))
        .await
        .unwrap();

    let reseeded = app.services.seeder.seed(tenant.tenant_id).await.unwrap();
    assert_eq!(reseeded.remaining, 18);

    let counter = app
        .store
        .find_counter(tenant.tenant_id, "2025-01", DEFAULT_METRIC)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counter.used_units, 12);
}

#[tokio::test]
async fn reseed_refreshes_included_units_from_plan_table() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.trial_tenant().await;

    app.services
        .recorder
        .record(record(tenant.tenant_id, 25, "req-refresh"))
        .await
        .unwrap();

    // Plan configuration shrinks below current usage.
    let smaller = PlanTable::new([(
        PlanCode::Trial,
        PlanLimits::new([(DEFAULT_METRIC.to_string(), 20)]),
    )]);
    let reseeded = app
        .services_with_plans(smaller)
        .seeder
        .seed(tenant.tenant_id)
        .await
        .unwrap();

    // Raw included - used, not clamped.
    assert_eq!(reseeded.remaining, -5);
}

#[tokio::test]
async fn seed_unknown_tenant_fails() {
    let app = TestApp::spawn().await;

    let err = app.services.seeder.seed(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, MeteringError::TenantNotFound(_)));
}

#[tokio::test]
async fn seed_without_active_subscription_fails() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant().await;
    app.create_subscription(tenant.tenant_id, "starter", SubscriptionStatus::Canceled)
        .await;

    let err = app.services.seeder.seed(tenant.tenant_id).await.unwrap_err();
    assert!(matches!(err, MeteringError::NoActiveSubscription(id) if id == tenant.tenant_id));
}

#[tokio::test]
async fn seed_with_unconfigured_plan_code_is_conflict() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant().await;
    app.create_subscription(tenant.tenant_id, "enterprise", SubscriptionStatus::Active)
        .await;

    let err = app.services.seeder.seed(tenant.tenant_id).await.unwrap_err();
    assert!(matches!(err, MeteringError::InvalidPlanCode { ref plan_code, .. } if plan_code == "enterprise"));

    let response = app
        .client
        .post(app.url("/v1/periods/seed"))
        .header("X-Tenant-ID", tenant.tenant_id.to_string())
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn seed_uses_latest_live_subscription() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant().await;
    app.create_subscription(tenant.tenant_id, "trial", SubscriptionStatus::Trialing)
        .await;

    // A newer period on a paid plan supersedes the trial.
    app.store
        .create_subscription(&metering_service::models::CreateSubscription {
            tenant_id: tenant.tenant_id,
            external_subscription_id: "sub_newer".into(),
            plan_code: "starter".into(),
            status: SubscriptionStatus::Active,
            current_period_start: common::period_end(),
            current_period_end: common::period_end() + chrono::Duration::days(28),
            trial_end: None,
        })
        .await
        .unwrap();

    let seeded = app.services.seeder.seed(tenant.tenant_id).await.unwrap();
    assert_eq!(seeded.period_key, "2025-02");
    assert_eq!(seeded.remaining, 1_000);
}

#[tokio::test]
async fn seed_over_http() {
    let app = TestApp::spawn().await;
    let (tenant, _) = app.trial_tenant().await;

    let response = app
        .client
        .post(app.url("/v1/periods/seed"))
        .header("X-Tenant-ID", tenant.tenant_id.to_string())
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["period_key"], "2025-01");
    assert_eq!(body["remaining"], 30);

    let response = app
        .client
        .post(app.url("/v1/periods/seed"))
        .header("X-Tenant-ID", Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn ledger_counts_a_single_increment_per_key() {
    let app = TestApp::spawn().await;
    let (tenant, subscription) = app.trial_tenant().await;
    app.services.seeder.seed(tenant.tenant_id).await.unwrap();
    let counter = app
        .store
        .find_counter(tenant.tenant_id, "2025-01", DEFAULT_METRIC)
        .await
        .unwrap()
        .unwrap();

    let input = metering_service::models::NewUsageRecord {
        tenant_id: tenant.tenant_id,
        subscription_id: subscription.subscription_id,
        counter_id: counter.counter_id,
        metric: DEFAULT_METRIC.to_string(),
        value: 3,
        occurred_at: common::period_start(),
        idempotency_key: "ledger-key".to_string(),
        metadata: None,
    };

    assert!(matches!(
        app.store.record_usage(&input).await.unwrap(),
        RecordOutcome::Recorded(_)
    ));
    assert!(matches!(
        app.store.record_usage(&input).await.unwrap(),
        RecordOutcome::Duplicate(_)
    ));
    assert_eq!(app.store.usage_record_count().await, 1);
}
