//! Services module for metering-service.

pub mod billing_provider;
pub mod clock;
pub mod database;
pub mod memory;
pub mod metrics;
pub mod period;
pub mod quota;
pub mod store;
pub mod subscription_sync;
pub mod usage;
pub mod webhook_intake;
pub mod webhook_processor;

pub use billing_provider::{verify_signature_header, BillingProvider, HttpBillingProvider};
pub use clock::{Clock, SystemClock};
pub use database::Database;
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use period::{PeriodSeeder, SeedResult};
pub use quota::{Entitlement, QuotaDecision, QuotaEvaluator};
pub use store::{
    MeteringStore, SubscriptionRepository, TenantRepository, UsageLedger, WebhookEventRepository,
};
pub use subscription_sync::SubscriptionSync;
pub use usage::{RecordUsage, UsageRecorder, UsageResult};
pub use webhook_intake::{IntakeReceipt, WebhookIntake};
pub use webhook_processor::{Convergence, WebhookProcessor};

use crate::models::PlanTable;
use std::sync::Arc;

/// All metering services wired over one store.
#[derive(Clone)]
pub struct MeteringServices {
    pub store: Arc<dyn MeteringStore>,
    pub seeder: PeriodSeeder,
    pub quota: QuotaEvaluator,
    pub recorder: UsageRecorder,
    pub intake: WebhookIntake,
    pub processor: WebhookProcessor,
    pub sync: SubscriptionSync,
}

impl MeteringServices {
    pub fn new(
        store: Arc<dyn MeteringStore>,
        provider: Arc<dyn BillingProvider>,
        plans: PlanTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let plans = Arc::new(plans);
        let seeder = PeriodSeeder::new(store.clone(), plans.clone());

        Self {
            quota: QuotaEvaluator::new(store.clone(), plans, clock.clone()),
            recorder: UsageRecorder::new(store.clone(), seeder.clone(), clock.clone()),
            intake: WebhookIntake::new(store.clone(), provider.clone(), clock.clone()),
            processor: WebhookProcessor::new(store.clone(), clock),
            sync: SubscriptionSync::new(store.clone(), provider),
            seeder,
            store,
        }
    }
}
