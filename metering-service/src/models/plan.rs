//! Plan configuration: plan code to included units per metric.

use crate::models::DEFAULT_METRIC;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Plan codes sold by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanCode {
    Trial,
    Starter,
    Growth,
    Pro,
}

impl PlanCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanCode::Trial => "trial",
            PlanCode::Starter => "starter",
            PlanCode::Growth => "growth",
            PlanCode::Pro => "pro",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "trial" => Some(PlanCode::Trial),
            "starter" => Some(PlanCode::Starter),
            "growth" => Some(PlanCode::Growth),
            "pro" => Some(PlanCode::Pro),
            _ => None,
        }
    }
}

/// Included units per metric for one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanLimits(HashMap<String, i64>);

impl PlanLimits {
    pub fn new(limits: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self(limits.into_iter().collect())
    }

    /// Quota ceiling for a metric; metrics the plan does not list get none.
    pub fn included_units(&self, metric: &str) -> i64 {
        self.0.get(metric).copied().unwrap_or(0)
    }
}

/// The plan configuration table consulted by seeding and recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTable(HashMap<PlanCode, PlanLimits>);

impl PlanTable {
    pub fn new(plans: impl IntoIterator<Item = (PlanCode, PlanLimits)>) -> Self {
        Self(plans.into_iter().collect())
    }

    /// Default catalogue: a single metered resource per plan.
    pub fn standard() -> Self {
        let single = |units: i64| PlanLimits::new([(DEFAULT_METRIC.to_string(), units)]);
        Self::new([
            (PlanCode::Trial, single(30)),
            (PlanCode::Starter, single(1_000)),
            (PlanCode::Growth, single(10_000)),
            (PlanCode::Pro, single(100_000)),
        ])
    }

    /// Limits for a stored plan code, or `None` when the code is unknown or
    /// not configured.
    pub fn limits(&self, plan_code: &str) -> Option<&PlanLimits> {
        PlanCode::from_string(plan_code).and_then(|code| self.0.get(&code))
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        Self::standard()
    }
}
