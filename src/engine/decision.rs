//! Read-only projections and pre-flight decision types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountStatus;

/// Hypothetical post-operation state computed by `estimate`; nothing is
/// mutated to produce one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub service_key: String,
    pub requested: f64,
    pub current_used: f64,
    pub limit: f64,
    pub projected_used: f64,
    pub projected_overage: f64,
    /// Projected overage units priced at the catalog's per-unit rate.
    pub projected_cost: Decimal,
    pub would_exceed: bool,
}

/// Which enforcement band a projected operation lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTier {
    /// Fits within the plan limit.
    Normal,
    /// Past the limit but inside the overage buffer; allowed, billed.
    Overage,
    /// Past the buffer ceiling; denied.
    HardBlock,
}

/// Allow/deny verdict from `can_execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub tier: DecisionTier,
    /// Set whenever projected usage crosses the soft-warn threshold,
    /// independently of allow/deny.
    pub soft_warn: bool,
    pub reason: Option<String>,
    pub current_used: f64,
    pub limit: f64,
    pub requested: f64,
    pub projected_overage: f64,
    pub projected_cost: Decimal,
}

impl Decision {
    pub fn is_normal(&self) -> bool {
        self.tier == DecisionTier::Normal
    }
}

/// Health band for one service within a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Ok,
    Warning,
    Critical,
    Blocked,
}

/// Per-service view inside an [`AccountSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUsage {
    pub key: String,
    pub name: String,
    pub used: f64,
    pub limit: f64,
    pub overage: f64,
    pub percent_used: f64,
    pub overage_cost: Decimal,
    pub status: ServiceStatus,
}

/// Full per-service + aggregate view for dashboards and alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub plan_name: String,
    pub billing_cycle_start: DateTime<Utc>,
    pub billing_cycle_end: DateTime<Utc>,
    pub services: Vec<ServiceUsage>,
    pub total_overage_cost: Decimal,
    pub overall_percent_used: f64,
    pub warnings: Vec<String>,
}

/// Minimal status snapshot for cheap polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: String,
    pub plan_id: String,
    pub status: AccountStatus,
    pub billing_cycle_start: DateTime<Utc>,
    pub billing_cycle_end: DateTime<Utc>,
    /// True once `now` has passed the cycle end; the account needs a
    /// rollover before the next cycle's accounting.
    pub cycle_elapsed: bool,
    pub total_overage_cost: Decimal,
    /// (service key, used, limit) per service.
    pub services: Vec<(String, f64, f64)>,
}
