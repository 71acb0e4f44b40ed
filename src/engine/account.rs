//! Per-tenant ledger state: accounts, quota records, idempotency records.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::policy::Plan;

/// The (limit, used, overage) triple for one billable service.
///
/// `overage` is derived state: it is recomputed from `used` and `limit` on
/// every mutation and never drifts independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub limit: f64,
    pub used: f64,
    pub overage: f64,
    pub last_updated: DateTime<Utc>,
}

impl QuotaRecord {
    pub fn new(limit: f64, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            used: 0.0,
            overage: 0.0,
            last_updated: now,
        }
    }

    /// Apply a signed delta to `used`, clamping at zero, and recompute
    /// `overage`. Returns the amount actually applied (a credit larger than
    /// the current balance is truncated).
    pub fn apply(&mut self, delta: f64, now: DateTime<Utc>) -> f64 {
        let previous = self.used;
        self.used = (self.used + delta).max(0.0);
        self.overage = (self.used - self.limit).max(0.0);
        self.last_updated = now;
        self.used - previous
    }

    pub fn percent_used(&self) -> f64 {
        if self.limit > 0.0 {
            self.used * 100.0 / self.limit
        } else {
            0.0
        }
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.used = 0.0;
        self.overage = 0.0;
        self.last_updated = now;
    }
}

/// Whether the account accepts mutations. Deactivation is a flag, never a
/// hard delete, so historical usage events stay resolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Deactivated,
}

/// Which side of the ledger an operation id was applied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Debit,
    Credit,
}

/// Marker that an operation id has been durably applied.
///
/// Stored inside the account so it is persisted in the same atomic unit as
/// the counters it guards: a retry either replays the stored result or
/// applies exactly once, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub service_key: String,
    pub units: f64,
    pub result: QuotaRecord,
    pub applied_at: DateTime<Utc>,
}

/// Closed-cycle snapshot retained by `rollover_cycle` for history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleArchive {
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub quotas: BTreeMap<String, QuotaRecord>,
    pub total_overage_cost: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// One tenant's ledger state: one set of quotas on one billing plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub status: AccountStatus,
    /// Service key -> quota record. Keys are fixed at creation time from the
    /// plan; unknown keys are rejected, not silently created.
    pub quotas: BTreeMap<String, QuotaRecord>,
    /// Running monetary overage total for the current cycle.
    pub total_overage_cost: Decimal,
    /// Half-open cycle interval `[start, end)`.
    pub billing_cycle_start: DateTime<Utc>,
    pub billing_cycle_end: DateTime<Utc>,
    /// Idempotency records for the current cycle, cleared on rollover.
    pub operations: HashMap<String, OperationRecord>,
    pub archived_cycles: Vec<CycleArchive>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Seed a fresh account from a plan: every plan service gets a zeroed
    /// quota record and the first cycle window opens at `now`.
    pub fn from_plan(id: impl Into<String>, plan: &Plan, now: DateTime<Utc>) -> Self {
        let quotas = plan
            .quotas
            .iter()
            .map(|(key, limit)| (key.clone(), QuotaRecord::new(*limit, now)))
            .collect();

        Self {
            id: id.into(),
            plan_id: plan.id.clone(),
            plan_name: plan.name.clone(),
            status: AccountStatus::Active,
            quotas,
            total_overage_cost: Decimal::ZERO,
            billing_cycle_start: now,
            billing_cycle_end: now + Duration::days(plan.cycle_days),
            operations: HashMap::new(),
            archived_cycles: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// True once `now` has left the `[start, end)` cycle window.
    pub fn cycle_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.billing_cycle_end
    }

    pub fn quota(&self, service_key: &str) -> Option<&QuotaRecord> {
        self.quotas.get(service_key)
    }

    /// Archive the current cycle and open the next one. After a cycle has
    /// elapsed the new window starts at the prior end, advancing by whole
    /// cycle lengths until `now` falls inside it; a forced early rollover
    /// opens a fresh window at `now`.
    pub fn rollover(&mut self, cycle_days: i64, now: DateTime<Utc>) {
        self.archived_cycles.push(CycleArchive {
            cycle_start: self.billing_cycle_start,
            cycle_end: self.billing_cycle_end,
            quotas: self.quotas.clone(),
            total_overage_cost: self.total_overage_cost,
            closed_at: now,
        });

        for quota in self.quotas.values_mut() {
            quota.reset(now);
        }
        self.total_overage_cost = Decimal::ZERO;
        self.operations.clear();

        let length = Duration::days(cycle_days.max(1));
        if now < self.billing_cycle_end {
            // Forced early: the prior end is still in the future.
            self.billing_cycle_start = now;
        } else {
            self.billing_cycle_start = self.billing_cycle_end;
        }
        self.billing_cycle_end = self.billing_cycle_start + length;
        while self.billing_cycle_end <= now {
            self.billing_cycle_start = self.billing_cycle_end;
            self.billing_cycle_end = self.billing_cycle_start + length;
        }

        self.updated_at = now;
    }
}
