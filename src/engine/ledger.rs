//! The Ledger Engine: quota gating, idempotent debits/credits, rollover.
//!
//! Mutating operations for a given account are routed through a per-account
//! lock, so two concurrent debits can never both read the same `used` and
//! write a stale sum. Reads bypass the locks entirely and work on the
//! store's self-consistent snapshots.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::account::{Account, AccountStatus, OperationKind, OperationRecord, QuotaRecord};
use super::decision::{
    AccountState, AccountSummary, Decision, DecisionTier, Estimate, ServiceStatus, ServiceUsage,
};
use super::{LedgerError, LedgerResult};
use crate::policy::{DEFAULT_CYCLE_DAYS, PlanCatalog};
use crate::store::AccountStore;

/// Monetary figures are kept at 6 decimal places, banker's rounding.
const COST_DECIMAL_PLACES: u32 = 6;

/// Default cap on retained debit/credit history entries per account.
pub const DEFAULT_HISTORY_LIMIT: usize = 1_000;

fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven)
}

fn decimal_from(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// One debit or credit as the engine applied it, for audit queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub id: Uuid,
    pub service_key: String,
    pub kind: OperationKind,
    /// Signed units actually applied: positive for debits, negative for
    /// credits (clamped credits record only what was reversed).
    pub units: f64,
    pub cost: Decimal,
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Usage-metering and quota-enforcement ledger.
pub struct LedgerEngine {
    store: Arc<dyn AccountStore>,
    catalog: PlanCatalog,
    /// Per-account write locks; readers never touch these.
    locks: DashMap<String, Arc<Mutex<()>>>,
    history: DashMap<String, VecDeque<UsageEntry>>,
    history_limit: usize,
}

impl LedgerEngine {
    pub fn builder() -> LedgerEngineBuilder {
        LedgerEngineBuilder::new()
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.store
            .load(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound {
                id: account_id.to_string(),
            })
    }

    fn validate_units(units: f64) -> LedgerResult<()> {
        if !units.is_finite() || units < 0.0 {
            return Err(LedgerError::validation(format!(
                "units must be a non-negative finite number, got {units}"
            )));
        }
        Ok(())
    }

    fn validate_operation_id(operation_id: &str) -> LedgerResult<()> {
        if operation_id.trim().is_empty() {
            return Err(LedgerError::validation("operation id must not be empty"));
        }
        Ok(())
    }

    fn push_history(&self, account_id: &str, entry: UsageEntry) {
        let mut log = self.history.entry(account_id.to_string()).or_default();
        log.push_back(entry);
        while log.len() > self.history_limit {
            log.pop_front();
        }
    }

    // ────────────────────────────────────────────────────────────
    // Account lifecycle
    // ────────────────────────────────────────────────────────────

    /// Provision an account, seeding quotas from the plan.
    pub async fn create_account(&self, account_id: &str, plan_id: &str) -> LedgerResult<Account> {
        if account_id.trim().is_empty() {
            return Err(LedgerError::validation("account id must not be empty"));
        }
        let plan = self
            .catalog
            .resolve(plan_id)
            .ok_or_else(|| LedgerError::validation(format!("unknown plan: {plan_id}")))?
            .clone();

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        if self.store.load(account_id).await?.is_some() {
            return Err(LedgerError::validation(format!(
                "account already exists: {account_id}"
            )));
        }

        let account = Account::from_plan(account_id, &plan, Utc::now());
        self.store.save(&account).await?;
        info!(account_id, plan_id, "Account created");
        Ok(account)
    }

    /// Switch plans in place: limits change, current usage is kept and
    /// overage recomputed against the new limits.
    pub async fn change_plan(&self, account_id: &str, plan_id: &str) -> LedgerResult<Account> {
        let plan = self
            .catalog
            .resolve(plan_id)
            .ok_or_else(|| LedgerError::validation(format!("unknown plan: {plan_id}")))?
            .clone();

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load_required(account_id).await?;
        let now = Utc::now();
        account.plan_id = plan.id.clone();
        account.plan_name = plan.name.clone();
        for (key, quota) in account.quotas.iter_mut() {
            if let Some(limit) = plan.limit_for(key) {
                quota.limit = limit;
                quota.overage = (quota.used - quota.limit).max(0.0);
                quota.last_updated = now;
            }
        }
        account.updated_at = now;
        self.store.save(&account).await?;
        info!(account_id, plan_id, "Plan changed");
        Ok(account)
    }

    /// Flip the activation flag; deactivated accounts reject mutation but
    /// stay readable for history.
    pub async fn set_status(&self, account_id: &str, status: AccountStatus) -> LedgerResult<Account> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load_required(account_id).await?;
        account.status = status;
        account.updated_at = Utc::now();
        self.store.save(&account).await?;
        Ok(account)
    }

    // ────────────────────────────────────────────────────────────
    // Pre-flight gating (read-only)
    // ────────────────────────────────────────────────────────────

    /// Hypothetical post-operation state; mutates nothing, takes no lock.
    pub async fn estimate(
        &self,
        account_id: &str,
        service_key: &str,
        units: f64,
    ) -> LedgerResult<Estimate> {
        Self::validate_units(units)?;
        let account = self.load_required(account_id).await?;
        let quota = account
            .quota(service_key)
            .ok_or_else(|| LedgerError::UnknownServiceKey {
                key: service_key.to_string(),
            })?;

        let projected_used = quota.used + units;
        let projected_overage = (projected_used - quota.limit).max(0.0);
        let projected_cost = round_cost(
            decimal_from(projected_overage) * self.catalog.overage_rate(service_key),
        );

        Ok(Estimate {
            service_key: service_key.to_string(),
            requested: units,
            current_used: quota.used,
            limit: quota.limit,
            projected_used,
            projected_overage,
            projected_cost,
            would_exceed: projected_used > quota.limit,
        })
    }

    /// Allow/deny verdict for a prospective operation.
    ///
    /// Quota exhaustion is a decision, never an error: a denied request
    /// returns `Ok` with `allowed == false`.
    pub async fn can_execute(
        &self,
        account_id: &str,
        service_key: &str,
        units: f64,
    ) -> LedgerResult<Decision> {
        Self::validate_units(units)?;
        let account = self.load_required(account_id).await?;
        let plan = self.catalog.resolve(&account.plan_id);
        let overage_buffer = plan.map(|p| p.overage_buffer).unwrap_or(0.0);
        let soft_warn_threshold = plan
            .map(|p| p.soft_warn_threshold)
            .unwrap_or(crate::policy::DEFAULT_SOFT_WARN_THRESHOLD);

        let Some(quota) = account.quota(service_key) else {
            return Ok(Decision {
                allowed: false,
                tier: DecisionTier::HardBlock,
                soft_warn: false,
                reason: Some(format!("Unknown service key: {service_key}")),
                current_used: 0.0,
                limit: 0.0,
                requested: units,
                projected_overage: 0.0,
                projected_cost: Decimal::ZERO,
            });
        };

        let projected_used = quota.used + units;
        let max_allowed = quota.limit * (1.0 + overage_buffer);
        let soft_warn = quota.limit > 0.0 && projected_used >= soft_warn_threshold * quota.limit;
        let projected_overage = (projected_used - quota.limit).max(0.0);
        let projected_cost = round_cost(
            decimal_from(projected_overage) * self.catalog.overage_rate(service_key),
        );

        let decision = if projected_used <= quota.limit {
            Decision {
                allowed: true,
                tier: DecisionTier::Normal,
                soft_warn,
                reason: None,
                current_used: quota.used,
                limit: quota.limit,
                requested: units,
                projected_overage: 0.0,
                projected_cost: Decimal::ZERO,
            }
        } else if projected_used <= max_allowed {
            Decision {
                allowed: true,
                tier: DecisionTier::Overage,
                soft_warn,
                reason: Some(format!(
                    "Within overage buffer: {projected_overage:.2} units over limit, projected cost {projected_cost}"
                )),
                current_used: quota.used,
                limit: quota.limit,
                requested: units,
                projected_overage,
                projected_cost,
            }
        } else {
            warn!(
                account_id,
                service_key,
                units,
                projected_used,
                max_allowed,
                "Request denied: past overage ceiling"
            );
            Decision {
                allowed: false,
                tier: DecisionTier::HardBlock,
                soft_warn,
                reason: Some(format!(
                    "Would exceed allowed ceiling by {:.2} units (max overage {:.0}%)",
                    projected_used - max_allowed,
                    overage_buffer * 100.0
                )),
                current_used: quota.used,
                limit: quota.limit,
                requested: units,
                projected_overage,
                projected_cost,
            }
        };

        Ok(decision)
    }

    // ────────────────────────────────────────────────────────────
    // Accounting (mutating, atomic, idempotent)
    // ────────────────────────────────────────────────────────────

    /// Debit `units` against a service quota.
    ///
    /// Replaying a known debit id returns the originally recorded result
    /// without mutating anything; reusing a credit's id is rejected. Quota
    /// is deliberately not re-checked here: usage already incurred must
    /// always be recorded, even past the limit.
    pub async fn record_usage(
        &self,
        account_id: &str,
        service_key: &str,
        units: f64,
        operation_id: &str,
        cost: Decimal,
    ) -> LedgerResult<QuotaRecord> {
        Self::validate_units(units)?;
        Self::validate_operation_id(operation_id)?;
        if cost < Decimal::ZERO {
            return Err(LedgerError::validation("cost must not be negative"));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load_required(account_id).await?;
        if !account.is_active() {
            return Err(LedgerError::validation(format!(
                "account is deactivated: {account_id}"
            )));
        }

        if let Some(existing) = account.operations.get(operation_id) {
            return match existing.kind {
                OperationKind::Debit => {
                    debug!(account_id, operation_id, "Replaying recorded debit");
                    Ok(existing.result.clone())
                }
                OperationKind::Credit => Err(LedgerError::InvalidOperationId {
                    id: operation_id.to_string(),
                    message: "already applied as a credit".into(),
                }),
            };
        }

        let now = Utc::now();
        let quota = account.quotas.get_mut(service_key).ok_or_else(|| {
            LedgerError::UnknownServiceKey {
                key: service_key.to_string(),
            }
        })?;

        let previous_overage = quota.overage;
        quota.apply(units, now);
        let added_overage = quota.overage - previous_overage;

        // Only the portion of the cost attributable to newly-overage units
        // is billed as overage.
        let overage_cost = if added_overage > 0.0 && units > 0.0 {
            round_cost(cost * decimal_from(added_overage / units))
        } else {
            Decimal::ZERO
        };
        account.total_overage_cost = round_cost(account.total_overage_cost + overage_cost);

        let result = account
            .quota(service_key)
            .cloned()
            .unwrap_or_else(|| QuotaRecord::new(0.0, now));
        account.operations.insert(
            operation_id.to_string(),
            OperationRecord {
                kind: OperationKind::Debit,
                service_key: service_key.to_string(),
                units,
                result: result.clone(),
                applied_at: now,
            },
        );
        account.updated_at = now;

        // Counters and the idempotency record land in one save.
        self.store.save(&account).await?;

        self.push_history(
            account_id,
            UsageEntry {
                id: Uuid::new_v4(),
                service_key: service_key.to_string(),
                kind: OperationKind::Debit,
                units,
                cost,
                operation_id: operation_id.to_string(),
                timestamp: now,
            },
        );

        debug!(
            account_id,
            service_key,
            units,
            operation_id,
            used = result.used,
            overage = result.overage,
            %overage_cost,
            "Usage recorded"
        );
        Ok(result)
    }

    /// Reverse a prior debit, clamped at zero.
    ///
    /// A credit is its own idempotency-keyed operation: it requires a fresh
    /// operation id, and reusing the debit's id is rejected since that id
    /// already means "debit applied".
    pub async fn credit_usage(
        &self,
        account_id: &str,
        service_key: &str,
        units: f64,
        operation_id: &str,
    ) -> LedgerResult<QuotaRecord> {
        Self::validate_units(units)?;
        Self::validate_operation_id(operation_id)?;

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load_required(account_id).await?;
        if !account.is_active() {
            return Err(LedgerError::validation(format!(
                "account is deactivated: {account_id}"
            )));
        }

        if let Some(existing) = account.operations.get(operation_id) {
            return match existing.kind {
                OperationKind::Credit => {
                    debug!(account_id, operation_id, "Replaying recorded credit");
                    Ok(existing.result.clone())
                }
                OperationKind::Debit => Err(LedgerError::InvalidOperationId {
                    id: operation_id.to_string(),
                    message: "already applied as a debit".into(),
                }),
            };
        }

        let now = Utc::now();
        let quota = account.quotas.get_mut(service_key).ok_or_else(|| {
            LedgerError::UnknownServiceKey {
                key: service_key.to_string(),
            }
        })?;

        let applied = quota.apply(-units, now);

        let result = account
            .quota(service_key)
            .cloned()
            .unwrap_or_else(|| QuotaRecord::new(0.0, now));
        account.operations.insert(
            operation_id.to_string(),
            OperationRecord {
                kind: OperationKind::Credit,
                service_key: service_key.to_string(),
                units,
                result: result.clone(),
                applied_at: now,
            },
        );
        account.updated_at = now;

        self.store.save(&account).await?;

        self.push_history(
            account_id,
            UsageEntry {
                id: Uuid::new_v4(),
                service_key: service_key.to_string(),
                kind: OperationKind::Credit,
                units: applied,
                cost: Decimal::ZERO,
                operation_id: operation_id.to_string(),
                timestamp: now,
            },
        );

        debug!(
            account_id,
            service_key,
            credited = -applied,
            operation_id,
            used = result.used,
            "Usage credited"
        );
        Ok(result)
    }

    // ────────────────────────────────────────────────────────────
    // Views (read-only)
    // ────────────────────────────────────────────────────────────

    /// Per-service and aggregate usage view. Never mutates counters or
    /// `last_updated`.
    pub async fn get_summary(&self, account_id: &str) -> LedgerResult<AccountSummary> {
        let account = self.load_required(account_id).await?;
        let plan = self.catalog.resolve(&account.plan_id);
        let overage_buffer = plan.map(|p| p.overage_buffer).unwrap_or(0.0);
        let soft_warn = plan
            .map(|p| p.soft_warn_threshold)
            .unwrap_or(crate::policy::DEFAULT_SOFT_WARN_THRESHOLD);
        let hard_warn = plan
            .map(|p| p.hard_warn_threshold)
            .unwrap_or(crate::policy::DEFAULT_HARD_WARN_THRESHOLD);

        let mut services = Vec::with_capacity(account.quotas.len());
        let mut warnings = Vec::new();
        let mut percent_sum = 0.0;

        for (key, quota) in &account.quotas {
            let name = self
                .catalog
                .service(key)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| key.clone());
            let percent_used = quota.percent_used();
            let overage_cost =
                round_cost(decimal_from(quota.overage) * self.catalog.overage_rate(key));

            let status = if percent_used >= (1.0 + overage_buffer) * 100.0 {
                warnings.push(format!("{name} is blocked - quota exceeded"));
                ServiceStatus::Blocked
            } else if percent_used >= hard_warn * 100.0 {
                warnings.push(format!(
                    "{name} is at {percent_used:.1}% - approaching limit"
                ));
                ServiceStatus::Critical
            } else if percent_used >= soft_warn * 100.0 {
                warnings.push(format!("{name} is at {percent_used:.1}%"));
                ServiceStatus::Warning
            } else {
                ServiceStatus::Ok
            };

            services.push(ServiceUsage {
                key: key.clone(),
                name,
                used: quota.used,
                limit: quota.limit,
                overage: quota.overage,
                percent_used,
                overage_cost,
                status,
            });
            percent_sum += percent_used;
        }

        let overall_percent_used = if services.is_empty() {
            0.0
        } else {
            percent_sum / services.len() as f64
        };

        Ok(AccountSummary {
            account_id: account.id,
            plan_name: account.plan_name,
            billing_cycle_start: account.billing_cycle_start,
            billing_cycle_end: account.billing_cycle_end,
            services,
            total_overage_cost: account.total_overage_cost,
            overall_percent_used,
            warnings,
        })
    }

    /// Minimal status snapshot for cheap polling.
    pub async fn get_state(&self, account_id: &str) -> LedgerResult<AccountState> {
        let account = self.load_required(account_id).await?;
        let now = Utc::now();
        Ok(AccountState {
            account_id: account.id.clone(),
            plan_id: account.plan_id.clone(),
            status: account.status,
            billing_cycle_start: account.billing_cycle_start,
            billing_cycle_end: account.billing_cycle_end,
            cycle_elapsed: account.cycle_elapsed(now),
            total_overage_cost: account.total_overage_cost,
            services: account
                .quotas
                .iter()
                .map(|(k, q)| (k.clone(), q.used, q.limit))
                .collect(),
        })
    }

    /// Full account record (cloned snapshot).
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Account> {
        self.load_required(account_id).await
    }

    /// Most-recent-first debit/credit log for the account.
    pub fn usage_history(&self, account_id: &str, limit: usize) -> Vec<UsageEntry> {
        self.history
            .get(account_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    // ────────────────────────────────────────────────────────────
    // Cycle lifecycle
    // ────────────────────────────────────────────────────────────

    /// Close the current billing cycle and open the next one.
    ///
    /// Fails with `BillingCycleNotYetElapsed` before the cycle end unless
    /// `force` is set (administrative override). Archives the closed
    /// cycle, zeroes counters and the overage total, clears the
    /// idempotency set (operation ids are free to repeat across cycles),
    /// and advances the window.
    pub async fn rollover_cycle(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
        force: bool,
    ) -> LedgerResult<Account> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load_required(account_id).await?;
        if !account.cycle_elapsed(now) && !force {
            return Err(LedgerError::BillingCycleNotYetElapsed {
                ends_at: account.billing_cycle_end,
            });
        }

        let cycle_days = self
            .catalog
            .resolve(&account.plan_id)
            .map(|p| p.cycle_days)
            .unwrap_or(DEFAULT_CYCLE_DAYS);
        account.rollover(cycle_days, now);
        self.store.save(&account).await?;

        info!(
            account_id,
            cycle_start = %account.billing_cycle_start,
            cycle_end = %account.billing_cycle_end,
            forced = force,
            "Billing cycle rolled over"
        );
        Ok(account)
    }
}

/// Builder for [`LedgerEngine`].
pub struct LedgerEngineBuilder {
    store: Option<Arc<dyn AccountStore>>,
    catalog: Option<PlanCatalog>,
    history_limit: usize,
}

impl LedgerEngineBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            catalog: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn catalog(mut self, catalog: PlanCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn build(self) -> LedgerEngine {
        LedgerEngine {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(crate::store::MemoryStore::new())),
            catalog: self
                .catalog
                .unwrap_or_else(|| PlanCatalog::builder().with_defaults().build()),
            locks: DashMap::new(),
            history: DashMap::new(),
            history_limit: self.history_limit,
        }
    }
}

impl Default for LedgerEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> LedgerEngine {
        LedgerEngine::builder().build()
    }

    #[tokio::test]
    async fn test_create_account_seeds_plan_quotas() {
        let engine = engine();
        let account = engine.create_account("acct-1", "free").await.unwrap();

        assert_eq!(account.plan_id, "free");
        assert_eq!(account.quota("searches").unwrap().limit, 100.0);

        // Duplicate creation rejected.
        let err = engine.create_account("acct-1", "free").await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_estimate_is_pure() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        let est = engine.estimate("acct-1", "searches", 120.0).await.unwrap();
        assert_eq!(est.projected_used, 120.0);
        assert_eq!(est.projected_overage, 20.0);
        assert!(est.would_exceed);
        // 20 units * $0.005
        assert_eq!(est.projected_cost, dec!(0.1));

        let account = engine.get_account("acct-1").await.unwrap();
        assert_eq!(account.quota("searches").unwrap().used, 0.0);
    }

    #[tokio::test]
    async fn test_estimate_unknown_key_errors() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        let err = engine.estimate("acct-1", "nope", 1.0).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownServiceKey { .. }));

        let err = engine.estimate("missing", "searches", 1.0).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn test_negative_units_rejected() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        let err = engine.estimate("acct-1", "searches", -1.0).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));

        let err = engine
            .record_usage("acct-1", "searches", f64::NAN, "op-1", Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_record_usage_past_limit_still_succeeds() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        // Limit is 100; record 150 anyway. Usage already incurred must be
        // recorded, it just becomes overage.
        let record = engine
            .record_usage("acct-1", "searches", 150.0, "op-1", dec!(0.75))
            .await
            .unwrap();
        assert_eq!(record.used, 150.0);
        assert_eq!(record.overage, 50.0);

        // 50 of 150 units are overage: 0.75 * 50/150 = 0.25
        let account = engine.get_account("acct-1").await.unwrap();
        assert_eq!(account.total_overage_cost, dec!(0.25));
    }

    #[tokio::test]
    async fn test_overage_cost_only_for_overage_portion() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        engine
            .record_usage("acct-1", "searches", 90.0, "op-1", dec!(0.45))
            .await
            .unwrap();
        let account = engine.get_account("acct-1").await.unwrap();
        assert_eq!(account.total_overage_cost, Decimal::ZERO);

        // 90 -> 130: 30 of these 40 units are overage.
        engine
            .record_usage("acct-1", "searches", 40.0, "op-2", dec!(0.2))
            .await
            .unwrap();
        let account = engine.get_account("acct-1").await.unwrap();
        assert_eq!(account.total_overage_cost, dec!(0.15));
    }

    #[tokio::test]
    async fn test_idempotent_debit_replay() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        let first = engine
            .record_usage("acct-1", "searches", 10.0, "op-1", dec!(0.05))
            .await
            .unwrap();
        let second = engine
            .record_usage("acct-1", "searches", 10.0, "op-1", dec!(0.05))
            .await
            .unwrap();

        assert_eq!(first, second);
        let account = engine.get_account("acct-1").await.unwrap();
        assert_eq!(account.quota("searches").unwrap().used, 10.0);
    }

    #[tokio::test]
    async fn test_credit_requires_distinct_id() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        engine
            .record_usage("acct-1", "searches", 10.0, "op-1", Decimal::ZERO)
            .await
            .unwrap();

        // Reusing the debit's id for the credit is rejected.
        let err = engine
            .credit_usage("acct-1", "searches", 10.0, "op-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOperationId { .. }));

        // A fresh id works, and replays idempotently.
        let credited = engine
            .credit_usage("acct-1", "searches", 10.0, "op-1-credit")
            .await
            .unwrap();
        assert_eq!(credited.used, 0.0);

        let replay = engine
            .credit_usage("acct-1", "searches", 10.0, "op-1-credit")
            .await
            .unwrap();
        assert_eq!(replay, credited);

        // And the credit's id cannot be reused as a debit.
        let err = engine
            .record_usage("acct-1", "searches", 1.0, "op-1-credit", Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOperationId { .. }));
    }

    #[tokio::test]
    async fn test_credit_clamps_at_zero() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        engine
            .record_usage("acct-1", "searches", 5.0, "op-1", Decimal::ZERO)
            .await
            .unwrap();
        let record = engine
            .credit_usage("acct-1", "searches", 50.0, "op-2")
            .await
            .unwrap();

        assert_eq!(record.used, 0.0);
        assert_eq!(record.overage, 0.0);
    }

    #[tokio::test]
    async fn test_deactivated_account_rejects_mutation() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();
        engine
            .set_status("acct-1", AccountStatus::Deactivated)
            .await
            .unwrap();

        let err = engine
            .record_usage("acct-1", "searches", 1.0, "op-1", Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));

        // Reads still work.
        assert!(engine.get_summary("acct-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_rollover_requires_elapsed_or_force() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();

        let err = engine
            .rollover_cycle("acct-1", Utc::now(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BillingCycleNotYetElapsed { .. }));

        let account = engine.rollover_cycle("acct-1", Utc::now(), true).await.unwrap();
        assert_eq!(account.archived_cycles.len(), 1);
    }

    #[tokio::test]
    async fn test_change_plan_keeps_usage() {
        let engine = engine();
        engine.create_account("acct-1", "free").await.unwrap();
        engine
            .record_usage("acct-1", "searches", 120.0, "op-1", Decimal::ZERO)
            .await
            .unwrap();

        let account = engine.change_plan("acct-1", "starter").await.unwrap();
        let quota = account.quota("searches").unwrap();
        assert_eq!(quota.limit, 1_000.0);
        assert_eq!(quota.used, 120.0);
        // Overage recomputed against the new limit.
        assert_eq!(quota.overage, 0.0);
    }

    #[tokio::test]
    async fn test_usage_history_is_bounded_and_newest_first() {
        let engine = LedgerEngine::builder().history_limit(3).build();
        engine.create_account("acct-1", "free").await.unwrap();

        for i in 0..5 {
            engine
                .record_usage("acct-1", "searches", 1.0, &format!("op-{i}"), Decimal::ZERO)
                .await
                .unwrap();
        }

        let history = engine.usage_history("acct-1", 10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].operation_id, "op-4");
        assert_eq!(history[2].operation_id, "op-2");
    }
}
