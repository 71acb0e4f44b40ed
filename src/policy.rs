//! Billing plan and service catalog definitions.
//!
//! Plans map a plan id to the set of service quotas and thresholds a new
//! account is initialized with. Thresholds and cycle length are plan data,
//! not engine constants, so deployments can tune them without code changes.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Default fraction of the limit at which callers should warn tenants (80%).
pub const DEFAULT_SOFT_WARN_THRESHOLD: f64 = 0.80;

/// Default fraction of the limit treated as critical in summaries (90%).
pub const DEFAULT_HARD_WARN_THRESHOLD: f64 = 0.90;

/// Default billing cycle length in days.
pub const DEFAULT_CYCLE_DAYS: i64 = 30;

/// A billable service: its display metadata and per-unit overage rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub key: String,
    pub name: String,
    pub unit: String,
    pub overage_rate: Decimal,
}

impl ServiceSpec {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        overage_rate: Decimal,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            unit: unit.into(),
            overage_rate,
        }
    }
}

/// A billing plan: quota limits per service plus enforcement thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub monthly_price: Decimal,
    /// Fraction over the limit allowed before hard block (0.2 = 20% overage).
    pub overage_buffer: f64,
    /// Fraction of the limit at which usage is flagged but still allowed.
    pub soft_warn_threshold: f64,
    /// Fraction of the limit at which summaries report critical.
    pub hard_warn_threshold: f64,
    pub cycle_days: i64,
    /// Service key -> allotment for one cycle.
    pub quotas: HashMap<String, f64>,
}

impl Plan {
    pub fn limit_for(&self, service_key: &str) -> Option<f64> {
        self.quotas.get(service_key).copied()
    }
}

/// Catalog of plans and service definitions; pure, stateless lookup.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
    services: HashMap<String, ServiceSpec>,
}

impl PlanCatalog {
    pub fn builder() -> PlanCatalogBuilder {
        PlanCatalogBuilder::new()
    }

    pub fn resolve(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    pub fn service(&self, key: &str) -> Option<&ServiceSpec> {
        self.services.get(key)
    }

    /// Per-unit overage rate for a service; zero if the service is unknown.
    pub fn overage_rate(&self, key: &str) -> Decimal {
        self.services
            .get(key)
            .map(|s| s.overage_rate)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn plan_ids(&self) -> Vec<&str> {
        self.plans.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Default)]
pub struct PlanCatalogBuilder {
    plans: HashMap<String, Plan>,
    services: HashMap<String, ServiceSpec>,
}

impl PlanCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, spec: ServiceSpec) -> Self {
        self.services.insert(spec.key.clone(), spec);
        self
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.plans.insert(plan.id.clone(), plan);
        self
    }

    /// Seed the stock service catalog and the four stock plans.
    pub fn with_defaults(mut self) -> Self {
        for (key, name, unit, rate) in [
            ("searches", "Search API", "search", dec!(0.005)),
            ("tts_chars", "Text-to-Speech", "character", dec!(0.00003)),
            ("container_hours", "Container Runtime", "hour", dec!(0.05)),
            ("workflow_runs", "Workflow Executions", "execution", dec!(0.01)),
            ("storage_gb", "Cloud Storage", "GB", dec!(0.025)),
            ("api_calls", "API Calls", "call", dec!(0.0001)),
            ("llm_ktokens", "LLM Tokens", "K tokens", dec!(0.002)),
            ("vision_analyses", "Vision Analysis", "image", dec!(0.01)),
            ("code_generations", "Code Generation", "generation", dec!(0.05)),
            ("embeddings", "Embeddings", "K tokens", dec!(0.0001)),
        ] {
            self.services
                .insert(key.to_string(), ServiceSpec::new(key, name, unit, rate));
        }

        self = self.plan(Self::stock_plan(
            "free",
            "Free Tier",
            dec!(0),
            0.0,
            &[
                ("searches", 100.0),
                ("tts_chars", 10_000.0),
                ("container_hours", 1.0),
                ("workflow_runs", 50.0),
                ("storage_gb", 1.0),
                ("api_calls", 1_000.0),
                ("llm_ktokens", 100.0),
                ("vision_analyses", 20.0),
                ("code_generations", 10.0),
                ("embeddings", 50.0),
            ],
        ));
        self = self.plan(Self::stock_plan(
            "starter",
            "Starter",
            dec!(29),
            0.10,
            &[
                ("searches", 1_000.0),
                ("tts_chars", 100_000.0),
                ("container_hours", 10.0),
                ("workflow_runs", 500.0),
                ("storage_gb", 10.0),
                ("api_calls", 10_000.0),
                ("llm_ktokens", 1_000.0),
                ("vision_analyses", 200.0),
                ("code_generations", 100.0),
                ("embeddings", 500.0),
            ],
        ));
        self = self.plan(Self::stock_plan(
            "professional",
            "Professional",
            dec!(99),
            0.25,
            &[
                ("searches", 5_000.0),
                ("tts_chars", 500_000.0),
                ("container_hours", 50.0),
                ("workflow_runs", 2_000.0),
                ("storage_gb", 50.0),
                ("api_calls", 50_000.0),
                ("llm_ktokens", 5_000.0),
                ("vision_analyses", 1_000.0),
                ("code_generations", 500.0),
                ("embeddings", 2_000.0),
            ],
        ));
        self = self.plan(Self::stock_plan(
            "enterprise",
            "Enterprise",
            dec!(499),
            0.50,
            &[
                ("searches", 50_000.0),
                ("tts_chars", 5_000_000.0),
                ("container_hours", 500.0),
                ("workflow_runs", 20_000.0),
                ("storage_gb", 500.0),
                ("api_calls", 500_000.0),
                ("llm_ktokens", 50_000.0),
                ("vision_analyses", 10_000.0),
                ("code_generations", 5_000.0),
                ("embeddings", 20_000.0),
            ],
        ));
        self
    }

    fn stock_plan(
        id: &str,
        name: &str,
        monthly_price: Decimal,
        overage_buffer: f64,
        quotas: &[(&str, f64)],
    ) -> Plan {
        Plan {
            id: id.to_string(),
            name: name.to_string(),
            monthly_price,
            overage_buffer,
            soft_warn_threshold: DEFAULT_SOFT_WARN_THRESHOLD,
            hard_warn_threshold: DEFAULT_HARD_WARN_THRESHOLD,
            cycle_days: DEFAULT_CYCLE_DAYS,
            quotas: quotas.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    pub fn build(self) -> PlanCatalog {
        PlanCatalog {
            plans: self.plans,
            services: self.services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_plans() {
        let catalog = PlanCatalog::builder().with_defaults().build();

        let free = catalog.resolve("free").unwrap();
        assert_eq!(free.overage_buffer, 0.0);
        assert_eq!(free.limit_for("searches"), Some(100.0));

        let pro = catalog.resolve("professional").unwrap();
        assert_eq!(pro.overage_buffer, 0.25);
        assert_eq!(pro.quotas.len(), 10);

        assert!(catalog.resolve("nonexistent").is_none());
    }

    #[test]
    fn test_overage_rate_lookup() {
        let catalog = PlanCatalog::builder().with_defaults().build();

        assert_eq!(catalog.overage_rate("searches"), dec!(0.005));
        assert_eq!(catalog.overage_rate("unknown"), Decimal::ZERO);
    }

    #[test]
    fn test_custom_plan() {
        let catalog = PlanCatalog::builder()
            .service(ServiceSpec::new("widgets", "Widgets", "widget", dec!(0.1)))
            .plan(Plan {
                id: "custom".into(),
                name: "Custom".into(),
                monthly_price: dec!(10),
                overage_buffer: 0.2,
                soft_warn_threshold: 0.75,
                hard_warn_threshold: 0.95,
                cycle_days: 7,
                quotas: [("widgets".to_string(), 42.0)].into_iter().collect(),
            })
            .build();

        let plan = catalog.resolve("custom").unwrap();
        assert_eq!(plan.cycle_days, 7);
        assert_eq!(plan.limit_for("widgets"), Some(42.0));
    }
}
