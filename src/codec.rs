//! Versioned import/export of ledger state.
//!
//! The structured format is a JSON envelope with an explicit version and
//! export timestamp; timestamps inside it are RFC 3339 and round-trip
//! losslessly. The tabular (CSV) export flattens accounts to one row each
//! for spreadsheet consumption and is one-way.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::Account;

/// Current export format version. Importers reject other major versions.
pub const EXPORT_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported export version: {version} (supported major: {supported})")]
    UnsupportedVersion { version: String, supported: u32 },

    #[error("Malformed export version: {version}")]
    MalformedVersion { version: String },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Portable snapshot of one or many accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
}

impl ExportEnvelope {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            accounts,
        }
    }

    fn major_version(version: &str) -> CodecResult<u32> {
        version
            .split('.')
            .next()
            .and_then(|major| major.parse().ok())
            .ok_or_else(|| CodecError::MalformedVersion {
                version: version.to_string(),
            })
    }
}

/// Serialize accounts to the versioned structured format.
pub fn export_accounts(accounts: &[Account]) -> CodecResult<String> {
    let envelope = ExportEnvelope::new(accounts.to_vec());
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Parse a structured export, rejecting unknown major versions rather than
/// guessing at their layout.
pub fn import_accounts(data: &str) -> CodecResult<Vec<Account>> {
    let supported = ExportEnvelope::major_version(EXPORT_VERSION)?;

    // Peek at the version before committing to the full account layout.
    #[derive(Deserialize)]
    struct VersionProbe {
        version: String,
    }
    let probe: VersionProbe = serde_json::from_str(data)?;
    let major = ExportEnvelope::major_version(&probe.version)?;
    if major != supported {
        return Err(CodecError::UnsupportedVersion {
            version: probe.version,
            supported,
        });
    }

    let envelope: ExportEnvelope = serde_json::from_str(data)?;
    Ok(envelope.accounts)
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Flatten accounts to one CSV row each, with `{service}_used`,
/// `{service}_limit` and `{service}_overage` columns for every service key
/// observed across the set. Accounts missing a service leave its cells
/// empty. This direction is one-way; it is not imported back.
pub fn accounts_to_csv(accounts: &[Account]) -> String {
    let service_keys: BTreeSet<&str> = accounts
        .iter()
        .flat_map(|a| a.quotas.keys().map(String::as_str))
        .collect();

    let mut header = vec![
        "account_id".to_string(),
        "plan_id".to_string(),
        "plan_name".to_string(),
        "status".to_string(),
        "billing_cycle_start".to_string(),
        "billing_cycle_end".to_string(),
        "total_overage_cost".to_string(),
    ];
    for key in &service_keys {
        header.push(format!("{key}_used"));
        header.push(format!("{key}_limit"));
        header.push(format!("{key}_overage"));
    }

    let mut lines = vec![header.join(",")];
    for account in accounts {
        let status = match account.status {
            crate::engine::AccountStatus::Active => "active",
            crate::engine::AccountStatus::Deactivated => "deactivated",
        };
        let mut row = vec![
            csv_escape(&account.id),
            csv_escape(&account.plan_id),
            csv_escape(&account.plan_name),
            status.to_string(),
            account.billing_cycle_start.to_rfc3339(),
            account.billing_cycle_end.to_rfc3339(),
            account.total_overage_cost.to_string(),
        ];
        for key in &service_keys {
            match account.quotas.get(*key) {
                Some(quota) => {
                    row.push(quota.used.to_string());
                    row.push(quota.limit.to_string());
                    row.push(quota.overage.to_string());
                }
                None => {
                    row.push(String::new());
                    row.push(String::new());
                    row.push(String::new());
                }
            }
        }
        lines.push(row.join(","));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::QuotaRecord;
    use crate::policy::PlanCatalog;
    use rust_decimal_macros::dec;

    fn sample_account(id: &str, plan: &str) -> Account {
        let catalog = PlanCatalog::builder().with_defaults().build();
        let mut account = Account::from_plan(id, catalog.resolve(plan).unwrap(), Utc::now());
        account
            .quotas
            .get_mut("searches")
            .unwrap()
            .apply(120.0, Utc::now());
        account.total_overage_cost = dec!(0.1);
        account
    }

    #[test]
    fn test_roundtrip_is_lossless() {
        let accounts = vec![sample_account("acct-1", "free"), sample_account("acct-2", "starter")];

        let exported = export_accounts(&accounts).unwrap();
        let imported = import_accounts(&exported).unwrap();

        assert_eq!(imported, accounts);
    }

    #[test]
    fn test_import_rejects_unknown_major_version() {
        let accounts = vec![sample_account("acct-1", "free")];
        let exported = export_accounts(&accounts).unwrap();
        let bumped = exported.replace("\"version\": \"1.0\"", "\"version\": \"2.0\"");

        let err = import_accounts(&bumped).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_import_accepts_minor_version_drift() {
        let accounts = vec![sample_account("acct-1", "free")];
        let exported = export_accounts(&accounts).unwrap();
        let bumped = exported.replace("\"version\": \"1.0\"", "\"version\": \"1.3\"");

        assert_eq!(import_accounts(&bumped).unwrap(), accounts);
    }

    #[test]
    fn test_import_rejects_malformed_version() {
        let data = r#"{"version": "banana", "exported_at": "2026-01-01T00:00:00Z", "accounts": []}"#;
        let err = import_accounts(data).unwrap_err();
        assert!(matches!(err, CodecError::MalformedVersion { .. }));
    }

    #[test]
    fn test_csv_flattens_union_of_service_keys() {
        let catalog = PlanCatalog::builder().with_defaults().build();
        let mut a = Account::from_plan("acct-a", catalog.resolve("free").unwrap(), Utc::now());
        a.quotas.get_mut("searches").unwrap().apply(42.0, Utc::now());

        let mut b = Account::from_plan("acct-b", catalog.resolve("free").unwrap(), Utc::now());
        // Give b a service a doesn't have.
        b.quotas
            .insert("custom_widgets".into(), QuotaRecord::new(10.0, Utc::now()));

        let csv = accounts_to_csv(&[a, b]);
        let mut lines = csv.lines();
        let header = lines.next().unwrap();

        assert!(header.contains("searches_used"));
        assert!(header.contains("searches_limit"));
        assert!(header.contains("searches_overage"));
        assert!(header.contains("custom_widgets_used"));

        let columns: Vec<&str> = header.split(',').collect();
        let widgets_used = columns
            .iter()
            .position(|c| *c == "custom_widgets_used")
            .unwrap();
        let searches_used = columns.iter().position(|c| *c == "searches_used").unwrap();

        let row_a: Vec<&str> = lines.next().unwrap().split(',').collect();
        let row_b: Vec<&str> = lines.next().unwrap().split(',').collect();

        assert_eq!(row_a[0], "acct-a");
        assert_eq!(row_a[searches_used], "42");
        // Account a has no custom_widgets: empty cells.
        assert_eq!(row_a[widgets_used], "");
        assert_eq!(row_b[widgets_used], "0");
    }

    #[test]
    fn test_csv_escapes_embedded_commas() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
