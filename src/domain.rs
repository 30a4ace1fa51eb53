// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::{Distribution, DistributionMode};

pub type BusinessId = u64;
pub type EmployeeId = u64;

fn yes() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business { pub id: BusinessId, pub name: String, pub owner_id: u64, #[serde(default)] pub currency: Option<String> }

/// Beneficiary record. Immutable selama satu perhitungan distribusi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub business_id: BusinessId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub position: Option<String>,
    /// Monthly base salary.
    pub base_salary: f64,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub custom_share_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem { pub product_id: u64, pub quantity: f64, pub unit_price: f64 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: u64,
    pub business_id: BusinessId,
    #[serde(default)]
    pub branch_id: Option<u64>,
    #[serde(default)]
    pub cashier_id: Option<u64>,
    pub sale_date: DateTime<Utc>,
    /// Σ quantity × unit_price of `items` when recorded through the API.
    pub total: f64,
    #[serde(default)]
    pub items: Vec<SaleItem>,
}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: u64,
    pub business_id: BusinessId,
    #[serde(default)]
    pub branch_id: Option<u64>,
    pub category: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    pub expense_date: DateTime<Utc>,
}

/// Inclusive calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period { pub start: NaiveDate, pub end: NaiveDate }
impl Period {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        let d = ts.date_naive();
        d >= self.start && d <= self.end
    }
}

// Persisted, write-once records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayrollStatus { Pending, Paid }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payroll {
    pub id: u64,
    pub business_id: BusinessId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_salaries: f64,
    pub status: PayrollStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitDistribution {
    pub id: u64,
    pub business_id: BusinessId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub net_profit: f64,
    pub distribution_mode: DistributionMode,
    pub details: Distribution,
    pub inputs_digest: String,
    pub created_at: DateTime<Utc>,
}

impl ProfitDistribution {
    pub fn period(&self) -> Period { Period { start: self.period_start, end: self.period_end } }
}

// Audit events (recorder)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewNote { pub ts: DateTime<Utc>, pub business_id: BusinessId, pub period: Period, pub mode: String, pub net_profit: f64, pub inputs_digest: String }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitNote { pub ts: DateTime<Utc>, pub business_id: BusinessId, pub distribution_id: u64, pub payroll_id: u64, pub inputs_digest: String }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectNote { pub ts: DateTime<Utc>, pub business_id: BusinessId, pub period: Period, pub reason: String }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerNote { pub ts: DateTime<Utc>, pub business_id: BusinessId, pub kind: String, pub action: String, pub id: u64 }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Preview(PreviewNote), Commit(CommitNote), Rejected(RejectNote), Ledger(LedgerNote), Note(String) }

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_is_inclusive_on_both_ends() {
        let p = Period {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        };
        assert!(p.contains(&Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        assert!(p.contains(&Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap()));
        assert!(!p.contains(&Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()));
        assert!(!p.contains(&Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn employee_defaults_to_active() {
        let e: Employee = serde_json::from_str(r#"{"id":3,"business_id":1,"base_salary":600.0}"#).unwrap();
        assert!(e.is_active);
        assert_eq!(e.custom_share_pct, None);
    }
}
