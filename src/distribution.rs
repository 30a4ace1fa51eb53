// ===============================
// src/distribution.rs
// ===============================
//
// Profit distributor: membagi net profit satu periode ke karyawan/owner.
//
// 5 mode (enum dispatch, tanpa fallthrough):
// 1) fixed_percentage : owner dapat pct% dari profit + bucket "reinvestment"
// 2) per_head_equal   : profit / jumlah karyawan
// 3) pro_rata_salary  : proporsional terhadap base salary
// 4) hybrid           : base salary dulu, surplus dibagi pro-rata salary
// 5) custom           : alokasi dari caller (fraction <= 1 atau nominal)
//
// Semua fungsi di sini pure: tidak ada I/O, tidak ada state.
// Persentase fixed_percentage dan alokasi custom TIDAK divalidasi harus
// berjumlah 100% / net profit; itu tanggung jawab caller.
//

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::domain::Employee;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("No profit to distribute")]
    NoProfit,
    #[error("Unknown mode")]
    UnknownMode(String),
    #[error("Invalid parameters for {mode}: {reason}")]
    InvalidParameters { mode: DistributionMode, reason: String },
}

impl DistributionError {
    /// Short label for metrics / audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            DistributionError::NoProfit => "no_profit",
            DistributionError::UnknownMode(_) => "unknown_mode",
            DistributionError::InvalidParameters { .. } => "invalid_parameters",
        }
    }
}

// ===== Mode =====
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    FixedPercentage,
    PerHeadEqual,
    ProRataSalary,
    Hybrid,
    Custom,
}

impl DistributionMode {
    pub const ALL: [DistributionMode; 5] = [
        DistributionMode::FixedPercentage,
        DistributionMode::PerHeadEqual,
        DistributionMode::ProRataSalary,
        DistributionMode::Hybrid,
        DistributionMode::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionMode::FixedPercentage => "fixed_percentage",
            DistributionMode::PerHeadEqual => "per_head_equal",
            DistributionMode::ProRataSalary => "pro_rata_salary",
            DistributionMode::Hybrid => "hybrid",
            DistributionMode::Custom => "custom",
        }
    }
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionMode {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| DistributionError::UnknownMode(s.to_string()))
    }
}

// ===== Parameters =====
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerShare {
    pub id: u64,
    pub pct: f64,
}

/// Nilai alokasi mode custom.
///
/// JSON float `<= 1` dibaca sebagai fraction dari net profit; selain itu
/// (termasuk integer, mis. `1` atau `2000`) dibaca sebagai nominal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allocation {
    Fraction(f64),
    Amount(f64),
}

impl Allocation {
    pub fn from_number(n: &serde_json::Number) -> Self {
        let v = n.as_f64().unwrap_or(0.0);
        if n.is_f64() && v <= 1.0 {
            Allocation::Fraction(v)
        } else {
            Allocation::Amount(v)
        }
    }

    fn payout(&self, net_profit: f64) -> f64 {
        match *self {
            Allocation::Fraction(f) => net_profit * f,
            Allocation::Amount(a) => a,
        }
    }
}

impl Serialize for Allocation {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match *self {
            Allocation::Fraction(f) => s.serialize_f64(f),
            // integral amounts go back out as integers so they re-read as amounts
            Allocation::Amount(a) if a.fract() == 0.0 && a.abs() < i64::MAX as f64 => {
                s.serialize_i64(a as i64)
            }
            Allocation::Amount(a) => s.serialize_f64(a),
        }
    }
}

impl<'de> Deserialize<'de> for Allocation {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = serde_json::Number::deserialize(d)?;
        Ok(Allocation::from_number(&n))
    }
}

/// Parameter per mode (discriminated union).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeParameters {
    FixedPercentage { owners: Vec<OwnerShare>, reinvestment: f64 },
    PerHeadEqual,
    ProRataSalary,
    Hybrid,
    Custom { allocations: BTreeMap<String, Allocation> },
}

#[derive(Deserialize)]
struct FixedPercentageWire {
    #[serde(default)]
    owners: Vec<OwnerShare>,
    #[serde(default)]
    reinvestment: f64,
}

#[derive(Deserialize)]
struct CustomWire {
    #[serde(default)]
    allocations: BTreeMap<String, Allocation>,
}

impl ModeParameters {
    /// Decode the loosely-shaped `mode_params` bag of a request for `mode`.
    /// Missing keys fall back to empty/zero; wrongly-typed values are rejected.
    pub fn from_json(mode: DistributionMode, params: &Value) -> Result<Self, DistributionError> {
        let bag = if params.is_null() { Value::Object(Default::default()) } else { params.clone() };
        let invalid = |e: serde_json::Error| DistributionError::InvalidParameters {
            mode,
            reason: e.to_string(),
        };
        match mode {
            DistributionMode::FixedPercentage => {
                let w: FixedPercentageWire = serde_json::from_value(bag).map_err(invalid)?;
                Ok(ModeParameters::FixedPercentage { owners: w.owners, reinvestment: w.reinvestment })
            }
            DistributionMode::PerHeadEqual => Ok(ModeParameters::PerHeadEqual),
            DistributionMode::ProRataSalary => Ok(ModeParameters::ProRataSalary),
            DistributionMode::Hybrid => Ok(ModeParameters::Hybrid),
            DistributionMode::Custom => {
                let w: CustomWire = serde_json::from_value(bag).map_err(invalid)?;
                Ok(ModeParameters::Custom { allocations: w.allocations })
            }
        }
    }
}

// ===== Result =====
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Beneficiary {
    /// Employee id or owner id.
    Id(u64),
    Reinvestment,
}

const REINVESTMENT_KEY: &str = "reinvestment";

impl fmt::Display for Beneficiary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Beneficiary::Id(id) => write!(f, "{id}"),
            Beneficiary::Reinvestment => f.write_str(REINVESTMENT_KEY),
        }
    }
}

impl FromStr for Beneficiary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == REINVESTMENT_KEY {
            return Ok(Beneficiary::Reinvestment);
        }
        s.parse::<u64>()
            .map(Beneficiary::Id)
            .map_err(|_| format!("bad beneficiary key {s:?}"))
    }
}

impl Serialize for Beneficiary {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Beneficiary {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Beneficiary -> payout, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distribution(BTreeMap<Beneficiary, f64>);

impl Distribution {
    pub fn get(&self, who: Beneficiary) -> Option<f64> {
        self.0.get(&who).copied()
    }
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Beneficiary, f64)> for Distribution {
    fn from_iter<I: IntoIterator<Item = (Beneficiary, f64)>>(iter: I) -> Self {
        Distribution(iter.into_iter().collect())
    }
}

/// Wire shape: payout mapping, atau `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DistributionReport {
    Failed { error: String },
    Payouts(Distribution),
}

impl From<Result<Distribution, DistributionError>> for DistributionReport {
    fn from(r: Result<Distribution, DistributionError>) -> Self {
        match r {
            Ok(d) => DistributionReport::Payouts(d),
            Err(e) => DistributionReport::Failed { error: e.to_string() },
        }
    }
}

// ===== Entry points =====

/// String-keyed entry point used by the web layer.
///
/// Profit is checked before the mode, so `net_profit <= 0` always reports
/// `NoProfit` even for an unknown mode.
pub fn calculate_profit_distribution(
    net_profit: f64,
    employees: &[Employee],
    mode: &str,
    params: &Value,
) -> Result<Distribution, DistributionError> {
    if net_profit <= 0.0 {
        return Err(DistributionError::NoProfit);
    }
    let mode: DistributionMode = mode.parse()?;
    let params = ModeParameters::from_json(mode, params)?;
    distribute(net_profit, employees, &params)
}

/// Typed entry point.
pub fn distribute(
    net_profit: f64,
    employees: &[Employee],
    params: &ModeParameters,
) -> Result<Distribution, DistributionError> {
    if net_profit <= 0.0 {
        return Err(DistributionError::NoProfit);
    }
    let out = match params {
        ModeParameters::FixedPercentage { owners, reinvestment } => {
            fixed_percentage(net_profit, owners, *reinvestment)
        }
        ModeParameters::PerHeadEqual => per_head_equal(net_profit, employees),
        ModeParameters::ProRataSalary => pro_rata_salary(net_profit, employees),
        ModeParameters::Hybrid => hybrid(net_profit, employees),
        ModeParameters::Custom { allocations } => custom(net_profit, employees, allocations),
    };
    Ok(out)
}

fn total_salary(employees: &[Employee]) -> f64 {
    employees.iter().map(|e| e.base_salary).sum()
}

fn fixed_percentage(net_profit: f64, owners: &[OwnerShare], reinvestment: f64) -> Distribution {
    // duplicate owner id: yang terakhir menang
    let mut out: BTreeMap<Beneficiary, f64> = owners
        .iter()
        .map(|o| (Beneficiary::Id(o.id), net_profit * o.pct / 100.0))
        .collect();
    out.insert(Beneficiary::Reinvestment, net_profit * reinvestment / 100.0);
    Distribution(out)
}

fn per_head_equal(net_profit: f64, employees: &[Employee]) -> Distribution {
    let n = employees.len();
    let payout = if n > 0 { net_profit / n as f64 } else { 0.0 };
    employees.iter().map(|e| (Beneficiary::Id(e.id), payout)).collect()
}

fn pro_rata_salary(net_profit: f64, employees: &[Employee]) -> Distribution {
    let total = total_salary(employees);
    employees
        .iter()
        .map(|e| {
            let payout = if total == 0.0 { 0.0 } else { net_profit * (e.base_salary / total) };
            (Beneficiary::Id(e.id), payout)
        })
        .collect()
}

fn hybrid(net_profit: f64, employees: &[Employee]) -> Distribution {
    let fixed_total = total_salary(employees);
    if net_profit <= fixed_total {
        // profit tidak menutup base salary: bayar base saja, tanpa pengurangan
        return employees.iter().map(|e| (Beneficiary::Id(e.id), e.base_salary)).collect();
    }
    let bonus_pool = net_profit - fixed_total;
    employees
        .iter()
        .map(|e| {
            let bonus = if fixed_total > 0.0 { bonus_pool * (e.base_salary / fixed_total) } else { 0.0 };
            (Beneficiary::Id(e.id), e.base_salary + bonus)
        })
        .collect()
}

fn custom(net_profit: f64, employees: &[Employee], allocations: &BTreeMap<String, Allocation>) -> Distribution {
    employees
        .iter()
        .map(|e| {
            let payout = allocations
                .get(&e.id.to_string())
                .map(|a| a.payout(net_profit))
                .unwrap_or(0.0);
            (Beneficiary::Id(e.id), payout)
        })
        .collect()
}
