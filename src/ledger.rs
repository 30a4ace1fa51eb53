// ===============================
// src/ledger.rs (revenue / expense aggregation)
// ===============================
//
// Book = dataset bisnis (businesses, employees, sales, expenses) dari DATA_FILE.
// Ledger = Book di balik RwLock; setiap mutasi dikerjakan pada salinan,
// ditulis ke file (tmp + rename), baru kemudian menggantikan Book lama.
// Penjualan/biaya baru langsung terlihat oleh agregator.
//
// Agregasi per bisnis & periode (inklusif di kedua ujung, per tanggal kalender):
//   net profit = Σ sales.total - Σ expenses.amount
//

use ahash::AHashMap as HashMap;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::domain::{Business, BusinessId, Employee, EmployeeId, Expense, Period, Sale, SaleItem};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("write {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("book json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("period start {start} is after end {end}")]
    InvertedPeriod { start: NaiveDate, end: NaiveDate },
    #[error("Employee {employee_id} not found in business {business_id}")]
    UnknownEmployee { business_id: BusinessId, employee_id: EmployeeId },
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> LedgerError {
    LedgerError::Invalid { field, reason: reason.into() }
}

fn non_negative(field: &'static str, v: f64) -> Result<f64, LedgerError> {
    if v.is_finite() && v >= 0.0 {
        Ok(v)
    } else {
        Err(invalid(field, format!("{v} is not a non-negative amount")))
    }
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` (midnight UTC). `None` -> `now`.
pub fn parse_timestamp(
    field: &'static str,
    raw: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, LedgerError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(now);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDate>()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| invalid(field, format!("{raw:?}: {e}")))
}

// ===== Input records (API bodies) =====
#[derive(Debug, Clone, Deserialize)]
pub struct NewSaleItem {
    pub product_id: u64,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSale {
    #[serde(default)]
    pub branch_id: Option<u64>,
    #[serde(default)]
    pub cashier_id: Option<u64>,
    pub items: Vec<NewSaleItem>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExpense {
    #[serde(default)]
    pub branch_id: Option<u64>,
    pub category: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expense_date: Option<String>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub position: Option<String>,
    pub base_salary: f64,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub custom_share_pct: Option<f64>,
}

/// Partial update; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmployeePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub base_salary: Option<f64>,
    pub is_active: Option<bool>,
    pub custom_share_pct: Option<f64>,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, LedgerError> {
        if start > end {
            return Err(LedgerError::InvertedPeriod { start, end });
        }
        Ok(Period { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitSummary {
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub gross_profit: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub businesses: Vec<Business>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub sales: Vec<Sale>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(skip)]
    index: HashMap<BusinessId, usize>,
}

impl Book {
    pub fn from_json(raw: &str) -> Result<Self, LedgerError> {
        let mut book: Book = serde_json::from_str(raw)?;
        book.reindex();
        Ok(book)
    }

    pub async fn load(path: &str) -> Result<Self, LedgerError> {
        if !Path::new(path).exists() {
            info!(%path, "ledger: data file missing, starting with an empty book");
            return Ok(Book::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LedgerError::Io { path: path.to_string(), source })?;
        let book = Self::from_json(&raw)?;
        info!(
            %path,
            businesses = book.businesses.len(),
            employees = book.employees.len(),
            sales = book.sales.len(),
            expenses = book.expenses.len(),
            "ledger: book loaded"
        );
        Ok(book)
    }

    fn reindex(&mut self) {
        self.index = self.businesses.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
    }

    pub fn business(&self, id: BusinessId) -> Option<&Business> {
        self.index.get(&id).and_then(|i| self.businesses.get(*i))
    }

    /// Revenue Aggregator.
    pub fn total_revenue(&self, business_id: BusinessId, period: &Period) -> f64 {
        self.sales
            .iter()
            .filter(|s| s.business_id == business_id && period.contains(&s.sale_date))
            .map(|s| s.total)
            .sum()
    }

    /// Expense Aggregator. Salaries are expected to be booked as expenses.
    pub fn total_expenses(&self, business_id: BusinessId, period: &Period) -> f64 {
        self.expenses
            .iter()
            .filter(|e| e.business_id == business_id && period.contains(&e.expense_date))
            .map(|e| e.amount)
            .sum()
    }

    pub fn summary(&self, business_id: BusinessId, period: &Period) -> ProfitSummary {
        let total_revenue = self.total_revenue(business_id, period);
        let total_expenses = self.total_expenses(business_id, period);
        ProfitSummary { total_revenue, total_expenses, gross_profit: total_revenue - total_expenses }
    }

    /// All employees of a business, ordered by id.
    pub fn employees_of(&self, business_id: BusinessId) -> Vec<Employee> {
        let mut out: Vec<Employee> =
            self.employees.iter().filter(|e| e.business_id == business_id).cloned().collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Beneficiaries for a distribution: active employees, ordered by id.
    pub fn active_employees(&self, business_id: BusinessId) -> Vec<Employee> {
        let mut out = self.employees_of(business_id);
        out.retain(|e| e.is_active);
        out
    }

    /// Sales of a business whose calendar date is within the optional bounds.
    pub fn sales_in(&self, business_id: BusinessId, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<Sale> {
        self.sales
            .iter()
            .filter(|s| s.business_id == business_id && within(s.sale_date, from, to))
            .cloned()
            .collect()
    }

    pub fn expenses_in(
        &self,
        business_id: BusinessId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        category: Option<&str>,
    ) -> Vec<Expense> {
        self.expenses
            .iter()
            .filter(|e| e.business_id == business_id && within(e.expense_date, from, to))
            .filter(|e| category.map_or(true, |c| e.category == c))
            .cloned()
            .collect()
    }

    // ===== Mutations =====

    /// Records a sale; its total is Σ quantity × price of the items.
    pub fn record_sale(&mut self, business_id: BusinessId, new: NewSale, now: DateTime<Utc>) -> Result<Sale, LedgerError> {
        let sale_date = parse_timestamp("date", new.date.as_deref(), now)?;
        let items = new
            .items
            .into_iter()
            .map(|i| -> Result<SaleItem, LedgerError> {
                Ok(SaleItem {
                    product_id: i.product_id,
                    quantity: non_negative("quantity", i.quantity)?,
                    unit_price: non_negative("price", i.price)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sale = Sale {
            id: self.sales.iter().map(|s| s.id).max().unwrap_or(0) + 1,
            business_id,
            branch_id: new.branch_id,
            cashier_id: new.cashier_id,
            sale_date,
            total: items.iter().map(|i| i.quantity * i.unit_price).sum(),
            items,
        };
        self.sales.push(sale.clone());
        Ok(sale)
    }

    pub fn record_expense(
        &mut self,
        business_id: BusinessId,
        new: NewExpense,
        now: DateTime<Utc>,
    ) -> Result<Expense, LedgerError> {
        let category = new.category.trim().to_string();
        if category.is_empty() {
            return Err(invalid("category", "must not be empty"));
        }
        let expense = Expense {
            id: self.expenses.iter().map(|e| e.id).max().unwrap_or(0) + 1,
            business_id,
            branch_id: new.branch_id,
            category,
            amount: non_negative("amount", new.amount)?,
            description: new.description,
            expense_date: parse_timestamp("expense_date", new.expense_date.as_deref(), now)?,
        };
        self.expenses.push(expense.clone());
        Ok(expense)
    }

    pub fn hire(&mut self, business_id: BusinessId, new: NewEmployee) -> Result<Employee, LedgerError> {
        let employee = Employee {
            id: self.employees.iter().map(|e| e.id).max().unwrap_or(0) + 1,
            business_id,
            first_name: new.first_name,
            last_name: new.last_name,
            position: new.position,
            base_salary: non_negative("base_salary", new.base_salary)?,
            is_active: new.is_active,
            custom_share_pct: new.custom_share_pct,
        };
        self.employees.push(employee.clone());
        Ok(employee)
    }

    fn employee_slot(&self, business_id: BusinessId, employee_id: EmployeeId) -> Result<usize, LedgerError> {
        self.employees
            .iter()
            .position(|e| e.id == employee_id && e.business_id == business_id)
            .ok_or(LedgerError::UnknownEmployee { business_id, employee_id })
    }

    pub fn update_employee(
        &mut self,
        business_id: BusinessId,
        employee_id: EmployeeId,
        patch: EmployeePatch,
    ) -> Result<Employee, LedgerError> {
        let slot = self.employee_slot(business_id, employee_id)?;
        let base_salary = patch.base_salary.map(|v| non_negative("base_salary", v)).transpose()?;
        let e = &mut self.employees[slot];
        if let Some(v) = patch.first_name {
            e.first_name = v;
        }
        if let Some(v) = patch.last_name {
            e.last_name = v;
        }
        if let Some(v) = patch.position {
            e.position = Some(v);
        }
        if let Some(v) = base_salary {
            e.base_salary = v;
        }
        if let Some(v) = patch.is_active {
            e.is_active = v;
        }
        if let Some(v) = patch.custom_share_pct {
            e.custom_share_pct = Some(v);
        }
        Ok(e.clone())
    }

    pub fn remove_employee(&mut self, business_id: BusinessId, employee_id: EmployeeId) -> Result<Employee, LedgerError> {
        let slot = self.employee_slot(business_id, employee_id)?;
        Ok(self.employees.remove(slot))
    }
}

fn within(ts: DateTime<Utc>, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    let d = ts.date_naive();
    from.map_or(true, |f| d >= f) && to.map_or(true, |t| d <= t)
}

/// Shared, writable book.
pub struct Ledger {
    path: Option<PathBuf>,
    book: RwLock<Book>,
}

impl Ledger {
    /// Volatile ledger (tests, CLI).
    pub fn in_memory(book: Book) -> Self {
        Self { path: None, book: RwLock::new(book) }
    }

    /// Load `path` (missing file = empty book); mutations are written back to it.
    pub async fn open(path: &str) -> Result<Self, LedgerError> {
        let book = Book::load(path).await?;
        Ok(Self { path: Some(PathBuf::from(path)), book: RwLock::new(book) })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Book> {
        self.book.read().await
    }

    /// Apply `f` to a copy of the book, persist the copy, then publish it.
    /// If `f` or the write fails, the current book is untouched.
    pub async fn write<T>(&self, f: impl FnOnce(&mut Book) -> Result<T, LedgerError>) -> Result<T, LedgerError> {
        let mut guard = self.book.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        *guard = next;
        Ok(out)
    }
}

async fn persist(path: &Path, book: &Book) -> Result<(), LedgerError> {
    let write_err = |source| LedgerError::Write { path: path.display().to_string(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(book)?;
    tokio::fs::write(&tmp, &body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    debug!(path = %path.display(), bytes = body.len(), "ledger: book saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = r#"{
        "businesses": [
            {"id": 1, "name": "Warung Kopi", "owner_id": 10},
            {"id": 2, "name": "Bengkel", "owner_id": 11, "currency": "IDR"}
        ],
        "employees": [
            {"id": 4, "business_id": 1, "base_salary": 400.0},
            {"id": 3, "business_id": 1, "base_salary": 600.0},
            {"id": 5, "business_id": 1, "base_salary": 900.0, "is_active": false},
            {"id": 6, "business_id": 2, "base_salary": 700.0}
        ],
        "sales": [
            {"id": 1, "business_id": 1, "sale_date": "2025-01-01T00:00:00Z", "total": 1000.0},
            {"id": 2, "business_id": 1, "sale_date": "2025-01-31T18:30:00Z", "total": 500.0},
            {"id": 3, "business_id": 1, "sale_date": "2025-02-01T00:00:00Z", "total": 9999.0},
            {"id": 4, "business_id": 2, "sale_date": "2025-01-15T10:00:00Z", "total": 300.0}
        ],
        "expenses": [
            {"id": 1, "business_id": 1, "category": "rent", "amount": 200.0, "expense_date": "2025-01-10T09:00:00Z"},
            {"id": 2, "business_id": 1, "category": "salary", "amount": 100.0, "expense_date": "2024-12-31T23:00:00Z"}
        ]
    }"#;

    fn january() -> Period {
        Period::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn sums_are_scoped_to_business_and_period() {
        let book = Book::from_json(BOOK).unwrap();
        let s = book.summary(1, &january());
        assert_eq!(s.total_revenue, 1500.0);
        assert_eq!(s.total_expenses, 200.0);
        assert_eq!(s.gross_profit, 1300.0);
        assert_eq!(book.total_revenue(2, &january()), 300.0);
    }

    #[test]
    fn active_employees_are_sorted_and_filtered() {
        let book = Book::from_json(BOOK).unwrap();
        let ids: Vec<u64> = book.active_employees(1).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(book.employees_of(1).len(), 3);
    }

    #[test]
    fn business_lookup_uses_index() {
        let book = Book::from_json(BOOK).unwrap();
        assert_eq!(book.business(2).map(|b| b.name.as_str()), Some("Bengkel"));
        assert!(book.business(99).is_none());
    }

    #[test]
    fn inverted_period_is_rejected() {
        let err = Period::new(
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvertedPeriod { .. }));
    }

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    #[test]
    fn recorded_sale_totals_items_and_feeds_revenue() {
        let mut book = Book::from_json(BOOK).unwrap();
        let new: NewSale = serde_json::from_value(serde_json::json!({
            "branch_id": 2,
            "cashier_id": 9,
            "items": [{"product_id": 1, "quantity": 2, "price": 25.0}, {"product_id": 2, "quantity": 1, "price": 50.0}],
            "date": "2025-01-20"
        }))
        .unwrap();
        let sale = book.record_sale(1, new, at("2025-06-01T00:00:00Z")).unwrap();
        assert_eq!(sale.id, 5);
        assert_eq!(sale.total, 100.0);
        assert_eq!(sale.items.len(), 2);
        assert_eq!(book.total_revenue(1, &january()), 1600.0);
    }

    #[test]
    fn expense_defaults_to_now_and_filters_by_category() {
        let mut book = Book::from_json(BOOK).unwrap();
        let now = at("2025-01-15T12:00:00Z");
        let new = NewExpense {
            branch_id: None,
            category: " utilities ".into(),
            amount: 75.0,
            description: Some("listrik".into()),
            expense_date: None,
        };
        let e = book.record_expense(1, new, now).unwrap();
        assert_eq!((e.id, e.expense_date, e.category.as_str()), (3, now, "utilities"));
        assert_eq!(book.total_expenses(1, &january()), 275.0);
        assert_eq!(book.expenses_in(1, None, None, Some("utilities")).len(), 1);
        assert_eq!(book.expenses_in(1, NaiveDate::from_ymd_opt(2025, 1, 1), None, None).len(), 2);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let mut book = Book::from_json(BOOK).unwrap();
        let now = Utc::now();
        let neg = NewExpense { branch_id: None, category: "x".into(), amount: -1.0, description: None, expense_date: None };
        assert!(matches!(book.record_expense(1, neg, now), Err(LedgerError::Invalid { field: "amount", .. })));
        let blank = NewExpense { branch_id: None, category: " ".into(), amount: 1.0, description: None, expense_date: None };
        assert!(matches!(book.record_expense(1, blank, now), Err(LedgerError::Invalid { field: "category", .. })));
        let bad_date = NewSale { branch_id: None, cashier_id: None, items: vec![], date: Some("tomorrow".into()) };
        assert!(matches!(book.record_sale(1, bad_date, now), Err(LedgerError::Invalid { field: "date", .. })));
        assert_eq!(book.sales.len(), 4);
    }

    #[test]
    fn employees_can_be_hired_patched_and_removed() {
        let mut book = Book::from_json(BOOK).unwrap();
        let new: NewEmployee =
            serde_json::from_value(serde_json::json!({"first_name": "Sari", "last_name": "W", "base_salary": 500.0}))
                .unwrap();
        let hired = book.hire(1, new).unwrap();
        assert_eq!(hired.id, 7);
        assert!(hired.is_active);

        let patch = EmployeePatch { base_salary: Some(550.0), is_active: Some(false), ..Default::default() };
        let updated = book.update_employee(1, 7, patch).unwrap();
        assert_eq!((updated.base_salary, updated.is_active, updated.first_name.as_str()), (550.0, false, "Sari"));
        assert!(!book.active_employees(1).iter().any(|e| e.id == 7));

        // karyawan bisnis lain tidak bisa diubah lewat bisnis 1
        let err = book.remove_employee(1, 6).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownEmployee { business_id: 1, employee_id: 6 }));
        assert_eq!(book.remove_employee(1, 7).unwrap().id, 7);
        assert_eq!(book.employees.len(), 4);
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        assert!(serde_json::from_str::<EmployeePatch>(r#"{"salary": 1}"#).is_err());
    }

    #[tokio::test]
    async fn ledger_write_persists_and_failed_write_leaves_book_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        tokio::fs::write(&path, BOOK).await.unwrap();
        let path = path.to_str().unwrap().to_string();

        let ledger = Ledger::open(&path).await.unwrap();
        let new = NewExpense { branch_id: None, category: "rent".into(), amount: 10.0, description: None, expense_date: Some("2025-01-02".into()) };
        ledger.write(|b| b.record_expense(1, new, Utc::now())).await.unwrap();

        let err = ledger.write(|b| b.remove_employee(1, 99)).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownEmployee { .. }));
        assert_eq!(ledger.read().await.employees.len(), 4);

        let reopened = Ledger::open(&path).await.unwrap();
        let book = reopened.read().await;
        assert_eq!(book.total_expenses(1, &january()), 210.0);
        assert_eq!(book.business(2).map(|b| b.name.as_str()), Some("Bengkel"));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_bare_dates() {
        let now = Utc::now();
        assert_eq!(parse_timestamp("d", Some("2025-03-01"), now).unwrap(), at("2025-03-01T00:00:00Z"));
        assert_eq!(parse_timestamp("d", Some("2025-03-01T07:00:00+07:00"), now).unwrap(), at("2025-03-01T00:00:00Z"));
        assert_eq!(parse_timestamp("d", None, now).unwrap(), now);
    }

    #[tokio::test]
    async fn missing_file_gives_empty_book() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let book = Book::load(path.to_str().unwrap()).await.unwrap();
        assert!(book.businesses.is_empty());
    }
}
