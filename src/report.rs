// ===============================
// src/report.rs (daily / range reports, JSON only)
// ===============================
//
// daily : semua sale & expense pada satu tanggal kalender (UTC) + totalnya
// range : daftar sale & expense bertanggal dalam periode inklusif
//
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::{BusinessId, Period};
use crate::ledger::Book;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleLine {
    pub id: u64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseLine {
    pub id: u64,
    pub amount: f64,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub sales: Vec<SaleLine>,
    pub expenses: Vec<ExpenseLine>,
    pub total_sales: f64,
    pub total_expenses: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedSale {
    pub date: DateTime<Utc>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedExpense {
    pub date: DateTime<Utc>,
    pub amount: f64,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub sales: Vec<DatedSale>,
    pub expenses: Vec<DatedExpense>,
}

pub fn daily(book: &Book, business_id: BusinessId, date: NaiveDate) -> DailyReport {
    let sales: Vec<SaleLine> = book
        .sales_in(business_id, Some(date), Some(date))
        .into_iter()
        .map(|s| SaleLine { id: s.id, total: s.total })
        .collect();
    let expenses: Vec<ExpenseLine> = book
        .expenses_in(business_id, Some(date), Some(date), None)
        .into_iter()
        .map(|e| ExpenseLine { id: e.id, amount: e.amount, category: e.category })
        .collect();
    DailyReport {
        date,
        total_sales: sales.iter().map(|s| s.total).sum(),
        total_expenses: expenses.iter().map(|e| e.amount).sum(),
        sales,
        expenses,
    }
}

pub fn range(book: &Book, business_id: BusinessId, period: &Period) -> RangeReport {
    let (from, to) = (Some(period.start), Some(period.end));
    RangeReport {
        from: period.start,
        to: period.end,
        sales: book
            .sales_in(business_id, from, to)
            .into_iter()
            .map(|s| DatedSale { date: s.sale_date, total: s.total })
            .collect(),
        expenses: book
            .expenses_in(business_id, from, to, None)
            .into_iter()
            .map(|e| DatedExpense { date: e.expense_date, amount: e.amount, category: e.category })
            .collect(),
    }
}
