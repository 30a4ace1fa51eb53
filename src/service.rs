// ===============================
// src/service.rs (compute / commit / history)
// ===============================
//
// Dua call site distributor:
//   compute_profit      -> preview (tidak menyimpan apa-apa)
//   commit_distribution -> simpan Payroll + ProfitDistribution
// Keduanya lewat `evaluate()` yang sama, jadi input identik menghasilkan
// distribusi identik. `inputs_digest` (sha256) dari preview bisa dikirim
// balik saat commit; kalau data berubah di antaranya, commit ditolak.
//
// Selain itu: pencatatan sale/expense/karyawan ke Ledger dan laporan
// harian / rentang tanggal.
//

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::distribution::{
    calculate_profit_distribution, Distribution, DistributionError, DistributionMode, DistributionReport,
};
use crate::domain::{
    BusinessId, CommitNote, Employee, EmployeeId, Event, Expense, LedgerNote, Period, PreviewNote, ProfitDistribution,
    RejectNote, Sale,
};
use crate::ledger::{Book, EmployeePatch, Ledger, LedgerError, NewEmployee, NewExpense, NewSale, ProfitSummary};
use crate::metrics::{
    COMMIT_CONFLICTS, DIST_COMMITTED, DIST_COMPUTED, DIST_REJECTED, LAST_NET_PROFIT, LAT_COMPUTE, LEDGER_WRITES,
};
use crate::report::{self, DailyReport, RangeReport};
use crate::store::{CommitDraft, DistributionStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown business {0}")]
    UnknownBusiness(BusinessId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error("Inputs changed since preview (expected {expected}, got {actual})")]
    DigestMismatch { expected: String, actual: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub distribution_mode: String,
    #[serde(default)]
    pub mode_params: Value,
    /// Digest returned by a previous preview; only checked on commit.
    #[serde(default)]
    pub inputs_digest: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitPreview {
    #[serde(flatten)]
    pub summary: ProfitSummary,
    pub distribution: DistributionReport,
    pub inputs_digest: String,
    /// True when this business/period already has a committed distribution.
    pub already_committed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitReceipt {
    pub message: String,
    pub payroll_id: u64,
    pub distribution_id: u64,
    pub inputs_digest: String,
}

struct Evaluation {
    period: Period,
    summary: ProfitSummary,
    employees: Vec<Employee>,
    outcome: Result<Distribution, DistributionError>,
    digest: String,
}

static EMPTY_PARAMS: Lazy<Value> = Lazy::new(|| json!({}));

/// SHA-256 over the canonical JSON of everything the distributor sees.
/// serde_json object keys are sorted, so the encoding is stable.
pub fn inputs_digest(
    business_id: BusinessId,
    period: &Period,
    net_profit: f64,
    mode: &str,
    params: &Value,
    employees: &[Employee],
) -> String {
    // mode_params kosong dan tidak dikirim sama artinya
    let params: &Value = if params.is_null() { &EMPTY_PARAMS } else { params };
    let canonical = json!({
        "business_id": business_id,
        "period_start": period.start,
        "period_end": period.end,
        "net_profit": net_profit,
        "mode": mode.trim().to_ascii_lowercase(),
        "params": params,
        "employees": employees.iter().map(|e| (e.id, e.base_salary)).collect::<Vec<_>>(),
    });
    let mut h = Sha256::new();
    h.update(canonical.to_string().as_bytes());
    hex::encode(h.finalize())
}

#[derive(Clone)]
pub struct PayrollService {
    ledger: Arc<Ledger>,
    store: Arc<DistributionStore>,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl PayrollService {
    pub fn new(ledger: Arc<Ledger>, store: Arc<DistributionStore>, rec_tx: Option<mpsc::Sender<Event>>) -> Self {
        Self { ledger, store, rec_tx }
    }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(ev);
        }
    }

    async fn evaluate(&self, business_id: BusinessId, req: &ProfitRequest) -> Result<Evaluation, ServiceError> {
        let book = self.ledger.read().await;
        ensure_business(&book, business_id)?;
        let period = Period::new(req.from, req.to)?;

        let t0 = Instant::now();
        // ringkasan & karyawan dari snapshot yang sama
        let summary = book.summary(business_id, &period);
        let employees = book.active_employees(business_id);
        drop(book);
        let outcome = calculate_profit_distribution(
            summary.gross_profit,
            &employees,
            &req.distribution_mode,
            &req.mode_params,
        );
        LAT_COMPUTE.observe(t0.elapsed().as_secs_f64() * 1000.0);

        let digest = inputs_digest(
            business_id,
            &period,
            summary.gross_profit,
            &req.distribution_mode,
            &req.mode_params,
            &employees,
        );

        LAST_NET_PROFIT
            .with_label_values(&[&business_id.to_string()])
            .set(summary.gross_profit);
        match &outcome {
            Ok(_) => DIST_COMPUTED.with_label_values(&[&mode_label(&req.distribution_mode)]).inc(),
            Err(e) => DIST_REJECTED.with_label_values(&[e.kind()]).inc(),
        }

        Ok(Evaluation { period, summary, employees, outcome, digest })
    }

    /// Preview. Distributor errors come back inline, not as `Err`.
    pub async fn compute_profit(
        &self,
        business_id: BusinessId,
        req: &ProfitRequest,
    ) -> Result<ProfitPreview, ServiceError> {
        let ev = self.evaluate(business_id, req).await?;
        let (beneficiaries, paid_out) = match &ev.outcome {
            Ok(d) => (d.len(), d.total()),
            Err(_) => (0, 0.0),
        };
        info!(
            business_id,
            from = %ev.period.start,
            to = %ev.period.end,
            mode = %req.distribution_mode,
            net_profit = ev.summary.gross_profit,
            beneficiaries,
            paid_out,
            ok = ev.outcome.is_ok(),
            "profit computed"
        );
        if matches!(&ev.outcome, Ok(d) if d.is_empty()) {
            warn!(business_id, "distribution has no beneficiaries");
        }
        let already_committed = self.store.is_committed(business_id, &ev.period).await;
        self.record(Event::Preview(PreviewNote {
            ts: Utc::now(),
            business_id,
            period: ev.period,
            mode: req.distribution_mode.clone(),
            net_profit: ev.summary.gross_profit,
            inputs_digest: ev.digest.clone(),
        }));
        Ok(ProfitPreview {
            summary: ev.summary,
            distribution: ev.outcome.into(),
            inputs_digest: ev.digest,
            already_committed,
        })
    }

    pub async fn commit_distribution(
        &self,
        business_id: BusinessId,
        req: &ProfitRequest,
    ) -> Result<CommitReceipt, ServiceError> {
        let ev = self.evaluate(business_id, req).await?;
        match self.try_commit(business_id, req, ev).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!(business_id, error = %e, "commit rejected");
                self.record(Event::Rejected(RejectNote {
                    ts: Utc::now(),
                    business_id,
                    period: Period { start: req.from, end: req.to },
                    reason: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    async fn try_commit(
        &self,
        business_id: BusinessId,
        req: &ProfitRequest,
        ev: Evaluation,
    ) -> Result<CommitReceipt, ServiceError> {
        if let Some(expected) = &req.inputs_digest {
            if *expected != ev.digest {
                return Err(ServiceError::DigestMismatch { expected: expected.clone(), actual: ev.digest });
            }
        }
        let details = ev.outcome?;
        let mode: DistributionMode = req.distribution_mode.parse()?;

        let draft = CommitDraft {
            business_id,
            period: ev.period,
            net_profit: ev.summary.gross_profit,
            mode,
            details,
            total_salaries: ev.employees.iter().map(|e| e.base_salary).sum(),
            inputs_digest: ev.digest.clone(),
        };
        let (payroll, dist) = self.store.commit(draft).await.map_err(|e| {
            if matches!(e, StoreError::AlreadyCommitted { .. }) {
                COMMIT_CONFLICTS.inc();
            }
            e
        })?;
        DIST_COMMITTED.with_label_values(&[mode.as_str()]).inc();

        info!(
            business_id,
            payroll_id = payroll.id,
            distribution_id = dist.id,
            %mode,
            net_profit = dist.net_profit,
            "distribution committed"
        );
        self.record(Event::Commit(CommitNote {
            ts: Utc::now(),
            business_id,
            distribution_id: dist.id,
            payroll_id: payroll.id,
            inputs_digest: ev.digest.clone(),
        }));

        Ok(CommitReceipt {
            message: "Distribution committed".to_string(),
            payroll_id: payroll.id,
            distribution_id: dist.id,
            inputs_digest: ev.digest,
        })
    }

    pub async fn list_distributions(
        &self,
        business_id: BusinessId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ProfitDistribution>, ServiceError> {
        ensure_business(&*self.ledger.read().await, business_id)?;
        Ok(self.store.list(business_id, from, to).await)
    }

    // ===== Ledger =====

    pub async fn employees(&self, business_id: BusinessId) -> Result<Vec<Employee>, ServiceError> {
        let book = self.ledger.read().await;
        ensure_business(&book, business_id)?;
        Ok(book.employees_of(business_id))
    }

    pub async fn sales(
        &self,
        business_id: BusinessId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Sale>, ServiceError> {
        let book = self.ledger.read().await;
        ensure_business(&book, business_id)?;
        Ok(book.sales_in(business_id, from, to))
    }

    pub async fn expenses(
        &self,
        business_id: BusinessId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        category: Option<&str>,
    ) -> Result<Vec<Expense>, ServiceError> {
        let book = self.ledger.read().await;
        ensure_business(&book, business_id)?;
        Ok(book.expenses_in(business_id, from, to, category))
    }

    /// Run one ledger mutation for an existing business, then count and record it.
    async fn mutate<T>(
        &self,
        business_id: BusinessId,
        kind: &'static str,
        action: &'static str,
        id_of: impl Fn(&T) -> u64,
        f: impl FnOnce(&mut Book) -> Result<T, LedgerError>,
    ) -> Result<T, ServiceError> {
        // daftar bisnis tidak pernah berubah, jadi cek di luar write lock aman
        ensure_business(&*self.ledger.read().await, business_id)?;
        let out = self.ledger.write(f).await?;
        let id = id_of(&out);
        LEDGER_WRITES.with_label_values(&[kind, action]).inc();
        info!(business_id, kind, action, id, "ledger updated");
        self.record(Event::Ledger(LedgerNote {
            ts: Utc::now(),
            business_id,
            kind: kind.to_string(),
            action: action.to_string(),
            id,
        }));
        Ok(out)
    }

    pub async fn record_sale(&self, business_id: BusinessId, new: NewSale) -> Result<Sale, ServiceError> {
        self.mutate(business_id, "sale", "create", |s: &Sale| s.id, |b| b.record_sale(business_id, new, Utc::now()))
            .await
    }

    pub async fn record_expense(&self, business_id: BusinessId, new: NewExpense) -> Result<Expense, ServiceError> {
        self.mutate(business_id, "expense", "create", |e: &Expense| e.id, |b| {
            b.record_expense(business_id, new, Utc::now())
        })
        .await
    }

    pub async fn hire(&self, business_id: BusinessId, new: NewEmployee) -> Result<Employee, ServiceError> {
        self.mutate(business_id, "employee", "create", |e: &Employee| e.id, |b| b.hire(business_id, new)).await
    }

    pub async fn update_employee(
        &self,
        business_id: BusinessId,
        employee_id: EmployeeId,
        patch: EmployeePatch,
    ) -> Result<Employee, ServiceError> {
        self.mutate(business_id, "employee", "update", |e: &Employee| e.id, |b| {
            b.update_employee(business_id, employee_id, patch)
        })
        .await
    }

    pub async fn remove_employee(&self, business_id: BusinessId, employee_id: EmployeeId) -> Result<Employee, ServiceError> {
        self.mutate(business_id, "employee", "delete", |e: &Employee| e.id, |b| {
            b.remove_employee(business_id, employee_id)
        })
        .await
    }

    // ===== Reports =====

    pub async fn daily_report(&self, business_id: BusinessId, date: NaiveDate) -> Result<DailyReport, ServiceError> {
        let book = self.ledger.read().await;
        ensure_business(&book, business_id)?;
        Ok(report::daily(&book, business_id, date))
    }

    pub async fn range_report(
        &self,
        business_id: BusinessId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<RangeReport, ServiceError> {
        let period = Period::new(from, to)?;
        let book = self.ledger.read().await;
        ensure_business(&book, business_id)?;
        Ok(report::range(&book, business_id, &period))
    }
}

fn ensure_business(book: &Book, business_id: BusinessId) -> Result<(), ServiceError> {
    match book.business(business_id) {
        Some(_) => Ok(()),
        None => Err(ServiceError::UnknownBusiness(business_id)),
    }
}

fn mode_label(raw: &str) -> String {
    raw.parse::<DistributionMode>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
