// ===============================
// src/store.rs (write-once distribution store)
// ===============================
//
// Audit store untuk ProfitDistribution + Payroll:
// - In-memory Vec, di-backup ke file JSONL (append-only).
// - Satu commit = satu baris {payroll, distribution}, ditulis lalu sync.
//   Baris terakhir yang terpotong (crash di tengah tulis) dibuang saat open,
//   jadi tidak ada payroll tanpa distribusi.
// - Commit diserialisasi oleh satu Mutex; periode yang sama untuk bisnis
//   yang sama hanya boleh di-commit sekali.
// - Saat start, file dibaca ulang untuk memulihkan record dan id counter.
//

use ahash::AHashSet as HashSet;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{info, warn};

use crate::distribution::{Distribution, DistributionMode};
use crate::domain::{BusinessId, Payroll, PayrollStatus, Period, ProfitDistribution};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("distribution for business {business_id} period {start}..{end} already committed")]
    AlreadyCommitted { business_id: BusinessId, start: NaiveDate, end: NaiveDate },
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One line of the store file: both halves of a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitRecord {
    payroll: Payroll,
    distribution: ProfitDistribution,
}

/// Everything the caller decides; ids and timestamps come from the store.
#[derive(Debug, Clone)]
pub struct CommitDraft {
    pub business_id: BusinessId,
    pub period: Period,
    pub net_profit: f64,
    pub mode: DistributionMode,
    pub details: Distribution,
    pub total_salaries: f64,
    pub inputs_digest: String,
}

#[derive(Debug, Default)]
struct Inner {
    payrolls: Vec<Payroll>,
    distributions: Vec<ProfitDistribution>,
    committed: HashSet<(BusinessId, Period)>,
    next_payroll_id: u64,
    next_distribution_id: u64,
}

impl Inner {
    fn apply(&mut self, rec: CommitRecord) {
        let CommitRecord { payroll, distribution } = rec;
        self.next_payroll_id = self.next_payroll_id.max(payroll.id + 1);
        self.next_distribution_id = self.next_distribution_id.max(distribution.id + 1);
        self.committed.insert((distribution.business_id, distribution.period()));
        self.payrolls.push(payroll);
        self.distributions.push(distribution);
    }
}

pub struct DistributionStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl DistributionStore {
    /// Volatile store (no file).
    pub fn in_memory() -> Self {
        Self { path: None, inner: Mutex::new(Inner { next_payroll_id: 1, next_distribution_id: 1, ..Default::default() }) }
    }

    /// Open (or create) a file-backed store and replay its records.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut inner = Inner { next_payroll_id: 1, next_distribution_id: 1, ..Default::default() };
        match fs::read(&path).await {
            Ok(mut raw) => {
                if raw.last().is_some_and(|b| *b != b'\n') {
                    let keep = raw.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
                    warn!(path = %path.display(), dropped = raw.len() - keep, "store: truncating torn tail");
                    OpenOptions::new().write(true).open(&path).await?.set_len(keep as u64).await?;
                    raw.truncate(keep);
                }
                let raw = String::from_utf8_lossy(&raw);
                for (n, line) in raw.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CommitRecord>(line) {
                        Ok(rec) => inner.apply(rec),
                        // baris rusak (mis. crash di tengah tulis): skip, jangan gagal start
                        Err(e) => warn!(?e, line = n + 1, path = %path.display(), "store: skip bad line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            path = %path.display(),
            distributions = inner.distributions.len(),
            payrolls = inner.payrolls.len(),
            "store: opened"
        );
        Ok(Self { path: Some(path), inner: Mutex::new(inner) })
    }

    pub async fn is_committed(&self, business_id: BusinessId, period: &Period) -> bool {
        self.inner.lock().await.committed.contains(&(business_id, *period))
    }

    /// Persist a payroll + distribution pair. Fails if the period was already committed.
    pub async fn commit(&self, draft: CommitDraft) -> Result<(Payroll, ProfitDistribution), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (draft.business_id, draft.period);
        if inner.committed.contains(&key) {
            return Err(StoreError::AlreadyCommitted {
                business_id: draft.business_id,
                start: draft.period.start,
                end: draft.period.end,
            });
        }

        let now = Utc::now();
        let payroll = Payroll {
            id: inner.next_payroll_id,
            business_id: draft.business_id,
            period_start: draft.period.start,
            period_end: draft.period.end,
            total_salaries: draft.total_salaries,
            status: PayrollStatus::Paid,
            created_at: now,
        };
        let dist = ProfitDistribution {
            id: inner.next_distribution_id,
            business_id: draft.business_id,
            period_start: draft.period.start,
            period_end: draft.period.end,
            net_profit: draft.net_profit,
            distribution_mode: draft.mode,
            details: draft.details,
            inputs_digest: draft.inputs_digest,
            created_at: now,
        };

        let rec = CommitRecord { payroll, distribution: dist };
        if let Some(path) = &self.path {
            let mut buf = serde_json::to_vec(&rec)?;
            buf.push(b'\n');

            let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
            file.write_all(&buf).await?;
            file.sync_data().await?;
        }

        inner.apply(rec.clone());
        Ok((rec.payroll, rec.distribution))
    }

    /// Distributions of a business with `period_start >= from` and `period_end <= to`.
    pub async fn list(
        &self,
        business_id: BusinessId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<ProfitDistribution> {
        let inner = self.inner.lock().await;
        inner
            .distributions
            .iter()
            .filter(|d| d.business_id == business_id)
            .filter(|d| from.map_or(true, |f| d.period_start >= f))
            .filter(|d| to.map_or(true, |t| d.period_end <= t))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.distributions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Beneficiary;

    fn period(m: u32) -> Period {
        let start = NaiveDate::from_ymd_opt(2025, m, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, m, 28).unwrap();
        Period { start, end }
    }

    fn draft(business_id: BusinessId, p: Period) -> CommitDraft {
        CommitDraft {
            business_id,
            period: p,
            net_profit: 1000.0,
            mode: DistributionMode::PerHeadEqual,
            details: [(Beneficiary::Id(1), 500.0), (Beneficiary::Id(2), 500.0)].into_iter().collect(),
            total_salaries: 1000.0,
            inputs_digest: "abc".into(),
        }
    }

    #[tokio::test]
    async fn second_commit_for_same_period_is_rejected() {
        let store = DistributionStore::in_memory();
        let (payroll, dist) = store.commit(draft(1, period(1))).await.unwrap();
        assert_eq!(payroll.id, 1);
        assert_eq!(dist.id, 1);
        assert_eq!(payroll.status, PayrollStatus::Paid);

        let err = store.commit(draft(1, period(1))).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyCommitted { business_id: 1, .. }));

        // bisnis lain, periode sama: boleh
        let (_, other) = store.commit(draft(2, period(1))).await.unwrap();
        assert_eq!(other.id, 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn concurrent_commits_only_one_wins() {
        let store = std::sync::Arc::new(DistributionStore::in_memory());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = store.clone();
            handles.push(tokio::spawn(async move { s.commit(draft(1, period(3))).await.is_ok() }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn list_filters_by_business_and_bounds() {
        let store = DistributionStore::in_memory();
        for m in 1..=4 {
            store.commit(draft(1, period(m))).await.unwrap();
        }
        store.commit(draft(9, period(2))).await.unwrap();

        assert_eq!(store.list(1, None, None).await.len(), 4);
        let mid = store
            .list(1, NaiveDate::from_ymd_opt(2025, 2, 1), NaiveDate::from_ymd_opt(2025, 3, 28))
            .await;
        let starts: Vec<u32> = mid.iter().map(|d| chrono::Datelike::month(&d.period_start)).collect();
        assert_eq!(starts, vec![2, 3]);
    }

    #[tokio::test]
    async fn file_store_replays_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dist.jsonl");
        {
            let store = DistributionStore::open(&path).await.unwrap();
            store.commit(draft(1, period(1))).await.unwrap();
            store.commit(draft(1, period(2))).await.unwrap();
        }

        let store = DistributionStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert!(store.is_committed(1, &period(2)).await);

        let (payroll, dist) = store.commit(draft(1, period(5))).await.unwrap();
        assert_eq!((payroll.id, dist.id), (3, 3));
        let listed = store.list(1, None, None).await;
        assert_eq!(listed[0].details.get(Beneficiary::Id(2)), Some(500.0));
    }

    #[tokio::test]
    async fn bad_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.jsonl");
        {
            let store = DistributionStore::open(&path).await.unwrap();
            store.commit(draft(1, period(1))).await.unwrap();
        }
        let mut raw = tokio::fs::read_to_string(&path).await.unwrap();
        raw.push_str("{\"payroll\":{\"id\":\n");
        tokio::fs::write(&path, raw).await.unwrap();

        let store = DistributionStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn torn_commit_is_dropped_and_period_can_be_recommitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.jsonl");
        {
            let store = DistributionStore::open(&path).await.unwrap();
            store.commit(draft(1, period(1))).await.unwrap();
            store.commit(draft(1, period(2))).await.unwrap();
        }
        // crash di tengah baris kedua
        let raw = tokio::fs::read(&path).await.unwrap();
        let first_end = raw.iter().position(|b| *b == b'\n').unwrap() + 1;
        tokio::fs::write(&path, &raw[..first_end + 40]).await.unwrap();

        {
            let store = DistributionStore::open(&path).await.unwrap();
            assert_eq!(store.len().await, 1);
            assert!(!store.is_committed(1, &period(2)).await);
            store.commit(draft(1, period(2))).await.unwrap();
        }

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));

        let store = DistributionStore::open(&path).await.unwrap();
        let inner = store.inner.lock().await;
        assert_eq!(inner.distributions.len(), 2);
        assert_eq!(inner.payrolls.len(), 2);
        assert!(inner.committed.contains(&(1, period(2))));
        for (p, d) in inner.payrolls.iter().zip(&inner.distributions) {
            assert_eq!((p.period_start, p.period_end), (d.period_start, d.period_end));
        }
    }
}
