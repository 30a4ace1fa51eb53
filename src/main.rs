// ===============================
// src/main.rs
// ===============================
/*
 cd profit_share

 # preview distribusi dari CLI
 cargo run -- preview --business 1 --from 2025-01-01 --to 2025-01-31 --mode hybrid

 # API
 curl -s -XPOST localhost:8080/api/businesses/1/compute-profit \
   -d '{"from":"2025-01-01","to":"2025-01-31","distribution_mode":"per_head_equal"}'

 # metrics
 curl -s localhost:9898/metrics | grep '^distributions_'
*/
/*
=============================================================================
Project : profit_share — small-business payroll & profit distribution service
Module  : main.rs
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Aggregates sales/expenses per business and period, splits the net
          profit with one of five distribution modes, commits write-once
          payroll/distribution records, keeps a writable sales/expense/
          employee ledger with daily and range reports, exposes a JSON
          API and Prometheus metrics, and records JSONL audit events.
=============================================================================
*/
mod api;
mod config;
mod distribution;
mod domain;
mod ledger;
mod metrics;
mod recorder;
mod report;
mod service;
mod store;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::domain::{BusinessId, Event};
use crate::ledger::Ledger;
use crate::service::{PayrollService, ProfitRequest};
use crate::store::DistributionStore;

#[derive(Debug, Parser)]
#[command(name = "profit_share", version, about = "Payroll & profit distribution service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the JSON API and the metrics endpoint (default)
    Serve,
    /// Compute a distribution preview for one business and period
    Preview {
        #[arg(long)]
        business: BusinessId,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// fixed_percentage | per_head_equal | pro_rata_salary | hybrid | custom
        #[arg(long)]
        mode: String,
        /// Mode parameters as JSON, e.g. '{"allocations":{"5":0.5}}'
        #[arg(long)]
        params: Option<String>,
    },
    /// List committed distributions of a business
    History {
        #[arg(long)]
        business: BusinessId,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<(), String> {
    let s = serde_json::to_string_pretty(v).map_err(|e| e.to_string())?;
    println!("{s}");
    Ok(())
}

async fn run(cli: Cli, args: config::Args) -> Result<(), String> {
    let ledger = Arc::new(Ledger::open(&args.data_file).await.map_err(|e| e.to_string())?);
    let store = Arc::new(match &args.store_file {
        Some(path) => DistributionStore::open(path).await.map_err(|e| e.to_string())?,
        None => DistributionStore::in_memory(),
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Preview { business, from, to, mode, params } => {
            let mode_params = match params {
                Some(raw) => serde_json::from_str(&raw).map_err(|e| format!("bad --params: {e}"))?,
                None => Value::Null,
            };
            let svc = PayrollService::new(ledger, store, None);
            let req = ProfitRequest { from, to, distribution_mode: mode, mode_params, inputs_digest: None };
            let preview = svc.compute_profit(business, &req).await.map_err(|e| e.to_string())?;
            print_json(&preview)
        }
        Command::History { business, from, to } => {
            let svc = PayrollService::new(ledger, store, None);
            let list = svc.list_distributions(business, from, to).await.map_err(|e| e.to_string())?;
            print_json(&list)
        }
        Command::Serve => {
            // ---- Metrics ----
            metrics::init();
            metrics::serve_metrics(args.metrics_port);
            let businesses = ledger.read().await.businesses.len();
            metrics::CONFIG_BUSINESSES.set(businesses as i64);
            metrics::CONFIG_STORE_RECORDS.set(store.len().await as i64);

            // ---- Recorder (optional) ----
            let rec_tx = match args.record_file.clone() {
                Some(path) => {
                    let (tx, rx) = mpsc::channel::<Event>(8192);
                    tokio::spawn(recorder::run(rx, path));
                    let _ = tx.try_send(Event::Note(format!("started, data_file={}", args.data_file)));
                    Some(tx)
                }
                None => None,
            };

            info!(
                api_port = args.api_port,
                metrics_port = args.metrics_port,
                data_file = %args.data_file,
                store_file = ?args.store_file,
                record_file = ?args.record_file,
                businesses,
                "startup config"
            );

            let svc = PayrollService::new(ledger, store, rec_tx);
            api::serve(args.api_port, svc).await.map_err(|e| e.to_string())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ---- Load config ----
    let args = config::load();

    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter(args.log_level.as_str()).init();

    match run(cli, args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}
