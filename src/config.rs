// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : profit_share — small-business payroll & profit distribution service
Module  : config.rs
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Aggregates sales/expenses per business and period, splits the net
          profit with one of five distribution modes, commits write-once
          payroll/distribution records, exposes a JSON API, Prometheus
          metrics, and records JSONL audit events.
=============================================================================
*/
use dotenvy::dotenv;
use std::env;

#[derive(Clone, Debug)]
pub struct Args {
    // network
    pub api_port: u16,
    pub metrics_port: u16,

    // files
    pub data_file: String,
    pub store_file: Option<String>, // None = in-memory store
    pub record_file: Option<String>,

    // logging
    pub log_level: String,
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// Build `Args` from any key lookup (env in production, a map in tests).
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Args {
    // ===== Ports =====
    let api_port = parse_or(get("API_PORT"), 8080);
    let metrics_port = parse_or(get("METRICS_PORT"), 9898);

    // ===== Files =====
    let data_file = get("DATA_FILE")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "data/book.json".to_string());
    // STORE_FILE= (kosong) -> store in-memory saja
    let store_file = match get("STORE_FILE") {
        Some(s) if s.trim().is_empty() => None,
        Some(s) => Some(s),
        None => Some("data/distributions.jsonl".to_string()),
    };
    let record_file = get("RECORD_FILE").filter(|s| !s.trim().is_empty());

    let log_level = get("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

    Args { api_port, metrics_port, data_file, store_file, record_file, log_level }
}

pub fn load() -> Args {
    // Pastikan .env dibaca (agar DATA_FILE, STORE_FILE, dll ter-load)
    let _ = dotenv();
    from_lookup(|k| env::var(k).ok())
}
