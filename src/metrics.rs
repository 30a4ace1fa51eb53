// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Distribution metrics --------
pub static DIST_COMPUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("distributions_computed_total", "successful distribution computations by mode"),
        &["mode"],
    )
    .unwrap()
});

pub static DIST_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("distributions_rejected_total", "distributor errors by reason"),
        &["reason"],
    )
    .unwrap()
});

pub static DIST_COMMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("distributions_committed_total", "persisted distributions by mode"),
        &["mode"],
    )
    .unwrap()
});

pub static COMMIT_CONFLICTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("commit_conflicts_total", "commits rejected because the period was already committed")
        .unwrap()
});

// Waktu hitung ringkasan + distribusi (milliseconds)
pub static LAT_COMPUTE: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new(
        "compute_latency_ms",
        "Latency of aggregation + distribution (ms)",
    ))
    .unwrap()
});

pub static LAST_NET_PROFIT: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("last_net_profit", "net profit of the last computed period"),
        &["business"],
    )
    .unwrap()
});

// -------- HTTP --------
pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "API requests (labels: route, status)"),
        &["route", "status"],
    )
    .unwrap()
});

// -------- Ledger --------
pub static LEDGER_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledger_writes_total", "ledger mutations by record kind and action"),
        &["kind", "action"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_BUSINESSES: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_businesses", "businesses loaded from the data file").unwrap());

pub static CONFIG_STORE_RECORDS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_store_records", "distributions present in the store at startup").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(DIST_COMPUTED.clone())),
        REGISTRY.register(Box::new(DIST_REJECTED.clone())),
        REGISTRY.register(Box::new(DIST_COMMITTED.clone())),
        REGISTRY.register(Box::new(COMMIT_CONFLICTS.clone())),
        REGISTRY.register(Box::new(LAT_COMPUTE.clone())),
        REGISTRY.register(Box::new(LAST_NET_PROFIT.clone())),
        REGISTRY.register(Box::new(HTTP_REQUESTS.clone())),
        REGISTRY.register(Box::new(LEDGER_WRITES.clone())),
        REGISTRY.register(Box::new(CONFIG_BUSINESSES.clone())),
        REGISTRY.register(Box::new(CONFIG_STORE_RECORDS.clone())),
    ] {
        if let Err(e) = m {
            error!(?e, "metrics: register failed");
        }
    }
}

/// Registry snapshot in Prometheus text format. Empty body if encoding fails.
pub fn encode_metrics() -> Vec<u8> {
    let mut body = Vec::with_capacity(4096);
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut body) {
        warn!(?e, "metrics: encode failed");
        body.clear();
    }
    body
}

// Satu koneksi = satu request. Path diambil dari request line;
// path selain / dan /metrics dapat 404.
fn respond(stream: TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    // buang header sampai baris kosong
    let mut header = String::new();
    while reader.read_line(&mut header)? > 2 {
        header.clear();
    }
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");

    let (status, content_type, body) = match path {
        "/" | "/metrics" => ("200 OK", TEXT_FORMAT, encode_metrics()),
        _ => ("404 Not Found", "text/plain", b"not found\n".to_vec()),
    };
    let mut out = &stream;
    write!(
        out,
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    out.write_all(&body)?;
    out.flush()
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, ?e, "metrics bind failed, metrics disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => {
                    if let Err(e) = respond(stream) {
                        debug!(?e, "metrics: client dropped");
                    }
                }
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
