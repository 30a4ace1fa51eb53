// ===============================
// src/api.rs (JSON HTTP API, hyper)
// ===============================
//
// Routes (prefix /api/businesses/{id}):
//   GET  /health
//   POST .../compute-profit          -> preview
//   POST .../commit-distribution     -> simpan (write-once)
//   GET  .../profit-distributions?from=YYYY-MM-DD&to=YYYY-MM-DD
//   GET  .../sales?from=&to=              POST .../sales
//   GET  .../expenses?from=&to=&category= POST .../expenses
//   GET  .../employees                    POST .../employees
//   PUT  .../employees/{emp_id}           DELETE .../employees/{emp_id}
//   GET  .../reports/daily?date=YYYY-MM-DD
//   GET  .../reports/custom?from=&to=&type=json
//
// Auth/session ada di luar service ini (reverse proxy).
//
use ahash::AHashMap as HashMap;
use chrono::NaiveDate;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::domain::{BusinessId, EmployeeId};
use crate::ledger::LedgerError;
use crate::metrics::HTTP_REQUESTS;
use crate::service::{PayrollService, ProfitRequest, ServiceError};
use crate::store::StoreError;

pub async fn serve(port: u16, svc: PayrollService) -> Result<(), hyper::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let svc = svc.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let svc = svc.clone();
                async move { Ok::<_, Infallible>(handle(svc, req).await) }
            }))
        }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!(%addr, "api listening");
    server.await
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(b) => (status, b),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, br#"{"error":"serialize failed"}"#.to_vec()),
    };
    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn error_response(status: StatusCode, msg: impl std::fmt::Display) -> Response<Body> {
    json_response(status, &json!({ "error": msg.to_string() }))
}

fn service_error(e: &ServiceError) -> Response<Body> {
    let status = match e {
        ServiceError::UnknownBusiness(_) => StatusCode::NOT_FOUND,
        ServiceError::Ledger(LedgerError::InvertedPeriod { .. } | LedgerError::Invalid { .. }) => {
            StatusCode::BAD_REQUEST
        }
        ServiceError::Ledger(LedgerError::UnknownEmployee { .. }) => StatusCode::NOT_FOUND,
        ServiceError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Distribution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::DigestMismatch { .. } => StatusCode::CONFLICT,
        ServiceError::Store(StoreError::AlreadyCommitted { .. }) => StatusCode::CONFLICT,
        ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "api: internal error");
    }
    error_response(status, e)
}

/// Percent-decoded query parameters; blank values count as absent.
struct Query(HashMap<String, String>);

impl Query {
    fn parse(raw: Option<&str>) -> Self {
        let pairs = form_urlencoded::parse(raw.unwrap_or("").as_bytes())
            .into_owned()
            .map(|(k, v)| (k, v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty());
        Query(pairs.collect())
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn date(&self, key: &str) -> Result<Option<NaiveDate>, Response<Body>> {
        self.get(key)
            .map(|v| {
                v.parse::<NaiveDate>()
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("bad {key} date {v:?}: {e}")))
            })
            .transpose()
    }

    fn required_date(&self, key: &str) -> Result<NaiveDate, Response<Body>> {
        self.date(key)?
            .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, format!("Query parameter {key} required")))
    }
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
    serde_json::from_slice(&bytes).map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

fn reply<T: Serialize>(status: StatusCode, r: Result<T, ServiceError>) -> Response<Body> {
    match r {
        Ok(v) => json_response(status, &v),
        Err(e) => service_error(&e),
    }
}

fn created(kind: &str, r: Result<u64, ServiceError>) -> Response<Body> {
    reply(StatusCode::CREATED, r.map(|id| json!({ "id": id, "message": format!("{kind} created") })))
}

// Setiap handler: Err(resp) = request ditolak sebelum sampai ke service.
type Handled = Result<Response<Body>, Response<Body>>;

async fn compute_profit(svc: &PayrollService, id: BusinessId, req: Request<Body>) -> Handled {
    let body: ProfitRequest = read_json(req).await?;
    Ok(reply(StatusCode::OK, svc.compute_profit(id, &body).await))
}

async fn commit_distribution(svc: &PayrollService, id: BusinessId, req: Request<Body>) -> Handled {
    let body: ProfitRequest = read_json(req).await?;
    Ok(reply(StatusCode::OK, svc.commit_distribution(id, &body).await))
}

async fn profit_distributions(svc: &PayrollService, id: BusinessId, q: &Query) -> Handled {
    let (from, to) = (q.date("from")?, q.date("to")?);
    Ok(reply(StatusCode::OK, svc.list_distributions(id, from, to).await))
}

async fn list_sales(svc: &PayrollService, id: BusinessId, q: &Query) -> Handled {
    let (from, to) = (q.date("from")?, q.date("to")?);
    Ok(reply(StatusCode::OK, svc.sales(id, from, to).await))
}

async fn create_sale(svc: &PayrollService, id: BusinessId, req: Request<Body>) -> Handled {
    let new = read_json(req).await?;
    Ok(created("Sale", svc.record_sale(id, new).await.map(|s| s.id)))
}

async fn list_expenses(svc: &PayrollService, id: BusinessId, q: &Query) -> Handled {
    let (from, to) = (q.date("from")?, q.date("to")?);
    Ok(reply(StatusCode::OK, svc.expenses(id, from, to, q.get("category")).await))
}

async fn create_expense(svc: &PayrollService, id: BusinessId, req: Request<Body>) -> Handled {
    let new = read_json(req).await?;
    Ok(created("Expense", svc.record_expense(id, new).await.map(|e| e.id)))
}

async fn create_employee(svc: &PayrollService, id: BusinessId, req: Request<Body>) -> Handled {
    let new = read_json(req).await?;
    Ok(created("Employee", svc.hire(id, new).await.map(|e| e.id)))
}

async fn update_employee(svc: &PayrollService, id: BusinessId, emp: EmployeeId, req: Request<Body>) -> Handled {
    let patch = read_json(req).await?;
    let r = svc.update_employee(id, emp, patch).await;
    Ok(reply(StatusCode::OK, r.map(|e| json!({ "message": "Employee updated", "employee": e }))))
}

async fn daily_report(svc: &PayrollService, id: BusinessId, q: &Query) -> Handled {
    let date = q.required_date("date")?;
    Ok(reply(StatusCode::OK, svc.daily_report(id, date).await))
}

async fn custom_report(svc: &PayrollService, id: BusinessId, q: &Query) -> Handled {
    // hanya JSON; ekspor file (csv/excel/pdf) tidak disediakan
    match q.get("type").unwrap_or("json") {
        "json" => {}
        other => return Err(error_response(StatusCode::BAD_REQUEST, format!("Invalid type {other:?}"))),
    }
    let (from, to) = (q.required_date("from")?, q.required_date("to")?);
    Ok(reply(StatusCode::OK, svc.range_report(id, from, to).await))
}

async fn business_route(
    svc: &PayrollService,
    method: &Method,
    id: BusinessId,
    rest: &[&str],
    q: &Query,
    req: Request<Body>,
) -> (&'static str, Handled) {
    match (method, rest) {
        (&Method::POST, ["compute-profit"]) => ("compute_profit", compute_profit(svc, id, req).await),
        (&Method::POST, ["commit-distribution"]) => ("commit_distribution", commit_distribution(svc, id, req).await),
        (&Method::GET, ["profit-distributions"]) => ("profit_distributions", profit_distributions(svc, id, q).await),
        (&Method::GET, ["sales"]) => ("list_sales", list_sales(svc, id, q).await),
        (&Method::POST, ["sales"]) => ("create_sale", create_sale(svc, id, req).await),
        (&Method::GET, ["expenses"]) => ("list_expenses", list_expenses(svc, id, q).await),
        (&Method::POST, ["expenses"]) => ("create_expense", create_expense(svc, id, req).await),
        (&Method::GET, ["employees"]) => ("list_employees", Ok(reply(StatusCode::OK, svc.employees(id).await))),
        (&Method::POST, ["employees"]) => ("create_employee", create_employee(svc, id, req).await),
        (m, ["employees", emp]) if *m == Method::PUT || *m == Method::DELETE => {
            let route = if *m == Method::PUT { "update_employee" } else { "delete_employee" };
            let Ok(emp) = emp.parse::<EmployeeId>() else {
                return (route, Err(error_response(StatusCode::BAD_REQUEST, format!("bad employee id {emp:?}"))));
            };
            if *m == Method::PUT {
                (route, update_employee(svc, id, emp, req).await)
            } else {
                let r = svc.remove_employee(id, emp).await;
                (route, Ok(reply(StatusCode::OK, r.map(|_| json!({ "message": "Employee deleted" })))))
            }
        }
        (&Method::GET, ["reports", "daily"]) => ("daily_report", daily_report(svc, id, q).await),
        (&Method::GET, ["reports", "custom"]) => ("custom_report", custom_report(svc, id, q).await),
        _ => ("not_found", Err(error_response(StatusCode::NOT_FOUND, "Not found"))),
    }
}

pub async fn handle(svc: PayrollService, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = Query::parse(req.uri().query());
    let segs: Vec<&str> = path.trim_matches('/').split('/').collect();
    debug!(%method, %path, "api: request");

    let (route, handled) = match segs.as_slice() {
        ["health"] if method == Method::GET => {
            ("health", Ok(json_response(StatusCode::OK, &json!({ "status": "ok" }))))
        }
        ["api", "businesses", id, rest @ ..] => match id.parse::<BusinessId>() {
            Ok(id) => business_route(&svc, &method, id, rest, &query, req).await,
            Err(_) => {
                let msg = format!("bad business id {id:?}");
                ("bad_business_id", Err(error_response(StatusCode::BAD_REQUEST, msg)))
            }
        },
        _ => ("not_found", Err(error_response(StatusCode::NOT_FOUND, "Not found"))),
    };
    let resp = handled.unwrap_or_else(|rejected| rejected);

    HTTP_REQUESTS.with_label_values(&[route, resp.status().as_str()]).inc();
    resp
}
