/// HTTP endpoints
/// Minimal HTTP/1.1 on a raw tokio listener: report trigger/retrieval plus health endpoints

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::StoreId;
use crate::registry::ReportState;
use crate::report::ReportId;
use crate::service::{ReportQuery, ReportService, TriggerError};

/// Timeout for reading HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Request lines and headers beyond this are rejected
const MAX_REQUEST_BYTES: usize = 8192;

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

/// Status line plus body
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Accept loop; runs until the token is cancelled
pub async fn serve(listener: TcpListener, service: Arc<ReportService>, cancel_token: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => info!("Report server listening on http://{}", addr),
        Err(e) => warn!("Report server listening on unknown address: {}", e),
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&mut socket, &service).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Report server shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    socket: &mut tokio::net::TcpStream,
    service: &Arc<ReportService>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];

    // Apply timeout to prevent slow-loris attacks
    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let raw = String::from_utf8_lossy(&buf[..n]);
    let response = match parse_request(&raw) {
        Some(request) => {
            debug!("{} {}", request.method, request.path);
            route(&request, service)
        }
        None => Response::error(400, "Malformed request"),
    };

    socket.write_all(response.to_http().as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

/// Parse the request line; headers and body are not needed by any route
pub fn parse_request(raw: &str) -> Option<Request> {
    let line = raw.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_ascii_uppercase();
    let target = parts.next()?;
    parts.next().filter(|v| v.starts_with("HTTP/"))?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (target, HashMap::new()),
    };

    Some(Request {
        method,
        path: path.trim_end_matches('/').to_string(),
        query,
    })
}

/// Decode `a=1&b=2`; pairs that fail to decode are dropped
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(&key.replace('+', " ")).ok()?.into_owned();
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

fn store_param(request: &Request) -> Option<StoreId> {
    request
        .query
        .get("store_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(StoreId::new)
}

pub fn route(request: &Request, service: &Arc<ReportService>) -> Response {
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/trigger_report") => trigger_report(request, service),
        ("GET", "/get_report") => get_report(request, service),
        ("GET", "/health" | "/healthz") => Response::json(200, service.metrics().status().to_json()),
        ("GET", "/ready" | "/readyz") => {
            let ready = service.metrics().status().is_ready();
            Response::json(if ready { 200 } else { 503 }, json!({ "ready": ready }))
        }
        ("GET", "/metrics") => Response {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body: service.metrics().status().to_prometheus(),
        },
        (_, "/trigger_report" | "/get_report" | "/health" | "/ready" | "/metrics") => {
            Response::error(405, "Method Not Allowed")
        }
        _ => Response::error(404, "Not Found"),
    }
}

fn trigger_report(request: &Request, service: &Arc<ReportService>) -> Response {
    match service.trigger(store_param(request)) {
        Ok(id) => Response::json(200, json!({ "report_id": id })),
        Err(TriggerError::NoStores) => Response::error(503, "No stores loaded"),
    }
}

fn get_report(request: &Request, service: &Arc<ReportService>) -> Response {
    let query = if let Some(raw) = request.query.get("report_id") {
        match ReportId::parse(raw.trim()) {
            Some(id) => ReportQuery::ById(id),
            None => return Response::error(400, "Malformed report_id"),
        }
    } else if let Some(store_id) = store_param(request) {
        ReportQuery::ByStore(store_id)
    } else {
        return Response::error(400, "Expected report_id or store_id");
    };

    // A store without a report yet gets one started
    let Some((id, state)) = service.lookup_or_trigger(&query) else {
        return Response::error(404, "Unknown report");
    };

    let body = match state {
        ReportState::Running { store_id } => json!({
            "status": "Running",
            "report_id": id,
            "store_id": store_id,
        }),
        ReportState::Complete {
            store_id,
            artifact,
            lookup,
            uptime,
        } => json!({
            "status": "Complete",
            "report_id": id,
            "store_id": store_id,
            "store_found": lookup.is_found(),
            "csv_file": artifact,
            "report": uptime,
        }),
        ReportState::Failed { store_id, reason } => json!({
            "status": "Failed",
            "report_id": id,
            "store_id": store_id,
            "error": reason,
        }),
    };

    Response::json(200, body)
}
