use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Url;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use crate::types::{ProveRequest, RegisterRequest, RenewRequest, SubmitRequest, decode_body};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, content_type: "application/json", body },
            Err(_) => Self::error(500, "internal_error"),
        }
    }

    fn error(status: u16, code: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({ "error": code }).to_string(),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, CoordinatorError>) -> Self {
        match result {
            Ok(value) => Self::json(200, &value),
            Err(e) => {
                if e.status() >= 500 {
                    error!(error = %e, "request failed");
                }
                Self::json(e.status(), &e.to_body())
            }
        }
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
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        _ => "Internal Server Error",
    }
}

pub struct ApiServer {
    coordinator: Arc<Coordinator>,
    metrics_enabled: bool,
    read_timeout: Duration,
    started: Instant,
}

impl ApiServer {
    pub fn new(coordinator: Arc<Coordinator>, metrics_enabled: bool) -> Self {
        Self { coordinator, metrics_enabled, read_timeout: READ_TIMEOUT, started: Instant::now() }
    }

    /// Deadline for receiving a complete request (head and body).
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub async fn bind(addr: &str) -> io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "coordinator listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(socket).await {
                    debug!(peer = %peer, error = %e, "connection dropped");
                }
            });
        }
    }

    async fn handle_connection(&self, mut socket: TcpStream) -> io::Result<()> {
        let read = tokio::time::timeout(self.read_timeout, read_request(&mut socket)).await;
        let response = match read {
            Err(_elapsed) => HttpResponse::error(408, "request_timeout"),
            Ok(read) => match read? {
                Ok(Some(req)) => {
                    debug!(method = %req.method, target = %req.target, "request");
                    self.handle(&req)
                }
                Ok(None) => return Ok(()),
                Err(resp) => resp,
            },
        };
        socket.write_all(response.to_http().as_bytes()).await?;
        socket.shutdown().await
    }

    pub fn handle(&self, req: &HttpRequest) -> HttpResponse {
        let Ok(url) = Url::parse(&format!("http://coordinator{}", req.target)) else {
            return HttpResponse::error(400, "bad_request");
        };
        let c = &self.coordinator;

        match (req.method.as_str(), url.path()) {
            ("GET", "/healthz") => HttpResponse::json(
                200,
                &json!({
                    "ok": true,
                    "uptimeSeconds": self.started.elapsed().as_secs(),
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            ),
            ("GET", "/metrics") if self.metrics_enabled => match c.metrics().export() {
                Ok(body) => HttpResponse {
                    status: 200,
                    content_type: "application/openmetrics-text; version=1.0.0; charset=utf-8",
                    body,
                },
                Err(_) => HttpResponse::error(500, "internal_error"),
            },
            ("POST", "/v1/agent/register") => HttpResponse::from_result(
                decode_body::<RegisterRequest>(&req.body, CoordinatorError::InvalidFields)
                    .and_then(|r| c.register(&r)),
            ),
            ("POST", "/v1/agent/prove") => HttpResponse::from_result(
                decode_body::<ProveRequest>(&req.body, CoordinatorError::InvalidFields)
                    .and_then(|r| c.prove(&r)),
            ),
            ("POST", "/v1/agent/renew") => HttpResponse::from_result(
                decode_body::<RenewRequest>(&req.body, CoordinatorError::MissingLeaseToken)
                    .and_then(|r| c.renew(&r)),
            ),
            ("GET", path) if path.starts_with("/v1/agent/") => {
                HttpResponse::from_result(c.agent(&path["/v1/agent/".len()..]))
            }
            ("GET", "/v1/challenge") => {
                let nonce = url.query_pairs().find(|(k, _)| k == "nonce").map(|(_, v)| v.into_owned());
                HttpResponse::from_result(
                    c.authorize(req.header("authorization"))
                        .and_then(|miner| c.challenge(&miner, nonce.as_deref())),
                )
            }
            ("POST", "/v1/submit") => HttpResponse::from_result(
                c.authorize(req.header("authorization")).and_then(|miner| {
                    let body = decode_body::<SubmitRequest>(&req.body, CoordinatorError::InvalidNonce)?;
                    c.submit(&miner, &body)
                }),
            ),
            ("GET", "/v1/epoch") => HttpResponse::json(200, &c.epoch()),
            ("GET", "/v1/stats") => HttpResponse::json(200, &c.stats()),
            ("GET", "/v1/config") => HttpResponse::json(200, &c.config_view()),
            _ => HttpResponse::from_result::<()>(Err(CoordinatorError::NotFound)),
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads one request. `Ok(None)` means the peer closed before sending
/// anything; `Ok(Err(_))` is a response to send back instead of routing.
async fn read_request(socket: &mut TcpStream) -> io::Result<Result<Option<HttpRequest>, HttpResponse>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Ok(Err(HttpResponse::error(431, "headers_too_large")));
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if buf.is_empty() { Ok(None) } else { Err(HttpResponse::error(400, "bad_request")) });
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut parts = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(Err(HttpResponse::error(400, "bad_request")));
    };

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = match headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-length")) {
        Some((_, v)) => match v.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Ok(Err(HttpResponse::error(400, "bad_request"))),
        },
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Ok(Err(HttpResponse::error(413, "body_too_large")));
    }

    let mut body = buf.split_off(head_end + 4);
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Err(HttpResponse::error(400, "bad_request")));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Ok(Some(HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
        headers,
        body,
    })))
}
