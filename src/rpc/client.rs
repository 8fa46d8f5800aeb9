//! Minimal JSON-RPC 2.0 client over HTTP.
//!
//! # Responsibilities
//! - Frame requests with monotonically increasing ids
//! - Enforce a per-request deadline
//! - Separate transport failures, HTTP status failures and JSON-RPC errors

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Shorthand used by services and tests.
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        RpcError::Remote {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Transport failures, timeouts and 5xx responses.
    pub fn is_unavailable(&self) -> bool {
        match self {
            RpcError::Transport(_) | RpcError::Timeout(_) => true,
            RpcError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC client bound to one endpoint.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and deserialize its `result`.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        tracing::debug!(method, id, url = %self.url, "JSON-RPC request");
        let result = match with_deadline(self.timeout, self.send(&request)).await {
            Ok(result) => result,
            Err(elapsed) => Err(RpcError::Timeout(elapsed.0)),
        };
        metrics::record_rpc(method, start);

        let value = result.inspect_err(|e| {
            tracing::warn!(method, id, error = %e, "JSON-RPC call failed");
        })?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidResponse(format!("{} result: {}", method, e)))
    }

    async fn send<P: Serialize>(&self, request: &Request<'_, P>) -> Result<Value, RpcError> {
        let response = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout(self.timeout)
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        // JSON-RPC servers frequently report errors with a 4xx/5xx status
        // and a well-formed error object; prefer the error object.
        let parsed: Result<Response, _> = serde_json::from_str(&body);
        match parsed {
            Ok(Response {
                error: Some(error), ..
            }) => Err(RpcError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            Ok(Response { result, .. }) if status.is_success() => Ok(result.unwrap_or(Value::Null)),
            _ if !status.is_success() => Err(RpcError::Http {
                status: status.as_u16(),
                body: truncate(&body),
            }),
            Err(e) => Err(RpcError::InvalidResponse(e.to_string())),
            Ok(_) => Err(RpcError::InvalidResponse("missing result".to_string())),
        }
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 256;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
