//! Request/response plumbing between a client and the sync authority.
//!
//! [`Transport`] is the raw request function; [`SyncTransportClient`] layers
//! timeouts, retries and error classification on top of it.

mod client;
mod http;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::util::compact_text;

pub use client::{backoff_with_jitter, RetryPolicy, SyncTransportClient, DEFAULT_REQUEST_TIMEOUT};
pub use http::HttpTransport;

/// HTTP method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Repeating the call has the same effect as making it once.
    pub const fn is_idempotent(self) -> bool {
        !matches!(self, Self::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relative to the server base URL, starting with `/`
    pub path: String,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw response. Non-2xx statuses are not errors at this level.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed JSON body, `Null` when empty; error bodies that are not JSON
    /// are kept as a string
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Classified failure of a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed or was interrupted
    #[error("network error: {0}")]
    Network(String),

    /// No response within the deadline; never retried by the transport
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// 400/422: the payload was rejected and must not be retried
    #[error("validation failed ({status}): {message}")]
    Validation { status: u16, message: String },

    /// 5xx: the authority failed; callers may retry
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Any other 4xx
    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    /// Body could not be parsed
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Classify a non-2xx response. Returns `None` for success statuses.
    pub fn from_status(status: u16, body: &Value) -> Option<Self> {
        let message = match body {
            Value::Null => String::new(),
            Value::String(text) => compact_text(text),
            Value::Object(object) => object
                .get("error")
                .or_else(|| object.get("message"))
                .and_then(Value::as_str)
                .map_or_else(|| compact_text(&body.to_string()), compact_text),
            other => compact_text(&other.to_string()),
        };
        match status {
            200..=299 => None,
            400 | 422 => Some(Self::Validation { status, message }),
            500..=599 => Some(Self::Server { status, message }),
            _ => Some(Self::Client { status, message }),
        }
    }

    /// HTTP status if the authority answered.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Validation { status, .. }
            | Self::Server { status, .. }
            | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether an idempotent call may be repeated.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// Whether the failure means the authority is unreachable.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Raw request function to the sync authority.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Builds a transport for a server base URL.
pub type Connector =
    Arc<dyn Fn(&str) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// Connector producing [`HttpTransport`]s.
pub fn http_connector() -> Connector {
    Arc::new(|base_url: &str| {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(base_url)?);
        Ok(transport)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_statuses() {
        assert_eq!(TransportError::from_status(204, &Value::Null), None);
        assert!(matches!(
            TransportError::from_status(422, &json!({"error": "bad id"})),
            Some(TransportError::Validation { status: 422, ref message }) if message == "bad id"
        ));
        assert!(matches!(
            TransportError::from_status(503, &json!("down")),
            Some(TransportError::Server { status: 503, .. })
        ));
        assert!(matches!(
            TransportError::from_status(404, &Value::Null),
            Some(TransportError::Client { status: 404, .. })
        ));
    }

    #[test]
    fn only_network_and_server_errors_are_retryable() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::from_status(500, &Value::Null).unwrap().is_retryable());
        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TransportError::from_status(400, &Value::Null).unwrap().is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn post_is_not_idempotent() {
        assert!(!Method::Post.is_idempotent());
        assert!(Method::Put.is_idempotent());
        assert!(Method::Delete.is_idempotent());
        assert_eq!(serde_json::to_value(Method::Delete).unwrap(), json!("DELETE"));
    }
}
