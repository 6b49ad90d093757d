//! Error types surfaced by the authenticated client.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// Structured code a server attaches to a 400 when a platform user omitted the tenant context.
pub const TENANT_CONTEXT_REQUIRED_CODE: &str = "TENANT_CONTEXT_REQUIRED";

/// Body of a failed response, kept both raw and (when possible) parsed as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    raw: String,
    json: Option<Value>,
}

impl ErrorBody {
    /// Build an error body from response bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(bytes).into_owned();
        let json = serde_json::from_slice::<Value>(bytes).ok();
        Self { raw, json }
    }

    /// Raw body text.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parsed JSON payload when the body was valid JSON.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Human-readable message (`message`, `error` or `detail`), falling back to the raw text.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        let from_json = self.json.as_ref().and_then(|json| {
            ["message", "error", "detail"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str))
        });
        from_json.or_else(|| {
            let trimmed = self.raw.trim();
            (!trimmed.is_empty() && self.json.is_none()).then_some(trimmed)
        })
    }

    /// Machine-readable error code, if the server sent one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.json
            .as_ref()
            .and_then(|json| json.get("code"))
            .and_then(Value::as_str)
    }
}

/// Primary error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (connection failure, timeout).
    #[error("request transport failed")]
    Transport {
        /// HTTP method of the failed request.
        method: Method,
        /// Request path relative to the API base.
        path: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("request returned status {status}")]
    Status {
        /// HTTP method of the failed request.
        method: Method,
        /// Request path relative to the API base.
        path: String,
        /// Status returned by the server.
        status: StatusCode,
        /// Parsed response body.
        body: ErrorBody,
    },
    /// Exchanging the refresh token failed; shared by every request waiting on that refresh.
    #[error("token refresh failed")]
    Refresh {
        /// Error returned by the refresh endpoint.
        source: Arc<ClientError>,
    },
    /// The refresh attempt was dropped before it settled.
    #[error("token refresh was abandoned before completing")]
    RefreshAbandoned,
    /// Building the underlying HTTP client failed.
    #[error("failed to build HTTP client")]
    HttpClientBuild {
        /// Underlying builder error.
        source: reqwest::Error,
    },
    /// The request URL could not be built from the base URL and path.
    #[error("invalid request URL")]
    InvalidUrl {
        /// Path that failed to join.
        path: String,
        /// Underlying parse error.
        source: url::ParseError,
    },
    /// A header value contained characters that cannot be sent.
    #[error("invalid header value")]
    InvalidHeader {
        /// Header name.
        name: String,
    },
    /// Serialising a request body failed.
    #[error("failed to encode request body")]
    Encode {
        /// Request path.
        path: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// Deserialising a response body failed.
    #[error("failed to decode response body")]
    Decode {
        /// Request path.
        path: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl ClientError {
    /// HTTP status behind this error, looking through refresh failures.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Refresh { source } => source.status(),
            _ => None,
        }
    }

    /// Response body behind this error, looking through refresh failures.
    #[must_use]
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            Self::Status { body, .. } => Some(body),
            Self::Refresh { source } => source.body(),
            _ => None,
        }
    }

    /// Whether the server rejected the request's credentials.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    /// Whether the request hit the client timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
