//! Transport port (driven/secondary port)
//!
//! The asynchronous request/response primitive the workers issue remote
//! operations through. The production adapter lives in `cdnmirror-cloud`;
//! tests substitute in-memory implementations.
//!
//! ## Design Notes
//!
//! - The request is a plain value so adapters and fakes can inspect it.
//! - A response with any HTTP status is `Ok`; only failures to obtain a
//!   response (DNS, connect, TLS, timeout) are `Err`. Classifying statuses
//!   is the caller's business.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Header carrying the account token
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header naming the target of a server-side copy
pub const DESTINATION_HEADER: &str = "Destination";

/// HTTP verbs the daemon uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteMethod {
    Get,
    Put,
    Delete,
    /// Server-side copy
    Copy,
}

impl RemoteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteMethod::Get => "GET",
            RemoteMethod::Put => "PUT",
            RemoteMethod::Delete => "DELETE",
            RemoteMethod::Copy => "COPY",
        }
    }
}

impl Display for RemoteMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    /// Opened and streamed at send time; every retry reads it afresh
    File(PathBuf),
}

/// A single request to the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub method: RemoteMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RemoteRequest {
    pub fn new(method: RemoteMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(RequestBody::Bytes(body));
        self
    }

    /// Streams the contents of `path` as the body
    pub fn file_body(mut self, path: impl Into<PathBuf>) -> Self {
        self.body = Some(RequestBody::File(path.into()));
        self
    }

    /// Local file the body streams from, if any
    pub fn body_file(&self) -> Option<&std::path::Path> {
        match &self.body {
            Some(RequestBody::File(path)) => Some(path),
            _ => None,
        }
    }

    /// First value of header `name` (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The store's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    pub fn with_body(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain any response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS, connect, TLS or mid-body I/O failure
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The request could not be built (bad header, bad URL)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The local file backing the body could not be opened
    #[error("cannot read upload body: {0}")]
    LocalFile(String),
}

impl TransportError {
    /// Whether trying again later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout)
    }
}

/// Sends requests to the object store
#[async_trait]
pub trait ITransport: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError>;
}
