//! HTTPS transport
//!
//! [`HttpTransport`] sends the workers' [`RemoteRequest`]s with a shared
//! `reqwest::Client` (rustls, connection pooling, whole-request timeout).
//! File bodies are streamed from disk, never held in memory whole.
//! Every HTTP status is returned as a response; only failures to get one
//! at all become [`TransportError`]s.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cdnmirror_cloud::client::HttpTransport;
//!
//! # fn example() -> Result<(), cdnmirror_cloud::CloudError> {
//! let transport = HttpTransport::new(Duration::from_secs(120))?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use cdnmirror_core::ports::{
    ITransport, RemoteMethod, RemoteRequest, RemoteResponse, RequestBody, TransportError,
};
use reqwest::{Body, Client, Method};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::CloudError;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("cdnmirror/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed [`ITransport`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

fn to_method(method: RemoteMethod) -> Result<Method, TransportError> {
    Ok(match method {
        RemoteMethod::Get => Method::GET,
        RemoteMethod::Put => Method::PUT,
        RemoteMethod::Delete => Method::DELETE,
        RemoteMethod::Copy => {
            Method::from_bytes(b"COPY").map_err(|e| TransportError::InvalidRequest(e.to_string()))?
        }
    })
}

async fn to_body(body: RequestBody) -> Result<Body, TransportError> {
    match body {
        RequestBody::Bytes(bytes) => Ok(Body::from(bytes)),
        RequestBody::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| TransportError::LocalFile(format!("{}: {e}", path.display())))?;
            Ok(Body::wrap_stream(ReaderStream::new(file)))
        }
    }
}

fn to_transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

#[async_trait]
impl ITransport for HttpTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        let method = to_method(request.method)?;
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(to_body(body).await?);
        }

        trace!(method = %request.method, url = %request.url, "Sending request");
        let response = builder.send().await.map_err(to_transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(to_transport_error)?;
        debug!(method = %request.method, path = request.url.path(), status, "Response received");

        Ok(RemoteResponse::with_body(status, body.to_vec()))
    }
}
