//! The HTTP capability workloads call through.
//!
//! The engine only needs `get` and `post`; anything that can issue those (a real client, a
//! stub in tests) implements [`Transport`]. A transport error means no response arrived at
//! all and is distinct from a response with an error status.
use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Statuses of 400 and above count as failed requests.
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("no transport configured")]
    Unconfigured,

    #[error("transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<Response, TransportError>;

    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<Response, TransportError>;
}

/// Stand-in used when a run is started without a transport.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Unconfigured;

#[async_trait]
impl Transport for Unconfigured {
    async fn get(&self, _url: &str) -> Result<Response, TransportError> {
        Err(TransportError::Unconfigured)
    }

    async fn post(
        &self,
        _url: &str,
        _body: String,
        _headers: &[(&str, &str)],
    ) -> Result<Response, TransportError> {
        Err(TransportError::Unconfigured)
    }
}
