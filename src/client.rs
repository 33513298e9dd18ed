//! The request capability virtual users talk to the target through.
//!
//! Load tests only depend on the [`RequestClient`] trait. The default implementation,
//! [`ReqwestClient`], wraps a single pooled
//! [`reqwest::Client`](https://docs.rs/reqwest/*/reqwest/struct.Client.html) shared by
//! every virtual user.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::FlockError;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a request never produced a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Other,
}

/// A request that failed before a response was received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}
impl TransportError {
    pub fn new(kind: TransportErrorKind, message: &str) -> Self {
        TransportError {
            kind,
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> TransportError {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_request() || err.is_builder() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        TransportError {
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// A response, or the stand-in for one when the transport failed.
#[derive(Clone, Debug)]
pub struct ClientResponse {
    /// HTTP status code, 0 if no response was received.
    pub status: u16,
    pub body: String,
    /// Time from sending the request to receiving the complete body.
    pub latency: Duration,
    /// Set when no response was received.
    pub error: Option<TransportError>,
}
impl ClientResponse {
    pub fn new(status: u16, body: &str, latency: Duration) -> Self {
        ClientResponse {
            status,
            body: body.to_string(),
            latency,
            error: None,
        }
    }

    /// An empty status 0 response, every check run against it fails.
    pub fn from_transport_error(error: TransportError, latency: Duration) -> Self {
        ClientResponse {
            status: 0,
            body: String::new(),
            latency,
            error: Some(error),
        }
    }

    /// Returns `true` for 2xx responses.
    pub fn is_success(&self) -> bool {
        http::StatusCode::from_u16(self.status)
            .map(|s| s.is_success())
            .unwrap_or(false)
    }

    /// Parse the body as untyped JSON, `None` if it isn't JSON.
    pub fn json_value(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Parse the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FlockError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Issues requests on behalf of virtual users.
#[async_trait]
pub trait RequestClient: Send + Sync {
    /// POST `body` to `url` with the given headers.
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<ClientResponse, TransportError>;

    /// GET `url`.
    async fn get(&self, url: &str) -> Result<ClientResponse, TransportError>;
}

/// [`RequestClient`] backed by a pooled reqwest client.
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    client: Client,
}
impl ReqwestClient {
    /// Build a client with a per-request timeout and gzip support.
    pub fn new(timeout: Duration) -> Result<Self, FlockError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(ReqwestClient { client })
    }

    async fn send(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> Result<ClientResponse, TransportError> {
        let started = Instant::now();
        let response = request_builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ClientResponse::new(status, &body, started.elapsed()))
    }
}

#[async_trait]
impl RequestClient for ReqwestClient {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<ClientResponse, TransportError> {
        let mut request_builder = self.client.post(url).body(body);
        for (name, value) in headers {
            request_builder = request_builder.header(*name, *value);
        }
        self.send(request_builder).await
    }

    async fn get(&self, url: &str) -> Result<ClientResponse, TransportError> {
        self.send(self.client.get(url)).await
    }
}
