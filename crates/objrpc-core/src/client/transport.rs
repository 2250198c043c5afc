//! Request delivery for proxies.
//!
//! A transport moves one raw JSON body to an endpoint and returns the raw
//! response body. Failures are reported as [`TransportError`] and never
//! reinterpreted by the proxy layer.

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::server::Server;
use reqwest::blocking::Client;
use reqwest::header;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub trait Transport: Send + Sync {
    /// Post `body` to `endpoint`, returning the response body.
    fn post(&self, endpoint: &str, body: &str) -> Result<String, TransportError>;
}

/// Blocking HTTP transport.
///
/// The underlying client keeps a cookie store, so every proxy sharing one
/// `HttpTransport` shares one session.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(ClientConfig::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ClientConfig::USER_AGENT)
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn post(&self, endpoint: &str, body: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text()?)
    }
}

/// In-process transport routing endpoints under `base` to a [`Server`].
///
/// `base` is the delivery route; `base/<id>` targets registered object `id`.
#[derive(Clone)]
pub struct Loopback {
    base: String,
    server: Arc<Server>,
}

impl Loopback {
    pub fn new(base: impl Into<String>, server: Arc<Server>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            server,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }
}

impl Transport for Loopback {
    fn post(&self, endpoint: &str, body: &str) -> Result<String, TransportError> {
        let sub_path = endpoint
            .strip_prefix(&self.base)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| TransportError::NoRoute(endpoint.to_string()))?;
        debug!("Loopback request to {} ({} bytes)", endpoint, body.len());
        Ok(self.server.handle_path(Some(sub_path), body.as_bytes()))
    }
}
