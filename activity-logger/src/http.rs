//! HTTP transport used to reach the ingestion backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Error, Result};

/// Status and raw body of a backend response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into an [`Error::Http`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Http {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Sends an authenticated JSON POST.
///
/// A failure to obtain any response (DNS, connect, timeout) is
/// `Err(Error::Network)`; every response, whatever its status, is `Ok`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, bearer: &str, body: &Value) -> Result<TransportResponse>;
}

/// `reqwest`-backed transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, bearer: &str, body: &Value) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("POST {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        // A body that cannot be read still leaves us a usable status.
        let body = response.text().await.unwrap_or_default();

        Ok(TransportResponse { status, body })
    }
}
