//! HTTP transport
//!
//! Sends each operation as a JSON POST to the compute service route for that
//! operation (`/run-simulation`, `/run-status`, `/run-cancel`) and decodes
//! the JSON body as a [`RunResponse`].

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{TransportError, TransportResult};
use crate::item::Operation;
use crate::response::RunResponse;
use crate::transport::Transport;

/// [`Transport`] over HTTP+JSON
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Base URL of the compute service (e.g., "http://localhost:8000")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a client built from `config`
    pub fn new(config: &ServerConfig) -> TransportResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::with_client(config.base_url.clone(), client))
    }

    /// Create a transport with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS settings, cookies, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the compute service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, operation: Operation) -> String {
        format!("{}{}", self.base_url, operation.route())
    }

    async fn handle_response(&self, response: reqwest::Response) -> TransportResult<RunResponse> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Parse(format!("Failed to parse JSON response: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, operation: Operation, request: &Value) -> TransportResult<RunResponse> {
        let url = self.url(operation);
        debug!(%operation, %url, "sending request");
        let response = self.client.post(&url).json(request).send().await?;

        self.handle_response(response).await
    }
}
