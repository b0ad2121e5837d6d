// HTTP client - talks to a running labkeeper service

use crate::error::{KeeperError, Result};
use crate::http::protocol::{
    ConfigResponse, DetectResponse, ErrorBody, HealthResponse, StartRequest, StartResponse,
    StatusResponse, StopResponse,
};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Default API address for the CLI
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

/// Start and restart wait out the launch grace period and the settle delay
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the labkeeper REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    client: Client,
}

impl ApiClient {
    /// Create a client for the service at `base`
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| KeeperError::ConnectionError(format!("Invalid API URL '{}': {}", base, e)))?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| KeeperError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.send::<(), _>(Method::GET, "/api/health", None).await
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.send::<(), _>(Method::GET, "/api/status", None).await
    }

    pub async fn start(&self, request: &StartRequest) -> Result<StartResponse> {
        self.send(Method::POST, "/api/start", Some(request)).await
    }

    pub async fn stop(&self) -> Result<StopResponse> {
        self.send::<(), _>(Method::POST, "/api/stop", None).await
    }

    pub async fn restart(&self, request: &StartRequest) -> Result<StartResponse> {
        self.send(Method::POST, "/api/restart", Some(request)).await
    }

    pub async fn detect_python(&self) -> Result<DetectResponse> {
        self.send::<(), _>(Method::GET, "/api/detect_python", None).await
    }

    pub async fn load_config(&self) -> Result<ConfigResponse> {
        self.send::<(), _>(Method::GET, "/api/load_config", None).await
    }

    async fn send<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self
            .base
            .join(path)
            .map_err(|e| KeeperError::ProtocolError(format!("Invalid endpoint {}: {}", path, e)))?;

        let mut request = self.client.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            KeeperError::ConnectionError(format!(
                "Failed to reach labkeeper at {}: {}",
                self.base, e
            ))
        })?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| KeeperError::ConnectionError(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            // Failures carry {success: false, message}
            return Err(match serde_json::from_slice::<ErrorBody>(&bytes) {
                Ok(body) => KeeperError::Other(body.message),
                Err(_) => KeeperError::ProtocolError(format!(
                    "Service answered {} with an unexpected body",
                    status
                )),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            KeeperError::DeserializationError(format!("Failed to deserialize response: {}", e))
        })
    }
}
