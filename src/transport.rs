//! HTTP access to the Prometheus-compatible query backend.

use async_trait::async_trait;

use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};

/// Raw backend answer; status handling is left to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a GET against a fully built query URL.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse>;

    /// Base URL the query paths are appended to.
    fn base_url(&self) -> &str;
}

/// Backend health
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub reachable: bool,
}

/// reqwest-backed client for a Prometheus server
pub struct PrometheusClient {
    base_url: String,
    client: reqwest::Client,
}

impl PrometheusClient {
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.prometheus_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Probe the backend's readiness endpoint
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let url = format!("{}/-/healthy", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MetricsError::Transport(e.to_string()))?;

        let status = resp.status();
        Ok(HealthStatus {
            status: status.canonical_reason().unwrap_or("unknown").to_lowercase(),
            reachable: status.is_success(),
        })
    }

    /// Fallback health status when the backend is unavailable
    pub fn fallback_health() -> HealthStatus {
        HealthStatus {
            status: "unavailable".to_string(),
            reachable: false,
        }
    }
}

#[async_trait]
impl QueryTransport for PrometheusClient {
    async fn get(&self, url: &str) -> Result<TransportResponse> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MetricsError::Transport(format!("{}: {}", url, e)))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(TransportResponse { status, body })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
