use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parser::ParseMode;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Service name for span attribution
    pub service_name: String,
    /// Base URL of the Prometheus-compatible query backend
    pub prometheus_url: String,
    /// Per-request timeout handed to the HTTP client
    pub request_timeout_secs: u64,
    /// Decimal digits kept when humanizing values
    pub precision: u32,
    /// How malformed backend responses are treated
    pub parse_mode: ParseMode,
    /// OTLP endpoint for span export
    pub otlp_endpoint: String,
    /// Sampling rate (0.0 to 1.0)
    pub sampling_rate: f64,
    /// Enable trace export
    pub traces_enabled: bool,
    /// Emit logs as JSON lines instead of plain text
    pub json_logs: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            service_name: "sigma-metrics".to_string(),
            prometheus_url: "http://localhost:9090".to_string(),
            request_timeout_secs: 10,
            precision: 2,
            parse_mode: ParseMode::Lenient,
            otlp_endpoint: "http://localhost:4317".to_string(),
            sampling_rate: 1.0,
            traces_enabled: false,
            json_logs: false,
        }
    }
}

impl MetricsConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `SIGMA_METRICS_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("SIGMA_METRICS_PROMETHEUS_URL") {
            self.prometheus_url = url;
        }
        if let Some(secs) = env_parse("SIGMA_METRICS_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
        if let Some(precision) = env_parse("SIGMA_METRICS_PRECISION") {
            self.precision = precision;
        }
        if let Ok(mode) = std::env::var("SIGMA_METRICS_PARSE_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "strict" => self.parse_mode = ParseMode::Strict,
                "lenient" => self.parse_mode = ParseMode::Lenient,
                other => tracing::warn!("ignoring unknown parse mode {:?}", other),
            }
        }
        if let Ok(endpoint) = std::env::var("SIGMA_METRICS_OTLP_ENDPOINT") {
            self.otlp_endpoint = endpoint;
            self.traces_enabled = true;
        }
        if let Some(json) = env_parse("SIGMA_METRICS_JSON_LOGS") {
            self.json_logs = json;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
