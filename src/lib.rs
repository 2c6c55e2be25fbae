//! # sigma-metrics
//!
//! Prometheus query generation and result normalization for the Ryzanstein
//! cluster dashboards. Declarative metric definitions are bound to caller
//! parameters, issued against a query backend, parsed from whichever of the
//! three response shapes comes back and humanized into one consistent unit
//! per metric.

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod query;
pub mod registry;
pub mod spans;
pub mod stats;
pub mod telemetry;
pub mod transport;
pub mod units;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use assembler::AssembledResponse;
pub use catalog::MetricKeys;
pub use config::MetricsConfig;
pub use engine::MetricsEngine;
pub use error::{MetricsError, Result};
pub use query::QueryParams;
pub use registry::{MetricDefinition, MetricRegistry};
pub use units::{humanize, HumanizedValue, UnitType};

use stats::StatsSnapshot;
use transport::{PrometheusClient, QueryTransport};

/// Ready-to-use pipeline over the built-in catalog
pub struct SigmaMetrics {
    config: MetricsConfig,
    engine: MetricsEngine,
}

/// Pipeline snapshot for export
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub service: String,
    pub metric_count: usize,
    pub stats: StatsSnapshot,
}

impl SigmaMetrics {
    /// Built-in registry queried over HTTP at `config.prometheus_url`.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Arc::new(catalog::builtin_registry()?);
        let transport = Arc::new(PrometheusClient::new(&config)?);
        Ok(Self::with_transport(config, registry, transport))
    }

    /// Custom registry and transport, e.g. a synthetic metric set in tests.
    pub fn with_transport(
        config: MetricsConfig,
        registry: Arc<MetricRegistry>,
        transport: Arc<dyn QueryTransport>,
    ) -> Self {
        let engine = MetricsEngine::new(&config, registry, transport);
        Self { config, engine }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn engine(&self) -> &MetricsEngine {
        &self.engine
    }

    /// Evaluate `keys` as one batch.
    pub async fn query(
        &self,
        keys: &[&str],
        params: &QueryParams,
    ) -> BTreeMap<String, AssembledResponse> {
        self.engine
            .query(keys, params, &CancellationToken::new())
            .await
    }

    /// Evaluate `keys`, giving up on outstanding requests once `cancel` fires.
    pub async fn query_with_cancel(
        &self,
        keys: &[&str],
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, AssembledResponse> {
        self.engine.query(keys, params, cancel).await
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            service: self.config.service_name.clone(),
            metric_count: self.engine.registry().len(),
            stats: self.engine.stats().snapshot(),
        }
    }
}
