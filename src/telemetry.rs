//! Subscriber setup: env-filtered logs plus optional OTLP trace export.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self as sdktrace, Sampler};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber described by `config`.
///
/// Must run inside a tokio runtime when `traces_enabled` is set, since the
/// batch span processor spawns onto it. Fails if a subscriber is already set.
pub fn init_tracing(config: &MetricsConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let otel = if config.traces_enabled {
        Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(config)?))
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(filter).with(otel);
    let installed = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };
    installed.map_err(|e| MetricsError::Telemetry(e.to_string()))
}

fn otlp_tracer(config: &MetricsConfig) -> Result<sdktrace::Tracer> {
    let sampler = if config.sampling_rate >= 1.0 {
        Sampler::AlwaysOn
    } else {
        Sampler::TraceIdRatioBased(config.sampling_rate.max(0.0))
    };

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(config.otlp_endpoint.clone()),
        )
        .with_trace_config(
            sdktrace::config()
                .with_sampler(sampler)
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    config.service_name.clone(),
                )])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| MetricsError::Telemetry(e.to_string()))
}

/// Flush and stop the OTLP exporter, if one was installed.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
