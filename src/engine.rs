//! Orchestration: generate, fetch, parse and assemble metrics in batches.
//!
//! Templates of one metric are fetched concurrently and joined before
//! assembly. Composite metrics are evaluated level by level after the
//! metrics they aggregate, and are skipped when any of those failed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::assembler::{AssembledResponse, ResponseAssembler};
use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};
use crate::parser::{ParsedOutput, ParsedResult, ResultKind, ResultParser};
use crate::query::{generate, GeneratedQuery, QueryParams};
use crate::registry::{MetricDefinition, MetricRegistry};
use crate::spans::SpanTemplates;
use crate::stats::{PipelineStats, StatNames};
use crate::transport::QueryTransport;
use crate::units::find_max_unit;

pub struct MetricsEngine {
    registry: Arc<MetricRegistry>,
    transport: Arc<dyn QueryTransport>,
    parser: ResultParser,
    assembler: ResponseAssembler,
    stats: Arc<PipelineStats>,
}

impl MetricsEngine {
    pub fn new(
        config: &MetricsConfig,
        registry: Arc<MetricRegistry>,
        transport: Arc<dyn QueryTransport>,
    ) -> Self {
        Self {
            registry,
            transport,
            parser: ResultParser::new(config.parse_mode),
            assembler: ResponseAssembler::new(config.precision),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Evaluate a single metric, composite or not.
    pub async fn evaluate(
        &self,
        key: &str,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> AssembledResponse {
        self.query(&[key], params, cancel)
            .await
            .remove(key)
            .unwrap_or_else(|| AssembledResponse::failed(MetricsError::NotFound(key.to_string())))
    }

    /// Evaluate a batch. Every requested key gets an entry; failures are
    /// reported per key through `error`.
    pub async fn query(
        &self,
        keys: &[&str],
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> BTreeMap<String, AssembledResponse> {
        let span = SpanTemplates::batch(keys.len());
        async move {
            let mut computed: BTreeMap<String, AssembledResponse> = BTreeMap::new();

            for level in self.registry.evaluation_levels(keys.iter().copied()) {
                if cancel.is_cancelled() {
                    for key in level {
                        computed.insert(
                            key.to_string(),
                            AssembledResponse::failed(MetricsError::Cancelled),
                        );
                    }
                    continue;
                }

                let (composites, leaves): (Vec<&MetricDefinition>, Vec<&MetricDefinition>) = level
                    .iter()
                    .filter_map(|key| self.registry.lookup(key).ok())
                    .partition(|def| def.is_composite());

                let evaluated = join_all(leaves.into_iter().map(|def| async move {
                    (def.key, self.evaluate_leaf(def, params, cancel).await)
                }))
                .await;
                for (key, response) in evaluated {
                    computed.insert(key.to_string(), response);
                }

                for def in composites {
                    let response = self.compose(def, &computed);
                    computed.insert(def.key.to_string(), response);
                }
            }

            let mut out = BTreeMap::new();
            for key in keys {
                let response = match computed.get(*key) {
                    Some(response) => response.clone(),
                    None => {
                        self.stats.increment(StatNames::METRICS_NOT_FOUND);
                        AssembledResponse::failed(MetricsError::NotFound(key.to_string()))
                    }
                };
                out.insert(key.to_string(), response);
            }

            let failed = out.values().filter(|r| r.is_error()).count();
            info!(requested = keys.len(), failed, "metrics batch complete");
            out
        }
        .instrument(span)
        .await
    }

    async fn evaluate_leaf(
        &self,
        def: &MetricDefinition,
        params: &QueryParams,
        cancel: &CancellationToken,
    ) -> AssembledResponse {
        let queries: Vec<GeneratedQuery> = def
            .query_templates
            .iter()
            .zip(&def.binders)
            .map(|(template, binder)| generate(template, binder.as_ref(), params))
            .collect();
        let is_range = queries.iter().any(GeneratedQuery::is_range);

        let span = SpanTemplates::metric(def.key, is_range);
        async move {
            let outcomes = join_all(
                queries
                    .iter()
                    .enumerate()
                    .map(|(index, query)| self.fetch(def, index, query, cancel)),
            )
            .await;

            let mut results = Vec::with_capacity(outcomes.len());
            let mut errors = Vec::new();
            let mut max_value = 0.0_f64;
            for ((index, outcome), query) in outcomes.into_iter().enumerate().zip(&queries) {
                match outcome {
                    Ok(parsed) => {
                        max_value = max_value.max(parsed.max_value);
                        results.push(parsed.result);
                    }
                    Err(MetricsError::Cancelled) => {
                        return AssembledResponse {
                            label: Some(def.label.to_string()),
                            ..AssembledResponse::failed(MetricsError::Cancelled)
                        };
                    }
                    Err(e) => {
                        let counter = match e {
                            MetricsError::Parse(_) => StatNames::PARSE_FAILURES,
                            _ => StatNames::QUERY_FAILURES,
                        };
                        self.stats.increment(counter);
                        warn!(metric = def.key, template = index, "query failed: {}", e);
                        errors.push(format!("template {}: {}", index, e));
                        let kind = ResultKind::of(def.shape, query.is_range());
                        results.push(ParsedResult::empty(kind));
                    }
                }
            }

            let unit = def
                .primary_unit_type()
                .map(|unit_type| find_max_unit(unit_type, &[max_value]))
                .unwrap_or_default();
            debug!(metric = def.key, max_value, unit = %unit, "selected display unit");

            let mut response = self.assembler.assemble(def, &unit, is_range, &results);
            response.queries = Some(queries.iter().map(|q| q.query.clone()).collect());
            if !errors.is_empty() {
                response.error = Some(errors.join("; "));
            }
            response
        }
        .instrument(span)
        .await
    }

    async fn fetch(
        &self,
        def: &MetricDefinition,
        index: usize,
        query: &GeneratedQuery,
        cancel: &CancellationToken,
    ) -> Result<ParsedOutput> {
        let url = query.url(self.transport.base_url())?;
        let span = SpanTemplates::query(def.key, index, query);
        async move {
            self.stats.increment(StatNames::QUERIES_ISSUED);
            let started = Instant::now();
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MetricsError::Cancelled),
                response = self.transport.get(&url) => response?,
            };
            self.stats.record_histogram(
                StatNames::QUERY_LATENCY_MS,
                started.elapsed().as_secs_f64() * 1000.0,
            );

            if !response.is_success() {
                return Err(MetricsError::Transport(format!(
                    "{} returned status {}",
                    query.endpoint_path(),
                    response.status
                )));
            }
            self.parser
                .parse(def, def.is_primary(index), &response.body, query.is_range())
        }
        .instrument(span)
        .await
    }

    fn compose(
        &self,
        def: &MetricDefinition,
        computed: &BTreeMap<String, AssembledResponse>,
    ) -> AssembledResponse {
        let _guard = SpanTemplates::composite(def.key, def.composite_of.len()).entered();
        let failed: Vec<&str> = def
            .composite_of
            .iter()
            .copied()
            .filter(|key| computed.get(*key).is_some_and(AssembledResponse::is_error))
            .collect();
        if !failed.is_empty() {
            warn!(metric = def.key, "skipping composite, constituents failed: {:?}", failed);
            return AssembledResponse {
                label: Some(def.label.to_string()),
                error: Some(format!("constituents failed: {}", failed.join(", "))),
                ..Default::default()
            };
        }
        self.assembler.assemble_composite(def, &self.registry, computed)
    }
}
