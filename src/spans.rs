//! Named tracing spans for pipeline stages.

use tracing::{info_span, Span};

use crate::query::GeneratedQuery;

/// Pre-defined spans for the query pipeline
pub struct SpanTemplates;

impl SpanTemplates {
    /// Batch of metric keys evaluated together
    pub fn batch(keys: usize) -> Span {
        info_span!("metrics.batch", metric.count = keys)
    }

    /// One metric through generate, fetch, parse and assemble
    pub fn metric(key: &str, range: bool) -> Span {
        info_span!("metrics.evaluate", metric.key = key, metric.range = range)
    }

    /// One template's backend request
    pub fn query(key: &str, template: usize, query: &GeneratedQuery) -> Span {
        info_span!(
            "metrics.query",
            metric.key = key,
            query.template = template,
            query.path = query.endpoint_path(),
        )
    }

    /// Composite assembly from constituents
    pub fn composite(key: &str, constituents: usize) -> Span {
        info_span!(
            "metrics.composite",
            metric.key = key,
            composite.constituents = constituents
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_construct_without_subscriber() {
        let query = GeneratedQuery {
            query: "up".to_string(),
            range_clause: String::new(),
        };
        let _batch = SpanTemplates::batch(3).entered();
        let _metric = SpanTemplates::metric("cluster_cpu", false);
        let _query = SpanTemplates::query("cluster_cpu", 0, &query);
        let _composite = SpanTemplates::composite("cluster_overview", 5);
    }
}
