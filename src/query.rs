//! Query generation from templates and caller parameters.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;

use crate::error::{MetricsError, Result};

pub const INSTANT_QUERY_PATH: &str = "/api/v1/query";
pub const RANGE_QUERY_PATH: &str = "/api/v1/query_range";

/// Placeholder substituted positionally in query templates.
pub const PLACEHOLDER: &str = "%s";

const RANGE_PARAMS: [&str; 3] = ["start", "end", "step"];

/// What a binder substitutes for a parameter the caller did not supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingParam {
    /// Substitute an empty string (exact `=` matchers).
    Empty,
    /// Substitute `.*` (regex `=~` matchers).
    Wildcard,
}

impl MissingParam {
    pub fn default_value(self) -> &'static str {
        match self {
            MissingParam::Empty => "",
            MissingParam::Wildcard => ".*",
        }
    }
}

/// Ordered list of parameter names bound into one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binder {
    pub params: Vec<&'static str>,
    pub missing: MissingParam,
    pub range_aware: bool,
}

impl Binder {
    pub fn exact(params: &[&'static str]) -> Self {
        Self {
            params: params.to_vec(),
            missing: MissingParam::Empty,
            range_aware: true,
        }
    }

    pub fn pattern(params: &[&'static str]) -> Self {
        Self {
            params: params.to_vec(),
            missing: MissingParam::Wildcard,
            range_aware: true,
        }
    }

    /// Never emit a range clause, even when start/end/step are supplied.
    pub fn instant_only(mut self) -> Self {
        self.range_aware = false;
        self
    }
}

/// Caller-supplied parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Add start/end/step as unix seconds.
    pub fn with_range(self, start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Self {
        self.with("start", start.timestamp().to_string())
            .with("end", end.timestamp().to_string())
            .with("step", format!("{}s", step.num_seconds().max(1)))
    }

    /// Range covering the trailing `window` up to now.
    pub fn last(self, window: Duration, step: Duration) -> Self {
        let end = Utc::now();
        self.with_range(end - window, end, step)
    }

    pub fn has_range(&self) -> bool {
        RANGE_PARAMS.iter().all(|k| self.0.contains_key(*k))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A concrete query plus its optional range clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub query: String,
    pub range_clause: String,
}

impl GeneratedQuery {
    pub fn is_range(&self) -> bool {
        !self.range_clause.is_empty()
    }

    pub fn endpoint_path(&self) -> &'static str {
        if self.is_range() {
            RANGE_QUERY_PATH
        } else {
            INSTANT_QUERY_PATH
        }
    }

    /// Full request URL against `base`, with the query string encoded.
    pub fn url(&self, base: &str) -> Result<String> {
        let endpoint = format!("{}{}", base.trim_end_matches('/'), self.endpoint_path());
        let mut url = Url::parse(&endpoint)
            .map_err(|e| MetricsError::Config(format!("invalid backend url {}: {}", base, e)))?;
        url.query_pairs_mut().append_pair("query", &self.query);
        Ok(format!("{}{}", url, self.range_clause))
    }
}

/// Bind `params` into `template`.
///
/// Without a binder the template is returned as-is and never ranged.
pub fn generate(template: &str, binder: Option<&Binder>, params: &QueryParams) -> GeneratedQuery {
    let Some(binder) = binder else {
        return GeneratedQuery {
            query: template.to_string(),
            range_clause: String::new(),
        };
    };

    let values: Vec<&str> = binder
        .params
        .iter()
        .map(|name| params.get(name).unwrap_or(binder.missing.default_value()))
        .collect();

    let range_clause = if binder.range_aware && params.has_range() {
        format!(
            "&start={}&end={}&step={}",
            params.get("start").unwrap_or_default(),
            params.get("end").unwrap_or_default(),
            params.get("step").unwrap_or_default()
        )
    } else {
        String::new()
    };

    GeneratedQuery {
        query: substitute(template, &values),
        range_clause,
    }
}

fn substitute(template: &str, values: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut values = values.iter();
    let mut pieces = template.split(PLACEHOLDER).peekable();
    while let Some(piece) = pieces.next() {
        out.push_str(piece);
        if pieces.peek().is_some() {
            out.push_str(values.next().copied().unwrap_or_default());
        }
    }
    out
}

pub fn placeholder_count(template: &str) -> usize {
    template.matches(PLACEHOLDER).count()
}
