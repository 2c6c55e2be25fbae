//! Interpretation of Prometheus query responses.
//!
//! The backend answers in three shapes depending on the metric and on
//! whether a range was requested: an instant vector reduced to one scalar,
//! a matrix whose first series becomes a timeline, or a ranked vector with
//! one entry per labelled series. The largest value seen is tracked in the
//! same pass for unit selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{MetricsError, Result};
use crate::registry::{IdLabel, MetricDefinition, MetricShape};

/// Treatment of malformed responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Coerce bad numbers to 0 and bad bodies to empty results.
    #[default]
    Lenient,
    /// Surface malformed bodies and samples as `MetricsError::Parse`.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub id: String,
    pub timestamp: f64,
    pub value: f64,
    pub order: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimePoint {
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResult {
    Scalar(f64),
    RankedSeries(Vec<RankedEntry>),
    TimePoints(Vec<TimePoint>),
}

/// Which of the three response shapes a query produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Instant,
    Range,
    Ranked(IdLabel),
}

impl ResultKind {
    pub fn of(shape: MetricShape, is_range: bool) -> Self {
        match shape {
            MetricShape::RankedSeries { id_label } => ResultKind::Ranked(id_label),
            _ if is_range => ResultKind::Range,
            _ => ResultKind::Instant,
        }
    }
}

impl ParsedResult {
    pub fn empty(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Instant => ParsedResult::Scalar(0.0),
            ResultKind::Range => ParsedResult::TimePoints(Vec::new()),
            ResultKind::Ranked(_) => ParsedResult::RankedSeries(Vec::new()),
        }
    }

    pub fn scalar(&self) -> f64 {
        match self {
            ParsedResult::Scalar(v) => *v,
            _ => 0.0,
        }
    }

    pub fn time_points(&self) -> &[TimePoint] {
        match self {
            ParsedResult::TimePoints(points) => points,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParsedResult::Scalar(_) => 1,
            ParsedResult::RankedSeries(entries) => entries.len(),
            ParsedResult::TimePoints(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parsed result plus the largest value observed while parsing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub result: ParsedResult,
    pub max_value: f64,
}

impl ParsedOutput {
    pub fn empty(kind: ResultKind) -> Self {
        Self {
            result: ParsedResult::empty(kind),
            max_value: 0.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryEnvelope {
    status: String,
    error: Option<String>,
    data: QueryData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryData {
    result: Vec<SeriesEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeriesEntry {
    metric: HashMap<String, Value>,
    value: Vec<Value>,
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultParser {
    mode: ParseMode,
}

impl ResultParser {
    pub fn new(mode: ParseMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Parse one template's response for `def`.
    ///
    /// Only primary-unit templates raise `max_value` for scalar shapes.
    pub fn parse(
        &self,
        def: &MetricDefinition,
        is_primary: bool,
        body: &[u8],
        is_range: bool,
    ) -> Result<ParsedOutput> {
        let kind = ResultKind::of(def.shape, is_range);
        let Some(entries) = self.decode(def.key, body)? else {
            return Ok(ParsedOutput::empty(kind));
        };
        if entries.is_empty() {
            return Ok(ParsedOutput::empty(kind));
        }

        match kind {
            ResultKind::Instant => self.parse_instant(def.key, is_primary, &entries),
            ResultKind::Range => self.parse_range(def.key, is_primary, &entries),
            ResultKind::Ranked(id_label) => self.parse_ranked(def.key, id_label, &entries),
        }
    }

    fn decode(&self, key: &str, body: &[u8]) -> Result<Option<Vec<SeriesEntry>>> {
        let envelope: QueryEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                return self.degrade(key, format!("malformed response body: {}", e));
            }
        };
        if envelope.status == "error" {
            let reason = envelope.error.unwrap_or_else(|| "unknown".to_string());
            return self.degrade(key, format!("backend error: {}", reason));
        }
        Ok(Some(envelope.data.result))
    }

    fn degrade<T>(&self, key: &str, reason: String) -> Result<Option<T>> {
        match self.mode {
            ParseMode::Strict => Err(MetricsError::Parse(format!("{}: {}", key, reason))),
            ParseMode::Lenient => {
                debug!(metric = key, "{}; using empty result", reason);
                Ok(None)
            }
        }
    }

    fn parse_instant(
        &self,
        key: &str,
        is_primary: bool,
        entries: &[SeriesEntry],
    ) -> Result<ParsedOutput> {
        let mut value = 0.0;
        let mut max_value = 0.0_f64;
        for entry in entries {
            value = self.number(key, entry.value.get(1))?;
            if is_primary {
                max_value = max_value.max(value);
            }
        }
        Ok(ParsedOutput {
            result: ParsedResult::Scalar(value),
            max_value,
        })
    }

    fn parse_range(
        &self,
        key: &str,
        is_primary: bool,
        entries: &[SeriesEntry],
    ) -> Result<ParsedOutput> {
        let mut max_value = 0.0_f64;
        let mut points = Vec::with_capacity(entries[0].values.len());
        for pair in &entries[0].values {
            let point = TimePoint {
                timestamp: self.number(key, pair.first())?,
                value: self.number(key, pair.get(1))?,
            };
            if is_primary {
                max_value = max_value.max(point.value);
            }
            points.push(point);
        }
        Ok(ParsedOutput {
            result: ParsedResult::TimePoints(points),
            max_value,
        })
    }

    fn parse_ranked(
        &self,
        key: &str,
        id_label: IdLabel,
        entries: &[SeriesEntry],
    ) -> Result<ParsedOutput> {
        let mut max_value = 0.0_f64;
        let mut ranked = Vec::with_capacity(entries.len());
        for (order, entry) in entries.iter().enumerate() {
            let id = match entry.metric.get(id_label.field()) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    debug!(metric = key, label = id_label.field(), "series without id label");
                    String::new()
                }
            };
            let value = self.number(key, entry.value.get(1))?;
            max_value = max_value.max(value);
            ranked.push(RankedEntry {
                id,
                timestamp: self.number(key, entry.value.first())?,
                value,
                order,
            });
        }
        Ok(ParsedOutput {
            result: ParsedResult::RankedSeries(ranked),
            max_value,
        })
    }

    // Prometheus encodes sample values as strings and timestamps as numbers;
    // accept either for both. NaN and infinities become 0 in every mode.
    fn number(&self, key: &str, raw: Option<&Value>) -> Result<f64> {
        let parsed = match raw {
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(v),
            Some(_) => Ok(0.0),
            None => match self.mode {
                ParseMode::Strict => Err(MetricsError::Parse(format!(
                    "{}: non-numeric sample {:?}",
                    key, raw
                ))),
                ParseMode::Lenient => {
                    debug!(metric = key, "coercing sample {:?} to 0", raw);
                    Ok(0.0)
                }
            },
        }
    }
}
