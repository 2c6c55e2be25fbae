//! Assembly of parsed template results into the caller-facing record.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::parser::{ParsedResult, ResultKind};
use crate::registry::{MetricDefinition, MetricRegistry, MetricShape};
use crate::units::{humanize, round_to, HumanizedValue, UnitType};

/// Externally visible record for one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssembledResponse {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResponseAssembler {
    precision: u32,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self { precision: 2 }
    }
}

impl ResponseAssembler {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }

    /// Combine one parsed result per template of `def`.
    ///
    /// Composite metrics issue no queries; see [`Self::assemble_composite`].
    pub fn assemble(
        &self,
        def: &MetricDefinition,
        max_value_unit: &str,
        is_range: bool,
        results: &[ParsedResult],
    ) -> AssembledResponse {
        let mut response = AssembledResponse {
            label: Some(def.label.to_string()),
            unit: Some(max_value_unit.to_string()),
            ..Default::default()
        };

        match ResultKind::of(def.shape, is_range) {
            ResultKind::Ranked(_) => {
                response.values = Some(self.ranked(def, max_value_unit, results));
            }
            ResultKind::Range => {
                response.values = Some(self.timeline(def, max_value_unit, results));
            }
            ResultKind::Instant if def.shape == MetricShape::RangeScalar => {
                let mut values = Map::new();
                for (index, result) in results.iter().enumerate() {
                    let h = self.humanize(def, index, result.scalar(), max_value_unit);
                    values.insert(
                        def.sub_label(index).to_string(),
                        Value::String(h.formatted_value()),
                    );
                }
                response.values = Some(Value::Object(values));
            }
            ResultKind::Instant => self.fill_slots(def, max_value_unit, results, &mut response),
        }
        response
    }

    // usage, total, percentage in template order; percentages are never converted.
    fn fill_slots(
        &self,
        def: &MetricDefinition,
        max_value_unit: &str,
        results: &[ParsedResult],
        response: &mut AssembledResponse,
    ) {
        for (index, result) in results.iter().enumerate().take(3) {
            let value = result.scalar();
            if index == 2 {
                response.percentage = Some(format!("{}", round_to(value, self.precision)));
                continue;
            }
            let h = self.humanize(def, index, value, max_value_unit);
            if index == 0 && !h.unit.is_empty() {
                response.unit = Some(h.unit.clone());
            }
            let formatted = Some(h.formatted_value());
            if index == 0 {
                response.usage = formatted;
            } else {
                response.total = formatted;
            }
        }
    }

    // One row per reference timestamp, one column per template sub-label.
    fn timeline(&self, def: &MetricDefinition, unit: &str, results: &[ParsedResult]) -> Value {
        let reference = results
            .iter()
            .fold(None::<&ParsedResult>, |best, r| match best {
                Some(b) if b.time_points().len() >= r.time_points().len() => Some(b),
                _ => Some(r),
            });
        let Some(reference) = reference else {
            return Value::Array(Vec::new());
        };

        let rows = reference
            .time_points()
            .iter()
            .enumerate()
            .map(|(i, point)| {
                let mut row = Map::new();
                row.insert("timestamp".to_string(), json!(point.timestamp));
                for (index, result) in results.iter().enumerate() {
                    let value = result.time_points().get(i).map_or(0.0, |p| p.value);
                    let h = self.humanize(def, index, value, unit);
                    row.insert(
                        def.sub_label(index).to_string(),
                        Value::String(h.formatted_value()),
                    );
                }
                Value::Object(row)
            })
            .collect();
        Value::Array(rows)
    }

    fn ranked(&self, def: &MetricDefinition, unit: &str, results: &[ParsedResult]) -> Value {
        let entries = results
            .iter()
            .enumerate()
            .filter_map(|(index, result)| match result {
                ParsedResult::RankedSeries(entries) => Some((index, entries)),
                _ => None,
            })
            .flat_map(|(index, entries)| {
                entries.iter().map(move |entry| {
                    let h = self.humanize(def, index, entry.value, unit);
                    json!({
                        "id": entry.id,
                        "timestamp": entry.timestamp,
                        "value": h.formatted_value(),
                        "unit": h.unit,
                        "order": entry.order,
                    })
                })
            })
            .collect();
        Value::Array(entries)
    }

    fn humanize(
        &self,
        def: &MetricDefinition,
        index: usize,
        value: f64,
        preferred_unit: &str,
    ) -> HumanizedValue {
        match def.unit_types.get(index).copied().flatten() {
            Some(unit_type) => {
                let initial = initial_unit(def, unit_type);
                humanize(value, unit_type, initial, preferred_unit, self.precision)
            }
            None => HumanizedValue {
                value: round_to(value, self.precision),
                unit: String::new(),
            },
        }
    }

    /// Relabel already assembled constituents of a composite metric.
    ///
    /// Constituents missing from `computed` are skipped.
    pub fn assemble_composite(
        &self,
        def: &MetricDefinition,
        registry: &MetricRegistry,
        computed: &BTreeMap<String, AssembledResponse>,
    ) -> AssembledResponse {
        let mut values = Map::new();
        for key in &def.composite_of {
            let (Some(response), Ok(constituent)) = (computed.get(*key), registry.lookup(key))
            else {
                continue;
            };

            let label = response
                .label
                .clone()
                .unwrap_or_else(|| constituent.label.to_string());
            // Count metrics flatten to their usage, or their timeline over a range.
            let entry = if constituent.is_count_only() {
                match (&response.usage, &response.values) {
                    (Some(usage), _) => Value::String(usage.clone()),
                    (None, Some(timeline)) => timeline.clone(),
                    (None, None) => continue,
                }
            } else {
                let mut fields = Map::new();
                let pairs = [
                    ("usage", &response.usage),
                    ("percentage", &response.percentage),
                    ("unit", &response.unit),
                ];
                for (name, field) in pairs {
                    if let Some(v) = field {
                        fields.insert(name.to_string(), Value::String(v.clone()));
                    }
                }
                if let Some(nested) = &response.values {
                    fields.insert("values".to_string(), nested.clone());
                }
                Value::Object(fields)
            };
            values.insert(label, entry);
        }

        AssembledResponse {
            label: Some(def.label.to_string()),
            values: Some(Value::Object(values)),
            ..Default::default()
        }
    }
}

fn initial_unit(def: &MetricDefinition, unit_type: UnitType) -> &'static str {
    if unit_type.entry().contains(def.primary_unit) {
        def.primary_unit
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{RankedEntry, TimePoint};
    use crate::query::Binder;
    use crate::registry::IdLabel;
    use crate::units::find_max_unit;

    fn memory_triple() -> MetricDefinition {
        MetricDefinition::scalar("cluster_memory", "Memory")
            .template("used", None, Some(UnitType::BinaryBytes))
            .template("total", None, Some(UnitType::BinaryBytes))
            .template("pct", None, Some(UnitType::Percentage))
            .sub_labels(&["used", "total", "percentage"])
            .primary_unit("B")
    }

    fn network() -> MetricDefinition {
        MetricDefinition::range("pod_network", "Network")
            .template("rx", None, Some(UnitType::BytesPerSecond))
            .template("tx", None, Some(UnitType::BytesPerSecond))
            .sub_labels(&["in", "out"])
            .primary_unit("B/s")
    }

    fn points(values: &[(f64, f64)]) -> ParsedResult {
        ParsedResult::TimePoints(
            values
                .iter()
                .map(|(timestamp, value)| TimePoint {
                    timestamp: *timestamp,
                    value: *value,
                })
                .collect(),
        )
    }

    #[test]
    fn test_single_scalar() {
        let def = MetricDefinition::scalar("pods", "Pods")
            .template("count(pods)", None, Some(UnitType::Count));
        let response = ResponseAssembler::default().assemble(
            &def,
            "",
            false,
            &[ParsedResult::Scalar(42.0)],
        );
        assert_eq!(response.usage.as_deref(), Some("42"));
        assert_eq!(response.label.as_deref(), Some("Pods"));
        assert!(response.total.is_none());
    }

    #[test]
    fn test_triple_scalar() {
        let def = memory_triple();
        let results = [
            ParsedResult::Scalar(512.0 * 1024.0 * 1024.0),
            ParsedResult::Scalar(2.0 * 1024.0 * 1024.0 * 1024.0),
            ParsedResult::Scalar(25.004),
        ];
        let unit = find_max_unit(
            UnitType::BinaryBytes,
            &[512.0 * 1024.0 * 1024.0, 2.0 * 1024.0 * 1024.0 * 1024.0],
        );
        let response = ResponseAssembler::default().assemble(&def, &unit, false, &results);
        assert_eq!(response.usage.as_deref(), Some("0.5"));
        assert_eq!(response.total.as_deref(), Some("2"));
        assert_eq!(response.percentage.as_deref(), Some("25"));
        assert_eq!(response.unit.as_deref(), Some("GiB"));
    }

    #[test]
    fn test_range_single_template_uses_label() {
        let def = MetricDefinition::scalar("cpu", "CPU")
            .template("cpu", None, Some(UnitType::Cores))
            .primary_unit("cores");
        let response = ResponseAssembler::default().assemble(
            &def,
            "cores",
            true,
            &[points(&[(100.0, 0.5), (130.0, 1.25)])],
        );
        let rows = response.values.unwrap();
        assert_eq!(rows[0]["timestamp"], json!(100.0));
        assert_eq!(rows[1]["CPU"], json!("1.25"));
    }

    #[test]
    fn test_parallel_templates_merge_by_position() {
        let def = network();
        let results = [
            points(&[(100.0, 1000.0)]),
            points(&[(100.0, 2000.0), (130.0, 3000.0), (160.0, 500.0)]),
        ];
        let response = ResponseAssembler::default().assemble(&def, "kB/s", true, &results);
        let rows = response.values.unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["in"], json!("1"));
        assert_eq!(rows[0]["out"], json!("2"));
        assert_eq!(rows[2]["timestamp"], json!(160.0));
        assert_eq!(rows[2]["in"], json!("0"));
        assert_eq!(rows[2]["out"], json!("0.5"));
        assert_eq!(response.unit.as_deref(), Some("kB/s"));
    }

    #[test]
    fn test_parallel_templates_instant_map() {
        let def = network();
        let results = [ParsedResult::Scalar(1500.0), ParsedResult::Scalar(250.0)];
        let response = ResponseAssembler::default().assemble(&def, "kB/s", false, &results);
        let values = response.values.unwrap();
        assert_eq!(values["in"], json!("1.5"));
        assert_eq!(values["out"], json!("0.25"));
    }

    #[test]
    fn test_ranked_values_keep_order() {
        let def = MetricDefinition::ranked("top", "Top", IdLabel::Namespace)
            .template("topk", None, Some(UnitType::BinaryBytes))
            .primary_unit("B");
        let entries = vec![
            RankedEntry {
                id: "kube-system".into(),
                timestamp: 1.0,
                value: 3.0 * 1024.0 * 1024.0,
                order: 0,
            },
            RankedEntry {
                id: "default".into(),
                timestamp: 1.0,
                value: 512.0 * 1024.0,
                order: 1,
            },
        ];
        let response = ResponseAssembler::default().assemble(
            &def,
            "MiB",
            false,
            &[ParsedResult::RankedSeries(entries)],
        );
        let values = response.values.unwrap();
        assert_eq!(values[0]["id"], json!("kube-system"));
        assert_eq!(values[0]["value"], json!("3"));
        assert_eq!(values[0]["unit"], json!("MiB"));
        assert_eq!(values[1]["value"], json!("0.5"));
        assert_eq!(values[1]["order"], json!(1));
    }

    #[test]
    fn test_composite_includes_only_present_constituents() {
        let cpu = MetricDefinition::scalar("cpu", "CPU")
            .template("cpu", None, Some(UnitType::Cores))
            .primary_unit("cores");
        let pods = MetricDefinition::scalar("pods", "Pods")
            .template("pods", None, Some(UnitType::Count));
        let nodes = MetricDefinition::scalar("nodes", "Nodes")
            .template("nodes", None, Some(UnitType::Count));
        let overview =
            MetricDefinition::composite("overview", "Overview", &["cpu", "pods", "nodes"]);
        let registry = MetricRegistry::new(vec![cpu, pods, nodes, overview]).unwrap();

        let mut computed = BTreeMap::new();
        computed.insert(
            "cpu".to_string(),
            AssembledResponse {
                label: Some("CPU".into()),
                usage: Some("1.5".into()),
                percentage: Some("37.5".into()),
                unit: Some("cores".into()),
                ..Default::default()
            },
        );
        computed.insert(
            "pods".to_string(),
            AssembledResponse {
                label: Some("Pods".into()),
                usage: Some("12".into()),
                unit: Some("".into()),
                ..Default::default()
            },
        );

        let def = registry.lookup("overview").unwrap();
        let response = ResponseAssembler::default().assemble_composite(def, &registry, &computed);
        let values = response.values.unwrap();
        let map = values.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(values["CPU"]["usage"], json!("1.5"));
        assert_eq!(values["CPU"]["percentage"], json!("37.5"));
        assert_eq!(values["CPU"]["unit"], json!("cores"));
        assert_eq!(values["Pods"], json!("12"));
        assert!(map.get("Nodes").is_none());
    }

    #[test]
    fn test_composite_count_over_range_keeps_timeline() {
        let pods = MetricDefinition::scalar("pods", "Pods")
            .template("pods", Some(Binder::exact(&[])), Some(UnitType::Count));
        let nodes = MetricDefinition::scalar("nodes", "Nodes")
            .template("nodes", None, Some(UnitType::Count));
        let overview = MetricDefinition::composite("overview", "Overview", &["pods", "nodes"]);
        let registry = MetricRegistry::new(vec![pods, nodes, overview]).unwrap();
        let assembler = ResponseAssembler::default();

        let points = vec![
            TimePoint { timestamp: 1.0, value: 4.0 },
            TimePoint { timestamp: 2.0, value: 5.0 },
        ];
        let pods_response = assembler.assemble(
            registry.lookup("pods").unwrap(),
            "",
            true,
            &[ParsedResult::TimePoints(points)],
        );
        assert!(pods_response.usage.is_none());

        let mut computed = BTreeMap::new();
        computed.insert("pods".to_string(), pods_response);
        computed.insert(
            "nodes".to_string(),
            AssembledResponse {
                label: Some("Nodes".into()),
                ..Default::default()
            },
        );

        let def = registry.lookup("overview").unwrap();
        let values = assembler.assemble_composite(def, &registry, &computed).values.unwrap();
        assert_eq!(values["Pods"][0]["Pods"], json!("4"));
        assert_eq!(values["Pods"][1]["Pods"], json!("5"));
        // nothing to report for a count with neither usage nor timeline
        assert!(values.get("Nodes").is_none());
    }

    #[test]
    fn test_huge_precision_falls_back_to_raw_value() {
        let pods = MetricDefinition::scalar("pods", "Pods")
            .template("pods", None, Some(UnitType::Count));
        let response =
            ResponseAssembler::new(400).assemble(&pods, "", false, &[ParsedResult::Scalar(42.0)]);
        assert_eq!(response.usage.as_deref(), Some("42"));
    }

    #[test]
    fn test_composite_definition_without_queries() {
        let overview = MetricDefinition::composite("overview", "Overview", &["pods"]);
        let response = ResponseAssembler::default().assemble(&overview, "", false, &[]);
        assert_eq!(response.label.as_deref(), Some("Overview"));
        assert!(response.usage.is_none());
        assert!(response.values.is_none());
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let response = AssembledResponse {
            usage: Some("1".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"usage":"1"}"#);

        let failed = AssembledResponse::failed("metric not found: x");
        assert!(failed.is_error());
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"error": "metric not found: x"})
        );
    }
}
