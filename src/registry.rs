//! Declarative metric definitions and the immutable registry holding them.

use std::collections::{BTreeSet, HashMap};

use crate::error::{MetricsError, Result};
use crate::query::{placeholder_count, Binder};
use crate::units::{UnitTable, UnitType};

/// Label field a ranked series takes its id from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdLabel {
    Node,
    Instance,
    Namespace,
    Pod,
}

impl IdLabel {
    pub fn field(self) -> &'static str {
        match self {
            IdLabel::Node => "node",
            IdLabel::Instance => "instance",
            IdLabel::Namespace => "namespace",
            IdLabel::Pod => "pod",
        }
    }
}

/// How a metric's results are parsed and assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricShape {
    /// Aggregate values; templates fill usage, total and percentage in order.
    Scalar,
    /// Parallel series sharing one timeline, keyed by sub-label.
    RangeScalar,
    /// Top-N style vector with one entry per labelled series.
    RankedSeries { id_label: IdLabel },
    /// Relabels other, already computed metrics.
    Composite,
}

/// One query-able quantity.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub shape: MetricShape,
    pub sub_labels: Vec<&'static str>,
    pub query_templates: Vec<&'static str>,
    pub binders: Vec<Option<Binder>>,
    pub unit_types: Vec<Option<UnitType>>,
    pub primary_unit: &'static str,
    pub composite_of: Vec<&'static str>,
}

impl MetricDefinition {
    fn new(key: &'static str, label: &'static str, shape: MetricShape) -> Self {
        Self {
            key,
            label,
            shape,
            sub_labels: Vec::new(),
            query_templates: Vec::new(),
            binders: Vec::new(),
            unit_types: Vec::new(),
            primary_unit: "",
            composite_of: Vec::new(),
        }
    }

    pub fn scalar(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, MetricShape::Scalar)
    }

    pub fn range(key: &'static str, label: &'static str) -> Self {
        Self::new(key, label, MetricShape::RangeScalar)
    }

    pub fn ranked(key: &'static str, label: &'static str, id_label: IdLabel) -> Self {
        Self::new(key, label, MetricShape::RankedSeries { id_label })
    }

    pub fn composite(key: &'static str, label: &'static str, of: &[&'static str]) -> Self {
        let mut def = Self::new(key, label, MetricShape::Composite);
        def.composite_of = of.to_vec();
        def
    }

    /// Append one template with its binder and unit type.
    pub fn template(
        mut self,
        query: &'static str,
        binder: Option<Binder>,
        unit_type: Option<UnitType>,
    ) -> Self {
        self.query_templates.push(query);
        self.binders.push(binder);
        self.unit_types.push(unit_type);
        self
    }

    pub fn sub_labels(mut self, labels: &[&'static str]) -> Self {
        self.sub_labels = labels.to_vec();
        self
    }

    pub fn primary_unit(mut self, unit: &'static str) -> Self {
        self.primary_unit = unit;
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.shape, MetricShape::Composite)
    }

    /// Sub-label of template `index`, defaulting to the metric label.
    pub fn sub_label(&self, index: usize) -> &'static str {
        self.sub_labels.get(index).copied().unwrap_or(self.label)
    }

    /// Unit type of the first template that declares one.
    pub fn primary_unit_type(&self) -> Option<UnitType> {
        self.unit_types.iter().flatten().next().copied()
    }

    /// Whether template `index` feeds the shared max used for unit selection.
    pub fn is_primary(&self, index: usize) -> bool {
        match self.unit_types.get(index).copied().flatten() {
            Some(unit_type) => {
                self.primary_unit.is_empty() || unit_type.entry().contains(self.primary_unit)
            }
            None => false,
        }
    }

    /// Only a count, so composites surface the usage alone.
    pub fn is_count_only(&self) -> bool {
        matches!(self.primary_unit_type(), Some(UnitType::Count))
    }

    fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(MetricsError::Config(format!("metric {}: {}", self.key, msg)));

        let n = self.query_templates.len();
        if self.binders.len() != n || self.unit_types.len() != n {
            return err(format!(
                "{} templates, {} binders, {} unit types",
                n,
                self.binders.len(),
                self.unit_types.len()
            ));
        }

        for (template, binder) in self.query_templates.iter().zip(&self.binders) {
            let expected = binder.as_ref().map_or(0, |b| b.params.len());
            let found = placeholder_count(template);
            if found != expected {
                return err(format!(
                    "template {:?} has {} placeholders, binder supplies {}",
                    template, found, expected
                ));
            }
        }

        if self.is_composite() {
            if n != 0 {
                return err("composite metric must not carry query templates".into());
            }
            if self.composite_of.is_empty() {
                return err("composite metric has no constituents".into());
            }
        } else {
            if n == 0 {
                return err("no query templates".into());
            }
            if !self.composite_of.is_empty() {
                return err("only composite metrics may list constituents".into());
            }
            if n > 1 && self.sub_labels.len() != n {
                return err(format!("{} templates but {} sub-labels", n, self.sub_labels.len()));
            }
            if self.primary_unit_type().is_none() {
                return err("no template declares a unit type".into());
            }
        }
        Ok(())
    }
}

/// Read-only map from metric key to definition.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    definitions: HashMap<&'static str, MetricDefinition>,
    depth: HashMap<&'static str, usize>,
}

impl MetricRegistry {
    /// Validate and index `definitions`.
    pub fn new(definitions: Vec<MetricDefinition>) -> Result<Self> {
        UnitTable::validate()?;

        let mut map = HashMap::with_capacity(definitions.len());
        for def in definitions {
            def.validate()?;
            let key = def.key;
            if map.insert(key, def).is_some() {
                return Err(MetricsError::Config(format!("duplicate metric key {}", key)));
            }
        }

        for def in map.values() {
            for constituent in &def.composite_of {
                if !map.contains_key(constituent) {
                    return Err(MetricsError::Config(format!(
                        "metric {} references unknown constituent {}",
                        def.key, constituent
                    )));
                }
            }
        }

        let mut depth = HashMap::with_capacity(map.len());
        for key in map.keys() {
            compute_depth(*key, &map, &mut depth, &mut Vec::new())?;
        }

        Ok(Self {
            definitions: map,
            depth,
        })
    }

    pub fn lookup(&self, key: &str) -> Result<&MetricDefinition> {
        self.definitions
            .get(key)
            .ok_or_else(|| MetricsError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.definitions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Group `keys` and their transitive constituents into levels, so every
    /// constituent lands in an earlier level than the composite needing it.
    /// Unknown keys are skipped.
    pub fn evaluation_levels<'a, I>(&self, keys: I) -> Vec<Vec<&'static str>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut needed = BTreeSet::new();
        let mut stack: Vec<&'static str> = keys
            .into_iter()
            .filter_map(|k| self.definitions.get_key_value(k).map(|(k, _)| *k))
            .collect();
        while let Some(key) = stack.pop() {
            if needed.insert(key) {
                if let Some(def) = self.definitions.get(key) {
                    stack.extend(def.composite_of.iter().copied());
                }
            }
        }

        let mut levels: Vec<Vec<&'static str>> = Vec::new();
        for key in needed {
            let level = self.depth.get(key).copied().unwrap_or(0);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(key);
        }
        levels.retain(|level| !level.is_empty());
        levels
    }
}

fn compute_depth(
    key: &'static str,
    map: &HashMap<&'static str, MetricDefinition>,
    depth: &mut HashMap<&'static str, usize>,
    visiting: &mut Vec<&'static str>,
) -> Result<usize> {
    if let Some(d) = depth.get(key) {
        return Ok(*d);
    }
    if visiting.contains(&key) {
        return Err(MetricsError::Config(format!(
            "composite cycle: {} -> {}",
            visiting.join(" -> "),
            key
        )));
    }

    visiting.push(key);
    let mut d = 0;
    if let Some(def) = map.get(key) {
        for constituent in &def.composite_of {
            d = d.max(compute_depth(*constituent, map, depth, visiting)? + 1);
        }
    }
    visiting.pop();

    depth.insert(key, d);
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu() -> MetricDefinition {
        MetricDefinition::scalar("cpu", "CPU")
            .template("sum(cpu)", None, Some(UnitType::Cores))
            .primary_unit("cores")
    }

    fn memory() -> MetricDefinition {
        MetricDefinition::scalar("memory", "Memory")
            .template(
                r#"sum(mem{namespace=~"%s"})"#,
                Some(Binder::pattern(&["namespace"])),
                Some(UnitType::BinaryBytes),
            )
            .primary_unit("B")
    }

    #[test]
    fn test_lookup() {
        let registry = MetricRegistry::new(vec![cpu(), memory()]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("cpu").unwrap().label, "CPU");
        assert!(matches!(
            registry.lookup("disk"),
            Err(MetricsError::NotFound(k)) if k == "disk"
        ));
    }

    #[test]
    fn test_rejects_placeholder_mismatch() {
        let bad = MetricDefinition::scalar("bad", "Bad")
            .template(r#"up{pod="%s"}"#, None, Some(UnitType::Count));
        assert!(matches!(
            MetricRegistry::new(vec![bad]),
            Err(MetricsError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_parallel_length_mismatch() {
        let mut bad = cpu();
        bad.unit_types.push(Some(UnitType::Cores));
        assert!(MetricRegistry::new(vec![bad]).is_err());
    }

    #[test]
    fn test_rejects_missing_sub_labels() {
        let bad = MetricDefinition::range("net", "Network")
            .template("rx", None, Some(UnitType::BytesPerSecond))
            .template("tx", None, Some(UnitType::BytesPerSecond));
        assert!(MetricRegistry::new(vec![bad]).is_err());
    }

    #[test]
    fn test_rejects_unknown_constituent() {
        let overview = MetricDefinition::composite("overview", "Overview", &["cpu", "gpu"]);
        assert!(MetricRegistry::new(vec![cpu(), overview]).is_err());
    }

    #[test]
    fn test_rejects_cycle() {
        let a = MetricDefinition::composite("a", "A", &["b"]);
        let b = MetricDefinition::composite("b", "B", &["a"]);
        let err = MetricRegistry::new(vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_duplicate_key() {
        assert!(MetricRegistry::new(vec![cpu(), cpu()]).is_err());
    }

    #[test]
    fn test_evaluation_levels_put_constituents_first() {
        let inner = MetricDefinition::composite("inner", "Inner", &["cpu", "memory"]);
        let outer = MetricDefinition::composite("outer", "Outer", &["inner", "cpu"]);
        let registry = MetricRegistry::new(vec![cpu(), memory(), inner, outer]).unwrap();

        let levels = registry.evaluation_levels(["outer", "nope"]);
        assert_eq!(levels, vec![vec!["cpu", "memory"], vec!["inner"], vec!["outer"]]);

        let levels = registry.evaluation_levels(["memory"]);
        assert_eq!(levels, vec![vec!["memory"]]);
    }

    #[test]
    fn test_is_primary() {
        let def = MetricDefinition::scalar("mem", "Memory")
            .template("used", None, Some(UnitType::BinaryBytes))
            .template("total", None, Some(UnitType::BinaryBytes))
            .template("pct", None, Some(UnitType::Percentage))
            .sub_labels(&["used", "total", "pct"])
            .primary_unit("B");
        assert!(def.is_primary(0));
        assert!(def.is_primary(1));
        assert!(!def.is_primary(2));
        assert!(!def.is_primary(7));
    }

    #[test]
    fn test_sub_label_defaults_to_label() {
        assert_eq!(cpu().sub_label(0), "CPU");
    }
}
