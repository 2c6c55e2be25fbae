//! Built-in metric definitions for cluster, node, namespace and pod views.

use crate::error::Result;
use crate::query::Binder;
use crate::registry::{IdLabel, MetricDefinition, MetricRegistry};
use crate::units::UnitType;

/// Standard metric keys
pub struct MetricKeys;

impl MetricKeys {
    // Cluster metrics
    pub const CLUSTER_CPU: &'static str = "cluster_cpu";
    pub const CLUSTER_MEMORY: &'static str = "cluster_memory";
    pub const CLUSTER_DISK: &'static str = "cluster_disk";
    pub const CLUSTER_POD_COUNT: &'static str = "cluster_pod_count";
    pub const CLUSTER_NODE_COUNT: &'static str = "cluster_node_count";
    pub const CLUSTER_NAMESPACE_COUNT: &'static str = "cluster_namespace_count";
    pub const CLUSTER_OVERVIEW: &'static str = "cluster_overview";

    // Node metrics
    pub const NODE_CPU: &'static str = "node_cpu";
    pub const NODE_MEMORY: &'static str = "node_memory";
    pub const NODE_DISK_IO: &'static str = "node_disk_io";
    pub const NODE_NETWORK_PACKETS: &'static str = "node_network_packets";

    // Namespace metrics
    pub const NAMESPACE_CPU: &'static str = "namespace_cpu";
    pub const NAMESPACE_MEMORY: &'static str = "namespace_memory";
    pub const NAMESPACE_NETWORK: &'static str = "namespace_network";
    pub const NAMESPACE_POD_COUNT: &'static str = "namespace_pod_count";
    pub const WORKLOAD_OVERVIEW: &'static str = "workload_overview";

    // Pod metrics
    pub const POD_CPU: &'static str = "pod_cpu";
    pub const POD_MEMORY: &'static str = "pod_memory";
    pub const POD_NETWORK: &'static str = "pod_network";

    // Rankings
    pub const TOP_NODE_CPU: &'static str = "top_node_cpu";
    pub const TOP_NAMESPACE_MEMORY: &'static str = "top_namespace_memory";
    pub const TOP_POD_CPU: &'static str = "top_pod_cpu";
    pub const PODS_PER_NODE: &'static str = "pods_per_node";

    // Control plane
    pub const APISERVER_LATENCY: &'static str = "apiserver_latency";
}

const CORES: Option<UnitType> = Some(UnitType::Cores);
const BINARY_BYTES: Option<UnitType> = Some(UnitType::BinaryBytes);
const PERCENT: Option<UnitType> = Some(UnitType::Percentage);
const COUNT: Option<UnitType> = Some(UnitType::Count);
const BYTES_PER_SEC: Option<UnitType> = Some(UnitType::BytesPerSecond);

/// All built-in definitions.
pub fn builtin_definitions() -> Vec<MetricDefinition> {
    let mut defs = cluster();
    defs.extend(node());
    defs.extend(namespace());
    defs.extend(pod());
    defs.extend(rankings());
    defs
}

/// Validated registry over [`builtin_definitions`].
pub fn builtin_registry() -> Result<MetricRegistry> {
    MetricRegistry::new(builtin_definitions())
}

fn cluster() -> Vec<MetricDefinition> {
    let all = || Some(Binder::exact(&[]));
    vec![
        MetricDefinition::scalar(MetricKeys::CLUSTER_CPU, "CPU")
            .template(
                r#"sum(rate(container_cpu_usage_seconds_total{container!=""}[5m]))"#,
                all(),
                CORES,
            )
            .template(r#"sum(kube_node_status_allocatable{resource="cpu"})"#, all(), CORES)
            .template(
                r#"100 * sum(rate(container_cpu_usage_seconds_total{container!=""}[5m])) / sum(kube_node_status_allocatable{resource="cpu"})"#,
                all(),
                PERCENT,
            )
            .sub_labels(&["usage", "total", "percentage"])
            .primary_unit("cores"),
        MetricDefinition::scalar(MetricKeys::CLUSTER_MEMORY, "Memory")
            .template(r#"sum(container_memory_working_set_bytes{container!=""})"#, all(), BINARY_BYTES)
            .template(r#"sum(kube_node_status_allocatable{resource="memory"})"#, all(), BINARY_BYTES)
            .template(
                r#"100 * sum(container_memory_working_set_bytes{container!=""}) / sum(kube_node_status_allocatable{resource="memory"})"#,
                all(),
                PERCENT,
            )
            .sub_labels(&["usage", "total", "percentage"])
            .primary_unit("B"),
        MetricDefinition::scalar(MetricKeys::CLUSTER_DISK, "Disk")
            .template(
                r#"sum(node_filesystem_size_bytes{mountpoint="/"} - node_filesystem_avail_bytes{mountpoint="/"})"#,
                all(),
                BINARY_BYTES,
            )
            .template(r#"sum(node_filesystem_size_bytes{mountpoint="/"})"#, all(), BINARY_BYTES)
            .template(
                r#"100 * (1 - sum(node_filesystem_avail_bytes{mountpoint="/"}) / sum(node_filesystem_size_bytes{mountpoint="/"}))"#,
                all(),
                PERCENT,
            )
            .sub_labels(&["usage", "total", "percentage"])
            .primary_unit("B"),
        MetricDefinition::scalar(MetricKeys::CLUSTER_POD_COUNT, "Pods")
            .template(r#"count(kube_pod_status_phase{phase="Running"} == 1)"#, all(), COUNT),
        MetricDefinition::scalar(MetricKeys::CLUSTER_NODE_COUNT, "Nodes")
            .template("count(kube_node_info)", all(), COUNT),
        MetricDefinition::scalar(MetricKeys::CLUSTER_NAMESPACE_COUNT, "Namespaces")
            .template("count(kube_namespace_created)", None, COUNT),
        MetricDefinition::composite(
            MetricKeys::CLUSTER_OVERVIEW,
            "Cluster overview",
            &[
                MetricKeys::CLUSTER_CPU,
                MetricKeys::CLUSTER_MEMORY,
                MetricKeys::CLUSTER_DISK,
                MetricKeys::CLUSTER_POD_COUNT,
                MetricKeys::CLUSTER_NODE_COUNT,
                MetricKeys::CLUSTER_NAMESPACE_COUNT,
            ],
        ),
    ]
}

fn node() -> Vec<MetricDefinition> {
    let instance = || Some(Binder::pattern(&["instance"]));
    vec![
        MetricDefinition::scalar(MetricKeys::NODE_CPU, "Node CPU")
            .template(
                r#"100 * (1 - avg(rate(node_cpu_seconds_total{mode="idle",instance=~"%s"}[5m])))"#,
                instance(),
                PERCENT,
            )
            .primary_unit("%"),
        MetricDefinition::scalar(MetricKeys::NODE_MEMORY, "Node memory")
            .template(
                r#"sum(node_memory_MemTotal_bytes{instance=~"%s"} - node_memory_MemAvailable_bytes{instance=~"%s"})"#,
                Some(Binder::pattern(&["instance", "instance"])),
                BINARY_BYTES,
            )
            .template(r#"sum(node_memory_MemTotal_bytes{instance=~"%s"})"#, instance(), BINARY_BYTES)
            .template(
                r#"100 * (1 - sum(node_memory_MemAvailable_bytes{instance=~"%s"}) / sum(node_memory_MemTotal_bytes{instance=~"%s"}))"#,
                Some(Binder::pattern(&["instance", "instance"])),
                PERCENT,
            )
            .sub_labels(&["usage", "total", "percentage"])
            .primary_unit("B"),
        MetricDefinition::range(MetricKeys::NODE_DISK_IO, "Disk I/O")
            .template(
                r#"sum(rate(node_disk_read_bytes_total{instance=~"%s"}[5m]))"#,
                instance(),
                BYTES_PER_SEC,
            )
            .template(
                r#"sum(rate(node_disk_written_bytes_total{instance=~"%s"}[5m]))"#,
                instance(),
                BYTES_PER_SEC,
            )
            .sub_labels(&["read", "write"])
            .primary_unit("B/s"),
        MetricDefinition::range(MetricKeys::NODE_NETWORK_PACKETS, "Packets")
            .template(
                r#"sum(rate(node_network_receive_packets_total{instance=~"%s",device!="lo"}[5m]))"#,
                instance(),
                Some(UnitType::PacketsPerSecond),
            )
            .template(
                r#"sum(rate(node_network_transmit_packets_total{instance=~"%s",device!="lo"}[5m]))"#,
                instance(),
                Some(UnitType::PacketsPerSecond),
            )
            .sub_labels(&["in", "out"])
            .primary_unit("p/s"),
    ]
}

fn namespace() -> Vec<MetricDefinition> {
    let ns = || Some(Binder::pattern(&["namespace"]));
    vec![
        MetricDefinition::scalar(MetricKeys::NAMESPACE_CPU, "CPU")
            .template(
                r#"sum(rate(container_cpu_usage_seconds_total{namespace=~"%s",container!=""}[5m]))"#,
                ns(),
                CORES,
            )
            .primary_unit("cores"),
        MetricDefinition::scalar(MetricKeys::NAMESPACE_MEMORY, "Memory")
            .template(
                r#"sum(container_memory_working_set_bytes{namespace=~"%s",container!=""})"#,
                ns(),
                BINARY_BYTES,
            )
            .primary_unit("B"),
        MetricDefinition::range(MetricKeys::NAMESPACE_NETWORK, "Network")
            .template(
                r#"sum(rate(container_network_receive_bytes_total{namespace=~"%s"}[5m]))"#,
                ns(),
                BYTES_PER_SEC,
            )
            .template(
                r#"sum(rate(container_network_transmit_bytes_total{namespace=~"%s"}[5m]))"#,
                ns(),
                BYTES_PER_SEC,
            )
            .sub_labels(&["in", "out"])
            .primary_unit("B/s"),
        MetricDefinition::scalar(MetricKeys::NAMESPACE_POD_COUNT, "Pods")
            .template(
                r#"count(kube_pod_status_phase{namespace=~"%s",phase="Running"} == 1)"#,
                ns(),
                COUNT,
            ),
        MetricDefinition::composite(
            MetricKeys::WORKLOAD_OVERVIEW,
            "Workload overview",
            &[
                MetricKeys::NAMESPACE_CPU,
                MetricKeys::NAMESPACE_MEMORY,
                MetricKeys::NAMESPACE_POD_COUNT,
            ],
        ),
    ]
}

fn pod() -> Vec<MetricDefinition> {
    let pod = || Some(Binder::exact(&["namespace", "pod"]));
    vec![
        MetricDefinition::scalar(MetricKeys::POD_CPU, "CPU")
            .template(
                r#"sum(rate(container_cpu_usage_seconds_total{namespace="%s",pod="%s",container!=""}[5m]))"#,
                pod(),
                CORES,
            )
            .primary_unit("cores"),
        MetricDefinition::scalar(MetricKeys::POD_MEMORY, "Memory")
            .template(
                r#"sum(container_memory_working_set_bytes{namespace="%s",pod="%s",container!=""})"#,
                pod(),
                BINARY_BYTES,
            )
            .primary_unit("B"),
        MetricDefinition::range(MetricKeys::POD_NETWORK, "Network")
            .template(
                r#"sum(rate(container_network_receive_bytes_total{namespace="%s",pod="%s"}[5m]))"#,
                pod(),
                BYTES_PER_SEC,
            )
            .template(
                r#"sum(rate(container_network_transmit_bytes_total{namespace="%s",pod="%s"}[5m]))"#,
                pod(),
                BYTES_PER_SEC,
            )
            .sub_labels(&["in", "out"])
            .primary_unit("B/s"),
    ]
}

fn rankings() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::ranked(MetricKeys::TOP_NODE_CPU, "Top nodes by CPU", IdLabel::Instance)
            .template(
                r#"topk(5, 100 * (1 - avg by (instance) (rate(node_cpu_seconds_total{mode="idle"}[5m]))))"#,
                None,
                PERCENT,
            )
            .primary_unit("%"),
        MetricDefinition::ranked(
            MetricKeys::TOP_NAMESPACE_MEMORY,
            "Top namespaces by memory",
            IdLabel::Namespace,
        )
        .template(
            r#"topk(10, sum by (namespace) (container_memory_working_set_bytes{container!=""}))"#,
            None,
            BINARY_BYTES,
        )
        .primary_unit("B"),
        MetricDefinition::ranked(MetricKeys::TOP_POD_CPU, "Top pods by CPU", IdLabel::Pod)
            .template(
                r#"topk(10, sum by (pod) (rate(container_cpu_usage_seconds_total{namespace=~"%s",container!=""}[5m])))"#,
                Some(Binder::pattern(&["namespace"]).instant_only()),
                CORES,
            )
            .primary_unit("cores"),
        MetricDefinition::ranked(MetricKeys::PODS_PER_NODE, "Pods per node", IdLabel::Node)
            .template(
                r#"sort_desc(sum by (node) (kube_pod_info{node=~"%s"}))"#,
                Some(Binder::pattern(&["node"]).instant_only()),
                COUNT,
            ),
        MetricDefinition::scalar(MetricKeys::APISERVER_LATENCY, "API server p99 latency")
            .template(
                r#"histogram_quantile(0.99, sum by (le) (rate(apiserver_request_duration_seconds_bucket{verb!="WATCH"}[5m])))"#,
                Some(Binder::exact(&[])),
                Some(UnitType::Seconds),
            )
            .primary_unit("s"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{generate, QueryParams};
    use crate::registry::MetricShape;

    #[test]
    fn test_builtin_registry_validates() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.len(), builtin_definitions().len());
    }

    #[test]
    fn test_keys_unique_and_registered() {
        let registry = builtin_registry().unwrap();
        let keys = [
            MetricKeys::CLUSTER_CPU,
            MetricKeys::CLUSTER_OVERVIEW,
            MetricKeys::NODE_MEMORY,
            MetricKeys::NAMESPACE_NETWORK,
            MetricKeys::POD_NETWORK,
            MetricKeys::TOP_POD_CPU,
            MetricKeys::PODS_PER_NODE,
            MetricKeys::APISERVER_LATENCY,
        ];
        for key in keys {
            assert!(registry.contains(key), "{} missing", key);
        }
        let unique: std::collections::HashSet<_> = registry.keys().collect();
        assert_eq!(unique.len(), registry.len());
    }

    #[test]
    fn test_overview_evaluates_after_constituents() {
        let registry = builtin_registry().unwrap();
        let levels = registry.evaluation_levels([MetricKeys::CLUSTER_OVERVIEW]);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].len(), 6);
        assert_eq!(levels[1], vec![MetricKeys::CLUSTER_OVERVIEW]);
    }

    #[test]
    fn test_rankings_never_range() {
        let registry = builtin_registry().unwrap();
        let params = QueryParams::new()
            .with("start", "1")
            .with("end", "2")
            .with("step", "1");
        for key in registry.keys() {
            let def = registry.lookup(key).unwrap();
            if let MetricShape::RankedSeries { .. } = def.shape {
                for (template, binder) in def.query_templates.iter().zip(&def.binders) {
                    assert!(!generate(template, binder.as_ref(), &params).is_range());
                }
            }
        }
    }

    #[test]
    fn test_pod_binder_uses_exact_match() {
        let registry = builtin_registry().unwrap();
        let def = registry.lookup(MetricKeys::POD_CPU).unwrap();
        let q = generate(
            def.query_templates[0],
            def.binders[0].as_ref(),
            &QueryParams::new().with("namespace", "default"),
        );
        assert!(q.query.contains(r#"namespace="default",pod="""#));
    }
}
