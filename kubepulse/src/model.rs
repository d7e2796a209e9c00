//! Normalized snapshots of the cluster objects the aggregation works on.
//!
//! Everything here is converted once from the `k8s-openapi` types so the
//! aggregation and view code never touch raw API structures or quantity
//! strings.

use std::collections::BTreeMap;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Container, Namespace, Node, Pod},
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_metrics::{
    v1beta1::{NodeMetrics, PodMetrics, Usage},
    QuantityExt,
};
use kube::ResourceExt;

use crate::quantity::{cpu_milli, memory_bytes, parse_cpu_milli, parse_memory_bytes};

/// CPU in milli-cores and memory in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpu_milli: i64,
    pub mem_bytes: i64,
}

impl Resources {
    pub fn new(cpu_milli: i64, mem_bytes: i64) -> Self {
        Self {
            cpu_milli,
            mem_bytes,
        }
    }

    fn from_map(map: Option<&BTreeMap<String, Quantity>>) -> Self {
        let Some(map) = map else {
            return Self::default();
        };
        Self {
            cpu_milli: map.get("cpu").map(cpu_milli).unwrap_or(0),
            mem_bytes: map.get("memory").map(memory_bytes).unwrap_or(0),
        }
    }
}

impl std::ops::AddAssign for Resources {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu_milli = self.cpu_milli.saturating_add(rhs.cpu_milli);
        self.mem_bytes = self.mem_bytes.saturating_add(rhs.mem_bytes);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeSnapshot {
    pub name: String,
    /// `None` when the node reports no Ready condition at all.
    pub ready: Option<bool>,
    pub allocatable: Resources,
    pub capacity: Resources,
    /// Opaque cloud identity (`spec.providerID`), empty on bare metal.
    pub provider_id: String,
    pub labels: BTreeMap<String, String>,
    pub kubelet_version: String,
}

impl NodeSnapshot {
    pub fn is_ready(&self) -> bool {
        self.ready == Some(true)
    }
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        let status = node.status.as_ref();
        let conditions: BTreeMap<_, _> = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| conds.iter().map(|c| (c.type_.as_str(), c)).collect())
            .unwrap_or_default();

        let ready = conditions
            .get("Ready")
            .map(|c| c.status == "True");

        Self {
            name: node.name_any(),
            ready,
            allocatable: Resources::from_map(status.and_then(|s| s.allocatable.as_ref())),
            capacity: Resources::from_map(status.and_then(|s| s.capacity.as_ref())),
            provider_id: node
                .spec
                .as_ref()
                .and_then(|s| s.provider_id.clone())
                .unwrap_or_default(),
            labels: node.labels().clone(),
            kubelet_version: status
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kubelet_version.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerResources {
    pub requests: Resources,
    pub limits: Resources,
}

impl From<&Container> for ContainerResources {
    fn from(c: &Container) -> Self {
        let res = c.resources.as_ref();
        Self {
            requests: Resources::from_map(res.and_then(|r| r.requests.as_ref())),
            limits: Resources::from_map(res.and_then(|r| r.limits.as_ref())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodSnapshot {
    pub name: String,
    pub namespace: String,
    /// Empty while the pod is unscheduled.
    pub node_name: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerResources>,
}

impl PodSnapshot {
    pub fn requests(&self) -> Resources {
        let mut total = Resources::default();
        for c in &self.containers {
            total += c.requests;
        }
        total
    }

    pub fn limits(&self) -> Resources {
        let mut total = Resources::default();
        for c in &self.containers {
            total += c.limits;
        }
        total
    }

    /// Succeeded and Failed pods no longer hold node resources.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase.as_str(), "Succeeded" | "Failed")
    }

    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

impl From<&Pod> for PodSnapshot {
    fn from(pod: &Pod) -> Self {
        let spec = pod.spec.as_ref();
        Self {
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Unknown".into()),
            labels: pod.labels().clone(),
            containers: spec
                .map(|s| s.containers.iter().map(ContainerResources::from).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub phase: String,
}

impl From<&Namespace> for NamespaceSnapshot {
    fn from(ns: &Namespace) -> Self {
        Self {
            name: ns.name_any(),
            phase: ns
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Active".into()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentSnapshot {
    pub name: String,
    pub namespace: String,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub selector: BTreeMap<String, String>,
}

impl DeploymentSnapshot {
    /// A deployment selects a pod when every match label is present on it.
    /// An empty selector selects nothing.
    pub fn selects(&self, pod: &PodSnapshot) -> bool {
        !self.selector.is_empty()
            && pod.namespace == self.namespace
            && self
                .selector
                .iter()
                .all(|(k, v)| pod.labels.get(k) == Some(v))
    }
}

impl From<&Deployment> for DeploymentSnapshot {
    fn from(d: &Deployment) -> Self {
        let spec = d.spec.as_ref();
        Self {
            name: d.name_any(),
            namespace: d.namespace().unwrap_or_default(),
            desired_replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
            ready_replicas: d
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            selector: spec
                .and_then(|s| s.selector.match_labels.clone())
                .unwrap_or_default(),
        }
    }
}

/// A point-in-time usage reading from the metrics API.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageSample {
    pub name: String,
    /// `None` for node samples.
    pub namespace: Option<String>,
    pub usage: Resources,
}

/// Metrics API usage through `QuantityExt`. Forms it rejects, such as
/// decimal suffixes or fractional binary units, go through the full parser.
impl From<&Usage> for Resources {
    fn from(u: &Usage) -> Self {
        let cpu_milli = match u.cpu.to_f64() {
            Ok(cores) => (cores * 1000.0).round() as i64,
            Err(_) => parse_cpu_milli(&u.cpu.0).unwrap_or(0),
        };
        let mem_bytes = u
            .memory
            .to_memory()
            .ok()
            .or_else(|| parse_memory_bytes(&u.memory.0))
            .unwrap_or(0);
        Self {
            cpu_milli,
            mem_bytes,
        }
    }
}

impl From<&NodeMetrics> for UsageSample {
    fn from(m: &NodeMetrics) -> Self {
        Self {
            name: m.metadata.name.clone().unwrap_or_default(),
            namespace: None,
            usage: Resources::from(&m.usage),
        }
    }
}

impl From<&PodMetrics> for UsageSample {
    fn from(m: &PodMetrics) -> Self {
        let mut usage = Resources::default();
        for c in &m.containers {
            usage += Resources::from(&c.usage);
        }
        Self {
            name: m.metadata.name.clone().unwrap_or_default(),
            namespace: m.metadata.namespace.clone(),
            usage,
        }
    }
}

/// Normalized per-entity metrics: CPU in cores, memory in bytes.
///
/// `None` usage means no sample was available, which is not the same as a
/// measured zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceMetrics {
    pub cpu_request: f64,
    pub cpu_limit: f64,
    pub cpu_usage: Option<f64>,
    pub cpu_capacity: f64,
    pub mem_request: f64,
    pub mem_limit: f64,
    pub mem_usage: Option<f64>,
    pub mem_capacity: f64,
}

impl ResourceMetrics {
    pub fn from_parts(
        requests: Resources,
        limits: Resources,
        usage: Option<Resources>,
        capacity: Resources,
    ) -> Self {
        Self {
            cpu_request: requests.cpu_milli as f64 / 1000.0,
            cpu_limit: limits.cpu_milli as f64 / 1000.0,
            cpu_usage: usage.map(|u| u.cpu_milli as f64 / 1000.0),
            cpu_capacity: capacity.cpu_milli as f64 / 1000.0,
            mem_request: requests.mem_bytes as f64,
            mem_limit: limits.mem_bytes as f64,
            mem_usage: usage.map(|u| u.mem_bytes as f64),
            mem_capacity: capacity.mem_bytes as f64,
        }
    }

    /// CPU usage as a percentage of capacity; unknown usage reads as 0%.
    pub fn cpu_usage_pct(&self) -> f64 {
        crate::quantity::percent(self.cpu_usage.unwrap_or(0.0), self.cpu_capacity)
    }

    pub fn mem_usage_pct(&self) -> f64 {
        crate::quantity::percent(self.mem_usage.unwrap_or(0.0), self.mem_capacity)
    }

    pub fn cpu_request_pct(&self) -> f64 {
        crate::quantity::percent(self.cpu_request, self.cpu_capacity)
    }

    pub fn mem_request_pct(&self) -> f64 {
        crate::quantity::percent(self.mem_request, self.mem_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        NodeCondition, NodeSpec, NodeStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use kube::api::ObjectMeta;

    fn quantities(cpu: &str, mem: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.into())),
            ("memory".to_string(), Quantity(mem.into())),
        ])
    }

    #[test]
    fn node_conversion_reads_ready_condition_and_resources() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".into()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some("aws:///us-east-1a/i-0abc".into()),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                allocatable: Some(quantities("3900m", "7Gi")),
                capacity: Some(quantities("4", "8Gi")),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".into(),
                    status: "True".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };

        let snap = NodeSnapshot::from(&node);
        assert_eq!(snap.name, "worker-1");
        assert!(snap.is_ready());
        assert_eq!(snap.allocatable, Resources::new(3900, 7 * 1024 * 1024 * 1024));
        assert_eq!(snap.capacity.cpu_milli, 4000);
        assert_eq!(snap.provider_id, "aws:///us-east-1a/i-0abc");
    }

    #[test]
    fn node_without_ready_condition_is_not_ready() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("n".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let snap = NodeSnapshot::from(&node);
        assert_eq!(snap.ready, None);
        assert!(!snap.is_ready());
        assert_eq!(snap.allocatable, Resources::default());
    }

    #[test]
    fn pod_conversion_treats_missing_resources_as_zero() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("api".into()),
                namespace: Some("shop".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-1".into()),
                containers: vec![
                    Container {
                        name: "app".into(),
                        resources: Some(ResourceRequirements {
                            requests: Some(BTreeMap::from([(
                                "cpu".to_string(),
                                Quantity("500m".into()),
                            )])),
                            limits: Some(quantities("1", "1Gi")),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                ..Default::default()
            }),
        };

        let snap = PodSnapshot::from(&pod);
        assert_eq!(snap.node_name, "worker-1");
        assert_eq!(snap.requests(), Resources::new(500, 0));
        assert_eq!(snap.limits(), Resources::new(1000, 1024 * 1024 * 1024));
        assert!(snap.is_running());
    }

    #[test]
    fn deployment_selector_matching() {
        let deploy = DeploymentSnapshot {
            name: "web".into(),
            namespace: "shop".into(),
            desired_replicas: 2,
            ready_replicas: 2,
            selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
        };
        let mut pod = PodSnapshot {
            name: "web-1".into(),
            namespace: "shop".into(),
            labels: BTreeMap::from([
                ("app".to_string(), "web".to_string()),
                ("tier".to_string(), "front".to_string()),
            ]),
            ..Default::default()
        };
        assert!(deploy.selects(&pod));

        pod.namespace = "other".into();
        assert!(!deploy.selects(&pod));

        let empty = DeploymentSnapshot {
            selector: BTreeMap::new(),
            ..deploy
        };
        assert!(!empty.selects(&pod));
    }

    #[test]
    fn pod_usage_sums_containers_in_every_quantity_form() {
        use k8s_metrics::v1beta1::Container as MetricsContainer;

        let usage = |cpu: &str, mem: &str| Usage {
            cpu: Quantity(cpu.into()),
            memory: Quantity(mem.into()),
        };
        let metrics = PodMetrics {
            metadata: ObjectMeta {
                name: Some("api".into()),
                namespace: Some("shop".into()),
                ..Default::default()
            },
            containers: vec![
                MetricsContainer {
                    name: "app".into(),
                    usage: usage("250000000n", "128Mi"),
                },
                MetricsContainer {
                    name: "sidecar".into(),
                    usage: usage("0.5", "1.5Gi"),
                },
            ],
            ..Default::default()
        };

        let sample = UsageSample::from(&metrics);
        assert_eq!(sample.namespace.as_deref(), Some("shop"));
        assert_eq!(sample.usage.cpu_milli, 750);
        assert_eq!(sample.usage.mem_bytes, 128 * 1024 * 1024 + 3 * 512 * 1024 * 1024);
    }

    #[test]
    fn resource_sums_saturate() {
        let mut total = Resources::new(i64::MAX - 1, i64::MAX);
        total += Resources::new(10, 1);
        assert_eq!(total, Resources::new(i64::MAX, i64::MAX));
    }

    #[test]
    fn metrics_percentages_handle_zero_capacity_and_unknown_usage() {
        let m = ResourceMetrics::from_parts(
            Resources::new(500, 0),
            Resources::default(),
            None,
            Resources::default(),
        );
        assert_eq!(m.cpu_usage, None);
        assert_eq!(m.cpu_usage_pct(), 0.0);
        assert_eq!(m.cpu_request_pct(), 0.0);
    }
}
