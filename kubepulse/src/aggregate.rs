//! Pure aggregation from raw object snapshots to per-node rows and totals.
//!
//! Nothing in here performs I/O. The orchestrator calls [`aggregate_node`]
//! from its per-entity units and [`compute_totals`] after the join; the
//! sequential [`aggregate_nodes`] exists for callers that already hold all
//! inputs.

use std::collections::HashMap;
use std::fmt;

use crate::model::{NodeSnapshot, PodSnapshot, ResourceMetrics, Resources, UsageSample};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Ready,
    NotReady,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Ready => f.write_str("Ready"),
            NodeStatus::NotReady => f.write_str("Not Ready"),
        }
    }
}

/// Numeric figures of a ready node. Absent on not-ready rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeFigures {
    pub allocatable: Resources,
    pub capacity: Resources,
    pub allocated_requests: Resources,
    pub allocated_limits: Resources,
    /// `None` when the metrics API had no sample for this node.
    pub usage: Option<Resources>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeRow {
    pub name: String,
    pub status: NodeStatus,
    pub pod_count: usize,
    pub figures: Option<NodeFigures>,
}

impl NodeRow {
    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }

    /// Normalized metrics with allocatable as capacity. Not-ready rows yield
    /// all zeros with unknown usage.
    pub fn metrics(&self) -> ResourceMetrics {
        match &self.figures {
            Some(f) => ResourceMetrics::from_parts(
                f.allocated_requests,
                f.allocated_limits,
                f.usage,
                f.allocatable,
            ),
            None => ResourceMetrics::default(),
        }
    }
}

/// Identity of the cluster the totals were computed for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub host: String,
    pub version: String,
}

/// Cluster-wide sums over ready nodes only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Totals {
    pub cluster: ClusterInfo,
    pub nodes: usize,
    pub ready_nodes: usize,
    pub allocatable: Resources,
    pub capacity: Resources,
    pub allocated_requests: Resources,
    pub allocated_limits: Resources,
    pub usage: Resources,
    /// Ready nodes that contributed a usage sample.
    pub usage_samples: usize,
}

impl Totals {
    pub fn metrics(&self) -> ResourceMetrics {
        let usage = (self.usage_samples > 0).then_some(self.usage);
        ResourceMetrics::from_parts(
            self.allocated_requests,
            self.allocated_limits,
            usage,
            self.allocatable,
        )
    }
}

/// Builds the row for a single node from the pods scheduled on it.
pub fn aggregate_node(node: &NodeSnapshot, pods: &[PodSnapshot], usage: Option<Resources>) -> NodeRow {
    let active: Vec<&PodSnapshot> = pods.iter().filter(|p| !p.is_terminal()).collect();

    if !node.is_ready() {
        return NodeRow {
            name: node.name.clone(),
            status: NodeStatus::NotReady,
            pod_count: active.len(),
            figures: None,
        };
    }

    let mut requests = Resources::default();
    let mut limits = Resources::default();
    for pod in &active {
        requests += pod.requests();
        limits += pod.limits();
    }

    NodeRow {
        name: node.name.clone(),
        status: NodeStatus::Ready,
        pod_count: active.len(),
        figures: Some(NodeFigures {
            allocatable: node.allocatable,
            capacity: node.capacity,
            allocated_requests: requests,
            allocated_limits: limits,
            usage,
        }),
    }
}

/// Sums the figures of ready rows.
pub fn compute_totals<'a>(rows: impl IntoIterator<Item = &'a NodeRow>, cluster: ClusterInfo) -> Totals {
    let mut totals = Totals {
        cluster,
        ..Default::default()
    };

    for row in rows {
        totals.nodes += 1;
        let Some(f) = row.figures.as_ref().filter(|_| row.is_ready()) else {
            continue;
        };
        totals.ready_nodes += 1;
        totals.allocatable += f.allocatable;
        totals.capacity += f.capacity;
        totals.allocated_requests += f.allocated_requests;
        totals.allocated_limits += f.allocated_limits;
        if let Some(u) = f.usage {
            totals.usage += u;
            totals.usage_samples += 1;
        }
    }

    totals
}

/// Aggregates every node and the cluster totals in one pass.
pub fn aggregate_nodes(
    nodes: &[NodeSnapshot],
    pods_by_node: &HashMap<String, Vec<PodSnapshot>>,
    usage_by_name: &HashMap<String, Resources>,
    cluster: ClusterInfo,
) -> (Vec<NodeRow>, Totals) {
    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| {
            let pods = pods_by_node.get(&n.name).map(Vec::as_slice).unwrap_or(&[]);
            aggregate_node(n, pods, usage_by_name.get(&n.name).copied())
        })
        .collect();
    let totals = compute_totals(&rows, cluster);
    (rows, totals)
}

/// Groups pods by the node they are scheduled on. Unscheduled pods are left out.
pub fn group_pods_by_node(pods: &[PodSnapshot]) -> HashMap<String, Vec<PodSnapshot>> {
    let mut out: HashMap<String, Vec<PodSnapshot>> = HashMap::new();
    for pod in pods.iter().filter(|p| !p.node_name.is_empty()) {
        out.entry(pod.node_name.clone()).or_default().push(pod.clone());
    }
    out
}

pub fn group_pods_by_namespace(pods: &[PodSnapshot]) -> HashMap<String, Vec<PodSnapshot>> {
    let mut out: HashMap<String, Vec<PodSnapshot>> = HashMap::new();
    for pod in pods {
        out.entry(pod.namespace.clone()).or_default().push(pod.clone());
    }
    out
}

/// Indexes usage samples by name (node samples) or `namespace/name` (pod samples).
pub fn usage_by_name(samples: &[UsageSample]) -> HashMap<String, Resources> {
    samples
        .iter()
        .map(|s| (usage_key(s.namespace.as_deref(), &s.name), s.usage))
        .collect()
}

pub fn usage_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

/// Mean CPU and memory usage percentages over entities with a known sample.
/// Returns `None` when no entity has one.
pub fn average_usage_pct(metrics: &[ResourceMetrics]) -> Option<(f64, f64)> {
    let known: Vec<&ResourceMetrics> = metrics
        .iter()
        .filter(|m| m.cpu_usage.is_some() || m.mem_usage.is_some())
        .collect();
    if known.is_empty() {
        return None;
    }
    let n = known.len() as f64;
    let cpu = known.iter().map(|m| m.cpu_usage_pct()).sum::<f64>() / n;
    let mem = known.iter().map(|m| m.mem_usage_pct()).sum::<f64>() / n;
    Some((cpu, mem))
}
