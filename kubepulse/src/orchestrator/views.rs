use std::{collections::HashMap, future::Future, sync::Arc};

use tracing::{debug, warn};

use super::{fan_out, Orchestrator, Row};
use crate::{
    aggregate::{
        aggregate_node, compute_totals, group_pods_by_namespace, group_pods_by_node, usage_by_name,
        usage_key, NodeRow, Totals,
    },
    cloud::{provider_name, CloudMetadata, CloudMetadataCache},
    error::Result,
    model::{
        DeploymentSnapshot, NamespaceSnapshot, NodeSnapshot, PodSnapshot, ResourceMetrics,
        Resources, UsageSample,
    },
};

pub(super) type Pair = (Row, ResourceMetrics);

/// Read-only lookups shared by every unit of one pass.
#[derive(Debug, Default)]
pub(super) struct ViewIndex {
    pods_by_node: HashMap<String, Vec<PodSnapshot>>,
    pods_by_namespace: HashMap<String, Vec<PodSnapshot>>,
    usage: HashMap<String, Resources>,
    node_allocatable: HashMap<String, Resources>,
    ready_allocatable: Resources,
}

impl ViewIndex {
    pub(super) fn build(nodes: &[NodeSnapshot], pods: &[PodSnapshot], usage: &[UsageSample]) -> Self {
        let mut ready_allocatable = Resources::default();
        for node in nodes.iter().filter(|n| n.is_ready()) {
            ready_allocatable += node.allocatable;
        }
        Self {
            pods_by_node: group_pods_by_node(pods),
            pods_by_namespace: group_pods_by_namespace(pods),
            usage: usage_by_name(usage),
            node_allocatable: nodes.iter().map(|n| (n.name.clone(), n.allocatable)).collect(),
            ready_allocatable,
        }
    }

    fn pod_usage(&self, pod: &PodSnapshot) -> Option<Resources> {
        self.usage
            .get(&usage_key(Some(&pod.namespace), &pod.name))
            .copied()
    }

    /// Requests and limits of the non-terminal pods, plus summed usage.
    /// Usage stays unknown unless at least one pod had a sample.
    fn sum_pods<'a>(&self, pods: impl IntoIterator<Item = &'a PodSnapshot>) -> PodSums {
        let mut sums = PodSums::default();
        for pod in pods {
            sums.count += 1;
            if !pod.is_terminal() {
                sums.requests += pod.requests();
                sums.limits += pod.limits();
            }
            if let Some(u) = self.pod_usage(pod) {
                *sums.usage.get_or_insert_with(Resources::default) += u;
            }
        }
        sums
    }
}

#[derive(Debug, Default)]
struct PodSums {
    count: usize,
    requests: Resources,
    limits: Resources,
    usage: Option<Resources>,
}

/// Usage is best effort: a failed metrics call is logged and counts as no samples.
async fn tolerate_usage(
    kind: &'static str,
    listing: impl Future<Output = Result<Vec<UsageSample>>>,
) -> Result<Vec<UsageSample>> {
    match listing.await {
        Ok(samples) => Ok(samples),
        Err(e) => {
            warn!(kind, error = %e, "usage listing failed, continuing without samples");
            Ok(Vec::new())
        }
    }
}

/// Provider data when a provider answers, otherwise the node's own labels.
async fn cloud_metadata(cache: Option<&CloudMetadataCache>, node: &NodeSnapshot) -> Option<CloudMetadata> {
    let from_provider = match (cache, provider_name(&node.provider_id)) {
        (Some(cache), Some(provider)) => match cache.get_or_fetch(provider, &node.provider_id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(node = %node.name, error = %e, "cloud metadata lookup failed");
                None
            }
        },
        _ => None,
    };
    from_provider.or_else(|| CloudMetadata::from_labels(&node.labels))
}

fn node_pair(row: &NodeRow, node: &NodeSnapshot, cloud: Option<CloudMetadata>) -> Pair {
    let detail = if node.kubelet_version.is_empty() {
        format!("{} pods", row.pod_count)
    } else {
        format!("{} pods, {}", row.pod_count, node.kubelet_version)
    };
    (
        Row {
            name: row.name.clone(),
            namespace: None,
            status: row.status.to_string(),
            healthy: row.is_ready(),
            detail,
            cloud,
        },
        row.metrics(),
    )
}

fn pod_pair(index: &ViewIndex, pod: &PodSnapshot) -> Pair {
    let capacity = index
        .node_allocatable
        .get(&pod.node_name)
        .copied()
        .unwrap_or_default();
    let metrics = ResourceMetrics::from_parts(pod.requests(), pod.limits(), index.pod_usage(pod), capacity);
    let detail = if pod.node_name.is_empty() {
        "<unscheduled>".to_string()
    } else {
        pod.node_name.clone()
    };
    (
        Row {
            name: pod.name.clone(),
            namespace: Some(pod.namespace.clone()),
            status: pod.phase.clone(),
            healthy: pod.is_running(),
            detail,
            cloud: None,
        },
        metrics,
    )
}

fn namespace_pair(index: &ViewIndex, ns: &NamespaceSnapshot) -> Pair {
    let pods = index.pods_by_namespace.get(&ns.name).map(Vec::as_slice).unwrap_or(&[]);
    let sums = index.sum_pods(pods);
    (
        Row {
            name: ns.name.clone(),
            namespace: None,
            status: ns.phase.clone(),
            healthy: ns.phase == "Active",
            detail: format!("{} pods", sums.count),
            cloud: None,
        },
        ResourceMetrics::from_parts(sums.requests, sums.limits, sums.usage, index.ready_allocatable),
    )
}

fn deployment_pair(index: &ViewIndex, dep: &DeploymentSnapshot) -> Pair {
    let candidates = index
        .pods_by_namespace
        .get(&dep.namespace)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let sums = index.sum_pods(candidates.iter().filter(|p| dep.selects(p)));
    (
        Row {
            name: dep.name.clone(),
            namespace: Some(dep.namespace.clone()),
            status: format!("{}/{}", dep.ready_replicas, dep.desired_replicas),
            healthy: dep.ready_replicas >= dep.desired_replicas,
            detail: format!("{} pods", sums.count),
            cloud: None,
        },
        ResourceMetrics::from_parts(sums.requests, sums.limits, sums.usage, index.ready_allocatable),
    )
}

impl Orchestrator {
    pub(super) async fn node_view(&self) -> Result<(Vec<Pair>, Totals)> {
        let (nodes, pods, usage) = tokio::try_join!(
            self.objects.nodes(),
            self.objects.pods(None),
            tolerate_usage("nodes", self.usage.node_usage())
        )?;
        debug!(nodes = nodes.len(), pods = pods.len(), samples = usage.len(), "listed node view inputs");

        let index = Arc::new(ViewIndex::build(&nodes, &pods, &usage));
        let cloud = self.cloud.clone();
        let results = fan_out(nodes, self.max_concurrent, move |node: NodeSnapshot| {
            let index = index.clone();
            let cloud = cloud.clone();
            async move {
                let pods = index.pods_by_node.get(&node.name).map(Vec::as_slice).unwrap_or(&[]);
                let row = aggregate_node(&node, pods, index.usage.get(&node.name).copied());
                let meta = cloud_metadata(cloud.as_deref(), &node).await;
                let pair = node_pair(&row, &node, meta);
                (row, pair)
            }
        })
        .await?;

        let totals = compute_totals(results.iter().map(|(row, _)| row), self.cluster.clone());
        Ok((results.into_iter().map(|(_, pair)| pair).collect(), totals))
    }

    pub(super) async fn pod_view(&self, namespace: Option<&str>) -> Result<Vec<Pair>> {
        let (pods, nodes, usage) = tokio::try_join!(
            self.objects.pods(namespace),
            self.objects.nodes(),
            tolerate_usage("pods", self.usage.pod_usage(namespace))
        )?;

        let index = Arc::new(ViewIndex::build(&nodes, &pods, &usage));
        fan_out(pods, self.max_concurrent, move |pod: PodSnapshot| {
            let index = index.clone();
            async move { pod_pair(&index, &pod) }
        })
        .await
    }

    pub(super) async fn namespace_view(&self) -> Result<Vec<Pair>> {
        let (namespaces, pods, nodes, usage) = tokio::try_join!(
            self.objects.namespaces(),
            self.objects.pods(None),
            self.objects.nodes(),
            tolerate_usage("pods", self.usage.pod_usage(None))
        )?;

        let index = Arc::new(ViewIndex::build(&nodes, &pods, &usage));
        fan_out(namespaces, self.max_concurrent, move |ns: NamespaceSnapshot| {
            let index = index.clone();
            async move { namespace_pair(&index, &ns) }
        })
        .await
    }

    pub(super) async fn deployment_view(&self, namespace: Option<&str>) -> Result<Vec<Pair>> {
        let (deployments, pods, nodes, usage) = tokio::try_join!(
            self.objects.deployments(namespace),
            self.objects.pods(namespace),
            self.objects.nodes(),
            tolerate_usage("pods", self.usage.pod_usage(namespace))
        )?;

        let index = Arc::new(ViewIndex::build(&nodes, &pods, &usage));
        fan_out(deployments, self.max_concurrent, move |dep: DeploymentSnapshot| {
            let index = index.clone();
            async move { deployment_pair(&index, &dep) }
        })
        .await
    }
}
