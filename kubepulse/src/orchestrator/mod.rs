//! Per-view fetch, fan-out and fan-in.
//!
//! A pass lists each collection the view needs exactly once, builds shared
//! indices, computes one unit per entity under a concurrency bound, then
//! sorts and truncates rows and metrics together.

mod fanout;
mod sort;
mod views;

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    aggregate::{ClusterInfo, Totals},
    cloud::{CloudMetadata, CloudMetadataCache},
    error::Result,
    model::ResourceMetrics,
    source::{ObjectLister, UsageLister},
};

pub use fanout::fan_out;
pub use sort::{sort_pairs, truncate_pairs, SortMode};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ViewKind {
    #[default]
    Namespaces,
    Pods,
    Nodes,
    Deployments,
}

impl ViewKind {
    pub const ALL: [ViewKind; 4] = [
        ViewKind::Namespaces,
        ViewKind::Pods,
        ViewKind::Nodes,
        ViewKind::Deployments,
    ];

    /// Whether the view lists objects of a single namespace.
    pub fn is_namespaced(self) -> bool {
        matches!(self, ViewKind::Pods | ViewKind::Deployments)
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViewKind::Namespaces => "Namespaces",
            ViewKind::Pods => "Pods",
            ViewKind::Nodes => "Nodes",
            ViewKind::Deployments => "Deployments",
        };
        f.write_str(s)
    }
}

/// One display line. Paired with the `ResourceMetrics` at the same index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    pub name: String,
    pub namespace: Option<String>,
    pub status: String,
    pub healthy: bool,
    pub detail: String,
    pub cloud: Option<CloudMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewRequest {
    pub view: ViewKind,
    /// Scope for namespaced views; `None` lists every namespace.
    pub namespace: Option<String>,
    pub sort: SortMode,
    /// Maximum rows to keep, 0 for no limit.
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct ViewOutput {
    pub view: ViewKind,
    pub rows: Vec<Row>,
    pub metrics: Vec<ResourceMetrics>,
    /// Every namespace name a namespace pass listed, before sorting and the
    /// row limit. Empty for other views.
    pub namespaces: Vec<String>,
    /// Only the node view computes cluster totals.
    pub totals: Option<Totals>,
    pub cluster: ClusterInfo,
    pub fetched_at: DateTime<Utc>,
}

impl ViewOutput {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct Orchestrator {
    objects: Arc<dyn ObjectLister>,
    usage: Arc<dyn UsageLister>,
    cloud: Option<Arc<CloudMetadataCache>>,
    cluster: ClusterInfo,
    max_concurrent: usize,
}

impl Orchestrator {
    pub fn new(
        objects: Arc<dyn ObjectLister>,
        usage: Arc<dyn UsageLister>,
        cluster: ClusterInfo,
        max_concurrent: usize,
    ) -> Self {
        Self {
            objects,
            usage,
            cloud: None,
            cluster,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Enables cloud enrichment of node rows.
    pub fn with_cloud_cache(mut self, cache: Arc<CloudMetadataCache>) -> Self {
        self.cloud = Some(cache);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    /// Runs one pass for `req`. Any object listing failure aborts the pass.
    #[tracing::instrument(skip(self), fields(view = %req.view))]
    pub async fn run(&self, req: &ViewRequest) -> Result<ViewOutput> {
        let namespace = req.namespace.as_deref();
        let (mut pairs, totals) = match req.view {
            ViewKind::Nodes => {
                let (pairs, totals) = self.node_view().await?;
                (pairs, Some(totals))
            }
            ViewKind::Pods => (self.pod_view(namespace).await?, None),
            ViewKind::Namespaces => (self.namespace_view().await?, None),
            ViewKind::Deployments => (self.deployment_view(namespace).await?, None),
        };

        let namespaces = match req.view {
            ViewKind::Namespaces => pairs.iter().map(|(row, _)| row.name.clone()).collect(),
            _ => Vec::new(),
        };
        let total = pairs.len();
        sort_pairs(&mut pairs, req.sort);
        truncate_pairs(&mut pairs, req.limit);
        debug!(total, kept = pairs.len(), sort = %req.sort, "view computed");

        let (rows, metrics) = pairs.into_iter().unzip();
        Ok(ViewOutput {
            view: req.view,
            rows,
            metrics,
            namespaces,
            totals,
            cluster: self.cluster.clone(),
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cloud::{CloudMetadataProvider, ProviderRegistry},
        error::Error,
        model::{
            ContainerResources, DeploymentSnapshot, NamespaceSnapshot, NodeSnapshot, PodSnapshot,
            Resources, UsageSample,
        },
    };
    use async_trait::async_trait;
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    const MI: i64 = 1024 * 1024;
    const GI: i64 = 1024 * MI;

    #[derive(Default, Clone)]
    struct FakeObjects {
        nodes: Vec<NodeSnapshot>,
        pods: Vec<PodSnapshot>,
        namespaces: Vec<NamespaceSnapshot>,
        deployments: Vec<DeploymentSnapshot>,
        fail_nodes: bool,
    }

    #[async_trait]
    impl ObjectLister for FakeObjects {
        async fn nodes(&self) -> Result<Vec<NodeSnapshot>> {
            if self.fail_nodes {
                return Err(Error::fetch("nodes", "connection refused"));
            }
            Ok(self.nodes.clone())
        }

        async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodSnapshot>> {
            Ok(self
                .pods
                .iter()
                .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
                .cloned()
                .collect())
        }

        async fn namespaces(&self) -> Result<Vec<NamespaceSnapshot>> {
            Ok(self.namespaces.clone())
        }

        async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<DeploymentSnapshot>> {
            Ok(self
                .deployments
                .iter()
                .filter(|d| namespace.map_or(true, |ns| d.namespace == ns))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeUsage {
        nodes: Vec<UsageSample>,
        pods: Vec<UsageSample>,
        fail: bool,
    }

    #[async_trait]
    impl UsageLister for FakeUsage {
        async fn node_usage(&self) -> Result<Vec<UsageSample>> {
            if self.fail {
                return Err(Error::fetch("node metrics", "metrics API unavailable"));
            }
            Ok(self.nodes.clone())
        }

        async fn pod_usage(&self, namespace: Option<&str>) -> Result<Vec<UsageSample>> {
            if self.fail {
                return Err(Error::fetch("pod metrics", "metrics API unavailable"));
            }
            Ok(self
                .pods
                .iter()
                .filter(|s| namespace.map_or(true, |ns| s.namespace.as_deref() == Some(ns)))
                .cloned()
                .collect())
        }
    }

    fn node(name: &str, ready: bool) -> NodeSnapshot {
        NodeSnapshot {
            name: name.into(),
            ready: Some(ready),
            allocatable: Resources::new(4000, 8 * GI),
            capacity: Resources::new(4000, 8 * GI),
            ..Default::default()
        }
    }

    fn pod(name: &str, ns: &str, node: &str, cpu: i64) -> PodSnapshot {
        PodSnapshot {
            name: name.into(),
            namespace: ns.into(),
            node_name: node.into(),
            phase: "Running".into(),
            containers: vec![ContainerResources {
                requests: Resources::new(cpu, 512 * MI),
                limits: Resources::new(cpu * 2, GI),
            }],
            ..Default::default()
        }
    }

    fn pod_sample(name: &str, ns: &str, cpu: i64) -> UsageSample {
        UsageSample {
            name: name.into(),
            namespace: Some(ns.into()),
            usage: Resources::new(cpu, 64 * MI),
        }
    }

    fn cluster() -> ClusterInfo {
        ClusterInfo {
            host: "https://k8s.example:6443".into(),
            version: "v1.30.2".into(),
        }
    }

    fn orchestrator(objects: FakeObjects, usage: FakeUsage) -> Orchestrator {
        Orchestrator::new(Arc::new(objects), Arc::new(usage), cluster(), 4)
    }

    fn request(view: ViewKind, sort: SortMode, limit: usize) -> ViewRequest {
        ViewRequest {
            view,
            namespace: None,
            sort,
            limit,
        }
    }

    #[tokio::test]
    async fn single_ready_node_scenario() {
        let objects = FakeObjects {
            nodes: vec![node("worker-1", true)],
            pods: vec![pod("app", "default", "worker-1", 500)],
            ..Default::default()
        };
        let usage = FakeUsage {
            nodes: vec![UsageSample {
                name: "worker-1".into(),
                namespace: None,
                usage: Resources::new(250, 256 * MI),
            }],
            ..Default::default()
        };

        let out = orchestrator(objects, usage)
            .run(&request(ViewKind::Nodes, SortMode::Status, 0))
            .await
            .unwrap();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].status, "Ready");
        let m = &out.metrics[0];
        assert_eq!(m.cpu_request, 0.5);
        assert_eq!(m.cpu_limit, 1.0);
        assert_eq!(m.cpu_usage, Some(0.25));
        assert_eq!(m.cpu_capacity, 4.0);
        assert_eq!(m.mem_request, (512 * MI) as f64);
        assert_eq!(m.mem_usage, Some((256 * MI) as f64));

        let totals = out.totals.unwrap();
        assert_eq!(totals.ready_nodes, 1);
        assert_eq!(totals.allocated_requests, Resources::new(500, 512 * MI));
        assert_eq!(totals.allocated_limits, Resources::new(1000, GI));
        assert_eq!(totals.usage, Resources::new(250, 256 * MI));
        assert_eq!(totals.cluster.version, "v1.30.2");
    }

    #[tokio::test]
    async fn not_ready_node_scenario() {
        let objects = FakeObjects {
            nodes: vec![node("worker-1", false)],
            pods: vec![pod("app", "default", "worker-1", 500)],
            ..Default::default()
        };
        let out = orchestrator(objects, FakeUsage::default())
            .run(&request(ViewKind::Nodes, SortMode::Status, 0))
            .await
            .unwrap();

        assert_eq!(out.rows[0].status, "Not Ready");
        assert!(!out.rows[0].healthy);
        let totals = out.totals.unwrap();
        assert_eq!(totals.nodes, 1);
        assert_eq!(totals.ready_nodes, 0);
        assert_eq!(totals.allocatable, Resources::default());
        assert_eq!(totals.allocated_requests, Resources::default());
        assert_eq!(totals.usage, Resources::default());
    }

    #[tokio::test]
    async fn pairing_survives_sort_and_truncate_for_any_order() {
        let mut pods: Vec<PodSnapshot> = (0..8)
            .map(|i| pod(&format!("pod-{i}"), "default", "worker-1", 100 * (i + 1)))
            .collect();
        let samples: Vec<UsageSample> = (0..8)
            .map(|i| pod_sample(&format!("pod-{i}"), "default", 37 * ((i * 5) % 8 + 1)))
            .collect();

        for rotation in 0..pods.len() {
            pods.rotate_left(1);
            if rotation % 2 == 1 {
                pods.reverse();
            }
            let objects = FakeObjects {
                nodes: vec![node("worker-1", true)],
                pods: pods.clone(),
                ..Default::default()
            };
            let usage = FakeUsage {
                pods: samples.clone(),
                ..Default::default()
            };
            let orch = orchestrator(objects, usage);

            for sort in [SortMode::Status, SortMode::Name, SortMode::Cpu, SortMode::Memory] {
                let out = orch.run(&request(ViewKind::Pods, sort, 5)).await.unwrap();
                assert_eq!(out.rows.len(), 5);
                assert_eq!(out.rows.len(), out.metrics.len());
                for (row, m) in out.rows.iter().zip(&out.metrics) {
                    let i: i64 = row.name.trim_start_matches("pod-").parse().unwrap();
                    assert_eq!(m.cpu_request, (100 * (i + 1)) as f64 / 1000.0);
                    assert_eq!(m.cpu_usage, Some((37 * ((i * 5) % 8 + 1)) as f64 / 1000.0));
                }
            }
        }
    }

    #[tokio::test]
    async fn status_sort_puts_finished_pods_before_running_ones() {
        let mut done = pod("z-succeeded", "default", "worker-1", 100);
        done.phase = "Succeeded".into();
        let objects = FakeObjects {
            nodes: vec![node("worker-1", true)],
            pods: vec![pod("a-running", "default", "worker-1", 100), done],
            ..Default::default()
        };
        let usage = FakeUsage {
            pods: vec![
                pod_sample("a-running", "default", 100),
                pod_sample("z-succeeded", "default", 100),
            ],
            ..Default::default()
        };

        let out = orchestrator(objects, usage)
            .run(&request(ViewKind::Pods, SortMode::Status, 0))
            .await
            .unwrap();
        let order: Vec<_> = out.rows.iter().map(|r| (r.name.as_str(), r.status.as_str())).collect();
        assert_eq!(order, [("z-succeeded", "Succeeded"), ("a-running", "Running")]);
        assert!(out.namespaces.is_empty());
    }

    #[tokio::test]
    async fn namespace_names_survive_the_row_limit() {
        let objects = FakeObjects {
            nodes: vec![node("worker-1", true)],
            namespaces: ["prod", "default", "kube-system"]
                .map(|n| NamespaceSnapshot {
                    name: n.into(),
                    phase: "Active".into(),
                })
                .to_vec(),
            ..Default::default()
        };

        let out = orchestrator(objects, FakeUsage::default())
            .run(&request(ViewKind::Namespaces, SortMode::Name, 1))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        let mut names = out.namespaces.clone();
        names.sort();
        assert_eq!(names, ["default", "kube-system", "prod"]);
    }

    #[tokio::test]
    async fn cpu_sort_orders_by_usage_share() {
        let objects = FakeObjects {
            nodes: vec![node("worker-1", true)],
            pods: vec![
                pod("low", "default", "worker-1", 100),
                pod("high", "default", "worker-1", 100),
                pod("mid", "default", "worker-1", 100),
            ],
            ..Default::default()
        };
        let usage = FakeUsage {
            pods: vec![
                pod_sample("low", "default", 10),
                pod_sample("high", "default", 900),
                pod_sample("mid", "default", 300),
            ],
            ..Default::default()
        };

        let out = orchestrator(objects, usage)
            .run(&request(ViewKind::Pods, SortMode::Cpu, 2))
            .await
            .unwrap();
        let names: Vec<_> = out.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn object_listing_failure_aborts_the_view() {
        let objects = FakeObjects {
            fail_nodes: true,
            ..Default::default()
        };
        let err = orchestrator(objects, FakeUsage::default())
            .run(&request(ViewKind::Nodes, SortMode::Status, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { kind: "nodes", .. }));
    }

    #[tokio::test]
    async fn usage_failure_means_unknown_usage() {
        let objects = FakeObjects {
            nodes: vec![node("worker-1", true)],
            pods: vec![pod("app", "default", "worker-1", 500)],
            namespaces: vec![NamespaceSnapshot {
                name: "default".into(),
                phase: "Active".into(),
            }],
            ..Default::default()
        };
        let usage = FakeUsage {
            fail: true,
            ..Default::default()
        };
        let orch = orchestrator(objects, usage);

        let out = orch
            .run(&request(ViewKind::Namespaces, SortMode::Status, 0))
            .await
            .unwrap();
        assert_eq!(out.rows[0].name, "default");
        assert_eq!(out.metrics[0].cpu_usage, None);
        assert_eq!(out.metrics[0].cpu_request, 0.5);
        assert!(out.totals.is_none());

        let nodes = orch
            .run(&request(ViewKind::Nodes, SortMode::Status, 0))
            .await
            .unwrap();
        assert_eq!(nodes.totals.unwrap().usage_samples, 0);
    }

    #[tokio::test]
    async fn deployment_view_is_namespace_scoped() {
        let mut web = pod("web-1", "prod", "worker-1", 200);
        web.labels = BTreeMap::from([("app".to_string(), "web".to_string())]);
        let mut other = pod("web-1", "dev", "worker-1", 200);
        other.labels = web.labels.clone();
        let deployment = |ns: &str| DeploymentSnapshot {
            name: "web".into(),
            namespace: ns.into(),
            desired_replicas: 1,
            ready_replicas: 1,
            selector: BTreeMap::from([("app".to_string(), "web".to_string())]),
        };
        let objects = FakeObjects {
            nodes: vec![node("worker-1", true)],
            pods: vec![web, other],
            deployments: vec![deployment("prod"), deployment("dev")],
            ..Default::default()
        };

        let req = ViewRequest {
            view: ViewKind::Deployments,
            namespace: Some("prod".into()),
            sort: SortMode::Name,
            limit: 0,
        };
        let out = orchestrator(objects, FakeUsage::default()).run(&req).await.unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].namespace.as_deref(), Some("prod"));
        assert!(out.rows[0].healthy);
        assert_eq!(out.metrics[0].cpu_request, 0.2);
        assert_eq!(out.metrics[0].cpu_capacity, 4.0);
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CloudMetadataProvider for CountingProvider {
        async fn lookup(&self, identity: &str) -> Result<Option<CloudMetadata>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CloudMetadata {
                instance_type: format!("type-for-{}", identity.rsplit('/').next().unwrap_or("")),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn node_rows_carry_cloud_metadata_from_the_cache() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ProviderRegistry::new();
        registry.register("aws", provider.clone());
        let cache = Arc::new(CloudMetadataCache::new(Duration::from_secs(300), Arc::new(registry)));

        let mut n = node("worker-1", true);
        n.provider_id = "aws:///us-east-1a/i-abc".into();
        let objects = FakeObjects {
            nodes: vec![n, node("bare-metal", true)],
            ..Default::default()
        };
        let orch = orchestrator(objects, FakeUsage::default()).with_cloud_cache(cache);

        for _ in 0..3 {
            let out = orch
                .run(&request(ViewKind::Nodes, SortMode::Name, 0))
                .await
                .unwrap();
            assert_eq!(out.rows[0].name, "bare-metal");
            assert!(out.rows[0].cloud.is_none());
            assert_eq!(
                out.rows[1].cloud.as_ref().map(|c| c.instance_type.as_str()),
                Some("type-for-i-abc")
            );
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bound_below_one_is_raised() {
        let orch = Orchestrator::new(
            Arc::new(FakeObjects::default()),
            Arc::new(FakeUsage::default()),
            cluster(),
            0,
        );
        assert_eq!(orch.max_concurrent(), 1);
    }
}
