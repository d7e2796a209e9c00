//! Object and usage listers: the narrow seams between the orchestrator and
//! the cluster API.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_metrics::v1beta1::{NodeMetrics, PodMetrics};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Node, Pod},
};
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::warn;

use crate::{
    aggregate::ClusterInfo,
    error::{Error, Result},
    mirror::ObjectMirror,
    model::{DeploymentSnapshot, NamespaceSnapshot, NodeSnapshot, PodSnapshot, UsageSample},
};

/// Lists cluster objects. Each call is a single round trip.
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn nodes(&self) -> Result<Vec<NodeSnapshot>>;

    /// Pods in `namespace`, or in all namespaces when `None`.
    async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodSnapshot>>;

    async fn namespaces(&self) -> Result<Vec<NamespaceSnapshot>>;

    async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<DeploymentSnapshot>>;
}

/// Lists usage samples from the metrics API. May return fewer samples than
/// there are entities; freshly started pods and nodes have none yet.
#[async_trait]
pub trait UsageLister: Send + Sync {
    async fn node_usage(&self) -> Result<Vec<UsageSample>>;

    async fn pod_usage(&self, namespace: Option<&str>) -> Result<Vec<UsageSample>>;
}

fn namespaced_or_all<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Lists straight from the API server.
#[derive(Clone)]
pub struct KubeLister {
    client: Client,
}

impl KubeLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLister for KubeLister {
    #[tracing::instrument(skip(self))]
    async fn nodes(&self) -> Result<Vec<NodeSnapshot>> {
        let list = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::fetch("nodes", e))?;
        Ok(list.items.iter().map(NodeSnapshot::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodSnapshot>> {
        let list = namespaced_or_all::<Pod>(&self.client, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::fetch("pods", e))?;
        Ok(list.items.iter().map(PodSnapshot::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn namespaces(&self) -> Result<Vec<NamespaceSnapshot>> {
        let list = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::fetch("namespaces", e))?;
        Ok(list.items.iter().map(NamespaceSnapshot::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<DeploymentSnapshot>> {
        let list = namespaced_or_all::<Deployment>(&self.client, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::fetch("deployments", e))?;
        Ok(list.items.iter().map(DeploymentSnapshot::from).collect())
    }
}

/// Reads usage from the `metrics.k8s.io` API.
#[derive(Clone)]
pub struct KubeUsageLister {
    client: Client,
}

impl KubeUsageLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UsageLister for KubeUsageLister {
    #[tracing::instrument(skip(self))]
    async fn node_usage(&self) -> Result<Vec<UsageSample>> {
        let list = Api::<NodeMetrics>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::fetch("node metrics", e))?;
        Ok(list.items.iter().map(UsageSample::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn pod_usage(&self, namespace: Option<&str>) -> Result<Vec<UsageSample>> {
        let list = namespaced_or_all::<PodMetrics>(&self.client, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::fetch("pod metrics", e))?;
        Ok(list.items.iter().map(UsageSample::from).collect())
    }
}

/// Serves nodes, pods and namespaces from the mirror once it has synced,
/// and everything else (or everything, before sync) from `fallback`.
pub struct MirrorLister<L> {
    mirror: Arc<ObjectMirror>,
    fallback: L,
}

impl<L: ObjectLister> MirrorLister<L> {
    pub fn new(mirror: Arc<ObjectMirror>, fallback: L) -> Self {
        Self { mirror, fallback }
    }
}

#[async_trait]
impl<L: ObjectLister> ObjectLister for MirrorLister<L> {
    async fn nodes(&self) -> Result<Vec<NodeSnapshot>> {
        if !self.mirror.is_synced() {
            return self.fallback.nodes().await;
        }
        Ok(self.mirror.snapshot_nodes())
    }

    async fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodSnapshot>> {
        if !self.mirror.is_synced() {
            return self.fallback.pods(namespace).await;
        }
        let snapshot = self.mirror.snapshot();
        Ok(snapshot
            .pods
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .cloned()
            .collect())
    }

    async fn namespaces(&self) -> Result<Vec<NamespaceSnapshot>> {
        if !self.mirror.is_synced() {
            return self.fallback.namespaces().await;
        }
        Ok(self.mirror.snapshot_namespaces())
    }

    async fn deployments(&self, namespace: Option<&str>) -> Result<Vec<DeploymentSnapshot>> {
        self.fallback.deployments(namespace).await
    }
}

/// Resolves the cluster identity shown in the header. The version is best
/// effort and reads "unknown" when the API server does not answer.
pub async fn cluster_info(client: &Client, host: impl Into<String>) -> ClusterInfo {
    let version = match client.apiserver_version().await {
        Ok(info) => info.git_version,
        Err(e) => {
            warn!(error = %e, "failed to read apiserver version");
            "unknown".to_string()
        }
    };
    ClusterInfo {
        host: host.into(),
        version,
    }
}
