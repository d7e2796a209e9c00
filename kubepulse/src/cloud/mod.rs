//! Cloud metadata for nodes: instance type, node group, capacity type.
//!
//! Lookups go through named [`CloudMetadataProvider`]s held in an explicit
//! [`ProviderRegistry`] and are deduplicated by [`CloudMetadataCache`].

mod cache;
mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cache::{CacheEntry, CloudMetadataCache};
pub use registry::ProviderRegistry;

/// Slow-changing metadata a cloud provider knows about a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudMetadata {
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub node_group: String,
    #[serde(default)]
    pub node_pool: String,
    #[serde(default)]
    pub fargate_profile: String,
    #[serde(default)]
    pub capacity_type: String,
}

const INSTANCE_TYPE_LABELS: &[&str] = &[
    "node.kubernetes.io/instance-type",
    "beta.kubernetes.io/instance-type",
];
const NODE_GROUP_LABELS: &[&str] = &["eks.amazonaws.com/nodegroup", "alpha.eksctl.io/nodegroup-name"];
const NODE_POOL_LABELS: &[&str] = &[
    "karpenter.sh/nodepool",
    "cloud.google.com/gke-nodepool",
    "kubernetes.azure.com/agentpool",
];
const FARGATE_PROFILE_LABELS: &[&str] = &["eks.amazonaws.com/fargate-profile"];
const CAPACITY_TYPE_LABELS: &[&str] = &["eks.amazonaws.com/capacityType", "karpenter.sh/capacity-type"];

impl CloudMetadata {
    pub fn is_empty(&self) -> bool {
        self.instance_type.is_empty()
            && self.node_group.is_empty()
            && self.node_pool.is_empty()
            && self.fargate_profile.is_empty()
            && self.capacity_type.is_empty()
    }

    /// Reads the well-known node labels set by managed node groups and
    /// autoscalers. Returns `None` when none are present.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| labels.get(*k))
                .cloned()
                .unwrap_or_default()
        };
        let meta = Self {
            instance_type: first(INSTANCE_TYPE_LABELS),
            node_group: first(NODE_GROUP_LABELS),
            node_pool: first(NODE_POOL_LABELS),
            fargate_profile: first(FARGATE_PROFILE_LABELS),
            capacity_type: first(CAPACITY_TYPE_LABELS),
        };
        (!meta.is_empty()).then_some(meta)
    }

    /// Short label for display: instance type, then the group or pool it belongs to.
    pub fn summary(&self) -> String {
        let group = [&self.node_group, &self.node_pool, &self.fargate_profile]
            .into_iter()
            .find(|s| !s.is_empty());
        match (self.instance_type.is_empty(), group) {
            (false, Some(g)) => format!("{} ({g})", self.instance_type),
            (false, None) => self.instance_type.clone(),
            (true, Some(g)) => g.clone(),
            (true, None) => self.capacity_type.clone(),
        }
    }
}

/// Looks up metadata for a node's provider identity.
///
/// `Ok(None)` means the provider has no data for this identity.
#[async_trait]
pub trait CloudMetadataProvider: Send + Sync {
    async fn lookup(&self, identity: &str) -> Result<Option<CloudMetadata>>;
}

/// Provider name from a node's `spec.providerID` scheme (`aws:///...` -> `aws`).
pub fn provider_name(provider_id: &str) -> Option<&str> {
    let (scheme, _) = provider_id.split_once("://")?;
    (!scheme.is_empty()).then_some(scheme)
}
