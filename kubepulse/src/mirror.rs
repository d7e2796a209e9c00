//! Watch-fed local mirror of nodes, pods and namespaces.
//!
//! One watcher per kind feeds a `kube` reflector store. Watch events only
//! mark the mirror dirty; a single rebuild task turns the stores into a fresh
//! [`Snapshot`] and swaps it in whole, so readers never see a half-applied
//! update and a burst of events costs one rebuild.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::{
    runtime::{
        reflector::{store::Writer, Store},
        watcher, WatchStreamExt,
    },
    Api, Client, Resource,
};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::{
    aggregate::{group_pods_by_namespace, group_pods_by_node},
    error::{Error, Result},
    model::{NamespaceSnapshot, NodeSnapshot, PodSnapshot},
};

/// Single-slot, non-blocking change signal.
///
/// Any number of `signal` calls before the slot is drained leave exactly one
/// pending signal. Consumers re-read the full snapshot instead of replaying
/// deltas.
#[derive(Debug, Default)]
pub struct UpdateSlot {
    pending: AtomicBool,
    notify: Notify,
}

impl UpdateSlot {
    /// Marks the slot pending. Returns `false` if a signal was already pending.
    pub fn signal(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_one();
        true
    }

    /// Drains the slot without waiting. Returns whether a signal was pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Waits until a signal is pending, then drains it.
    pub async fn notified(&self) {
        loop {
            if self.take() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Full point-in-time copy of the mirrored collections.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub pods: Vec<PodSnapshot>,
    pub namespaces: Vec<NamespaceSnapshot>,
}

#[derive(Debug, Default)]
struct Shared {
    snapshot: RwLock<Arc<Snapshot>>,
    synced: AtomicBool,
    updates: UpdateSlot,
}

impl Shared {
    fn current(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("poisoned mirror snapshot lock, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    fn replace(&self, snapshot: Snapshot) {
        let next = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => {
                warn!("poisoned mirror snapshot lock, recovering");
                *poisoned.into_inner() = next;
            }
        }
        self.synced.store(true, Ordering::Release);
        self.updates.signal();
    }
}

struct Stores {
    nodes: Store<Node>,
    pods: Store<Pod>,
    namespaces: Store<Namespace>,
}

impl Stores {
    fn build_snapshot(&self) -> Snapshot {
        let mut nodes: Vec<NodeSnapshot> = self
            .nodes
            .state()
            .par_iter()
            .map(|n| NodeSnapshot::from(n.as_ref()))
            .collect();
        let mut pods: Vec<PodSnapshot> = self
            .pods
            .state()
            .par_iter()
            .map(|p| PodSnapshot::from(p.as_ref()))
            .collect();
        let mut namespaces: Vec<NamespaceSnapshot> = self
            .namespaces
            .state()
            .iter()
            .map(|ns| NamespaceSnapshot::from(ns.as_ref()))
            .collect();

        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));

        Snapshot {
            nodes,
            pods,
            namespaces,
        }
    }
}

/// The rayon pass over the stores is CPU bound, so it runs on the blocking pool.
async fn rebuild_snapshot(stores: Arc<Stores>) -> Result<Snapshot> {
    tokio::task::spawn_blocking(move || stores.build_snapshot())
        .await
        .map_err(|e| Error::sync(format!("snapshot rebuild: {e}")))
}

/// Eventually consistent local copy of cluster objects for one live session.
pub struct ObjectMirror {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    sync_timeout: Duration,
}

impl ObjectMirror {
    pub fn new(sync_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            sync_timeout,
        }
    }

    /// Starts the watchers and waits for their initial list to complete.
    ///
    /// Watch errors after the initial sync are logged and retried with
    /// backoff by the watcher itself.
    #[tracing::instrument(skip(self, client))]
    pub async fn start(&self, client: Client) -> Result<()> {
        let dirty = Arc::new(UpdateSlot::default());

        let (nodes, node_task) = spawn_watch(Api::<Node>::all(client.clone()), &dirty, &self.cancel);
        let (pods, pod_task) = spawn_watch(Api::<Pod>::all(client.clone()), &dirty, &self.cancel);
        let (namespaces, ns_task) = spawn_watch(Api::<Namespace>::all(client), &dirty, &self.cancel);
        self.track([node_task, pod_task, ns_task]);

        let ready = async {
            tokio::try_join!(
                nodes.wait_until_ready(),
                pods.wait_until_ready(),
                namespaces.wait_until_ready()
            )
        }
        .instrument(span!(Level::INFO, "mirror.initial_sync"));

        match tokio::time::timeout(self.sync_timeout, ready).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.stop();
                return Err(Error::sync(e.to_string()));
            }
            Err(_) => {
                self.stop();
                return Err(Error::sync(format!(
                    "initial sync did not complete within {:?}",
                    self.sync_timeout
                )));
            }
        }

        let stores = Arc::new(Stores {
            nodes,
            pods,
            namespaces,
        });
        let initial = match rebuild_snapshot(stores.clone()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stop();
                return Err(e);
            }
        };
        info!(
            nodes = initial.nodes.len(),
            pods = initial.pods.len(),
            namespaces = initial.namespaces.len(),
            "mirror synced"
        );
        self.shared.replace(initial);

        let shared = self.shared.clone();
        let cancel = self.cancel.child_token();
        let rebuild = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = dirty.notified() => match rebuild_snapshot(stores.clone()).await {
                        Ok(snapshot) => {
                            shared.replace(snapshot);
                            debug!("mirror snapshot rebuilt");
                        }
                        Err(e) => warn!(error = %e, "keeping previous mirror snapshot"),
                    },
                }
            }
        });
        self.track([rebuild]);

        Ok(())
    }

    /// Stops all watchers. Readers keep seeing the last snapshot.
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn track(&self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        match self.tasks.lock() {
            Ok(mut guard) => guard.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }
    }

    /// Whether the first full snapshot has been published.
    pub fn is_synced(&self) -> bool {
        self.shared.synced.load(Ordering::Acquire)
    }

    /// Change notifications, coalesced into a single pending signal.
    ///
    /// Raised after every snapshot swap for callers that want to react to
    /// cluster changes between ticks. The live engine refreshes on its own
    /// interval and does not drain it; an undrained slot stays pending and
    /// costs nothing.
    pub fn updates(&self) -> &UpdateSlot {
        &self.shared.updates
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.current()
    }

    pub fn snapshot_nodes(&self) -> Vec<NodeSnapshot> {
        self.shared.current().nodes.clone()
    }

    pub fn snapshot_pods(&self) -> Vec<PodSnapshot> {
        self.shared.current().pods.clone()
    }

    pub fn snapshot_namespaces(&self) -> Vec<NamespaceSnapshot> {
        self.shared.current().namespaces.clone()
    }

    pub fn pods_by_node(&self) -> HashMap<String, Vec<PodSnapshot>> {
        group_pods_by_node(&self.shared.current().pods)
    }

    pub fn pods_by_namespace(&self) -> HashMap<String, Vec<PodSnapshot>> {
        group_pods_by_namespace(&self.shared.current().pods)
    }

    /// Swaps in a complete snapshot, as the rebuild task does.
    pub(crate) fn publish(&self, snapshot: Snapshot) {
        self.shared.replace(snapshot);
    }
}

impl Drop for ObjectMirror {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_watch<K>(
    api: Api<K>,
    dirty: &Arc<UpdateSlot>,
    cancel: &CancellationToken,
) -> (Store<K>, JoinHandle<()>)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let writer: Writer<K> = Writer::default();
    let reader = writer.as_reader();

    let config = watcher::Config::default().page_size(500);
    let stream = watcher(api, config).default_backoff().reflect(writer);

    let dirty = dirty.clone();
    let cancel = cancel.child_token();
    let task = tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(_)) => {
                        dirty.signal();
                    }
                    Some(Err(e)) => warn!(kind = %kind, error = %e, "watch error, retrying"),
                    None => {
                        warn!(kind = %kind, "watch stream ended");
                        break;
                    }
                },
            }
        }
    });

    (reader, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str, node: &str) -> PodSnapshot {
        PodSnapshot {
            name: name.into(),
            namespace: ns.into(),
            node_name: node.into(),
            phase: "Running".into(),
            ..Default::default()
        }
    }

    #[test]
    fn slot_coalesces_multiple_signals() {
        let slot = UpdateSlot::default();
        assert!(slot.signal());
        assert!(!slot.signal());
        assert!(!slot.signal());
        assert!(slot.take());
        assert!(!slot.take());
    }

    #[tokio::test]
    async fn notified_returns_after_signal() {
        let slot = Arc::new(UpdateSlot::default());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.notified().await })
        };
        tokio::task::yield_now().await;
        slot.signal();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(!slot.is_pending());
    }

    #[tokio::test]
    async fn rebuild_reads_reflector_stores_on_the_blocking_pool() {
        let mut node_writer: Writer<Node> = Writer::default();
        let mut pod_writer: Writer<Pod> = Writer::default();
        let ns_writer: Writer<Namespace> = Writer::default();
        let (nodes, pods, namespaces) = (
            node_writer.as_reader(),
            pod_writer.as_reader(),
            ns_writer.as_reader(),
        );

        let mut node = Node::default();
        node.metadata.name = Some("n1".into());
        node_writer.apply_watcher_event(&watcher::Event::Apply(node));
        for (ns, name) in [("prod", "b"), ("default", "a")] {
            let mut p = Pod::default();
            p.metadata.name = Some(name.into());
            p.metadata.namespace = Some(ns.into());
            pod_writer.apply_watcher_event(&watcher::Event::Apply(p));
        }

        let snapshot = rebuild_snapshot(Arc::new(Stores {
            nodes,
            pods,
            namespaces,
        }))
        .await
        .unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        let names: Vec<_> = snapshot.pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(snapshot.namespaces.is_empty());
    }

    #[test]
    fn reads_before_sync_are_empty() {
        let mirror = ObjectMirror::new(Duration::from_secs(1));
        assert!(!mirror.is_synced());
        assert!(mirror.snapshot_nodes().is_empty());
        assert!(mirror.snapshot_pods().is_empty());
        assert!(mirror.snapshot_namespaces().is_empty());
        assert!(mirror.pods_by_node().is_empty());
    }

    #[test]
    fn publish_replaces_snapshot_and_signals_once() {
        let mirror = ObjectMirror::new(Duration::from_secs(1));
        mirror.publish(Snapshot {
            pods: vec![pod("a", "p1", "n1")],
            ..Default::default()
        });
        mirror.publish(Snapshot {
            pods: vec![pod("a", "p1", "n1"), pod("b", "p2", "n1"), pod("b", "p3", "")],
            ..Default::default()
        });

        assert!(mirror.is_synced());
        assert!(mirror.updates().take());
        assert!(!mirror.updates().take());

        let by_node = mirror.pods_by_node();
        assert_eq!(by_node["n1"].len(), 2);
        let by_ns = mirror.pods_by_namespace();
        assert_eq!(by_ns["b"].len(), 2);
    }

    #[tokio::test]
    async fn consumer_wakes_on_each_swap_after_draining() {
        let mirror = Arc::new(ObjectMirror::new(Duration::from_secs(1)));
        mirror.publish(Snapshot::default());
        mirror.updates().notified().await;
        assert!(!mirror.updates().is_pending());

        let waiter = {
            let mirror = mirror.clone();
            tokio::spawn(async move {
                mirror.updates().notified().await;
                mirror.snapshot_pods().len()
            })
        };
        tokio::task::yield_now().await;
        mirror.publish(Snapshot {
            pods: vec![pod("a", "p1", "n1")],
            ..Default::default()
        });
        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer woke")
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn snapshots_are_independent_copies() {
        let mirror = ObjectMirror::new(Duration::from_secs(1));
        mirror.publish(Snapshot {
            pods: vec![pod("a", "p1", "n1")],
            ..Default::default()
        });
        let mut copy = mirror.snapshot_pods();
        copy[0].name = "changed".into();
        mirror.publish(Snapshot::default());

        assert_eq!(copy[0].name, "changed");
        assert!(mirror.snapshot_pods().is_empty());
    }
}
