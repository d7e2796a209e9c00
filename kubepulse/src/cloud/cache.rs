use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use k8s_openapi::serde_json;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{CloudMetadata, ProviderRegistry};
use crate::error::{Error, Result};

const CACHE_FILE_NAME: &str = "cloud-metadata.json";

/// A cached lookup result and when it was stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub metadata: CloudMetadata,
    pub timestamp: DateTime<Utc>,
}

type EntryMap = HashMap<String, CacheEntry>;

/// TTL-bound cache of cloud metadata, optionally persisted to disk.
///
/// Expired entries are reported as misses but stay in the map until they are
/// overwritten or dropped at the next hydration.
pub struct CloudMetadataCache {
    entries: RwLock<EntryMap>,
    ttl: TimeDelta,
    registry: Arc<ProviderRegistry>,
    persist_path: Option<PathBuf>,
    generation: AtomicU64,
    last_written: Arc<Mutex<u64>>,
}

impl CloudMetadataCache {
    /// In-memory cache.
    pub fn new(ttl: Duration, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(365 * 100)),
            registry,
            persist_path: None,
            generation: AtomicU64::new(0),
            last_written: Arc::new(Mutex::new(0)),
        }
    }

    /// Cache backed by `path`. Loads it once now; every later `set` rewrites
    /// it in the background.
    pub fn with_persistence(ttl: Duration, registry: Arc<ProviderRegistry>, path: PathBuf) -> Self {
        let mut cache = Self::new(ttl, registry);
        let loaded = load_entries(&path, cache.ttl, Utc::now());
        info!(path = %path.display(), entries = loaded.len(), "hydrated cloud metadata cache");
        cache.entries = RwLock::new(loaded);
        cache.persist_path = Some(path);
        cache
    }

    /// `<user cache dir>/kubepulse/cloud-metadata.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("kubepulse").join(CACHE_FILE_NAME))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached metadata if present and not older than the TTL.
    pub fn get(&self, key: &str) -> Option<CloudMetadata> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CloudMetadata> {
        let entries = self.read_entries();
        entries
            .get(key)
            .filter(|e| is_fresh(e, self.ttl, now))
            .map(|e| e.metadata.clone())
    }

    /// Stores `value` under `key` stamped with the current time.
    pub fn set(&self, key: &str, value: CloudMetadata) {
        self.set_at(key, value, Utc::now());
    }

    fn set_at(&self, key: &str, value: CloudMetadata, timestamp: DateTime<Utc>) {
        let persist = {
            let mut entries = self.write_entries();
            entries.insert(
                key.to_string(),
                CacheEntry {
                    metadata: value,
                    timestamp,
                },
            );
            // Snapshot under the lock so generation order matches map order.
            self.persist_path.as_ref().map(|path| {
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                (path.clone(), generation, entries.clone())
            })
        };

        if let Some((path, generation, snapshot)) = persist {
            let last_written = self.last_written.clone();
            let job = move || write_entries(&path, generation, &snapshot, &last_written);
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(job);
                }
                Err(_) => {
                    std::thread::spawn(job);
                }
            }
        }
    }

    /// Cache hit, or a lookup through the named provider.
    ///
    /// An unregistered provider resolves to `Ok(None)`. Only non-empty
    /// results are cached; errors and empty results are retried on the next
    /// call.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_fetch(&self, provider_name: &str, key: &str) -> Result<Option<CloudMetadata>> {
        if let Some(hit) = self.get(key) {
            return Ok(Some(hit));
        }

        let Some(provider) = self.registry.get(provider_name) else {
            debug!(provider = provider_name, "no cloud metadata provider registered");
            return Ok(None);
        };

        match provider.lookup(key).await {
            Ok(Some(meta)) if !meta.is_empty() => {
                self.set(key, meta.clone());
                Ok(Some(meta))
            }
            Ok(_) => Ok(None),
            Err(e @ Error::Provider { .. }) => Err(e),
            Err(e) => Err(Error::provider(provider_name, e.to_string())),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.entries.read().unwrap_or_else(|poisoned| {
            warn!("poisoned cloud cache lock, recovering");
            poisoned.into_inner()
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("poisoned cloud cache lock, recovering");
            poisoned.into_inner()
        })
    }
}

fn is_fresh(entry: &CacheEntry, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.timestamp) <= ttl
}

/// Reads the cache file, dropping entries that are already stale. A missing,
/// unreadable or corrupt file yields an empty map.
fn load_entries(path: &Path, ttl: TimeDelta, now: DateTime<Utc>) -> EntryMap {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cloud metadata cache file");
            return HashMap::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read cloud metadata cache");
            return HashMap::new();
        }
    };

    match serde_json::from_str::<EntryMap>(&raw) {
        Ok(mut entries) => {
            entries.retain(|_, e| is_fresh(e, ttl, now));
            entries
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring corrupt cloud metadata cache");
            HashMap::new()
        }
    }
}

/// Writes `snapshot` via a temp file and rename. Snapshots older than the
/// last one written are skipped.
fn write_entries(path: &Path, generation: u64, snapshot: &EntryMap, last_written: &Mutex<u64>) {
    let mut last = last_written.lock().unwrap_or_else(|p| p.into_inner());
    if generation <= *last {
        return;
    }

    let result = (|| -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(snapshot).map_err(|e| Error::serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    match result {
        Ok(()) => *last = generation,
        Err(e) => warn!(path = %path.display(), error = %e, "failed to persist cloud metadata cache"),
    }
}
