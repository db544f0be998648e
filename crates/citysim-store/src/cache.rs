//! Process-wide cache of computed JSON/raster artifacts.
//!
//! Artifacts are files under the cache root, addressed by a SHA-256
//! fingerprint of the query that produced them. A background task sweeps the
//! cache on a fixed interval and evicts every artifact that has not been
//! touched for the expiry window.
//!
//! Internal maps are guarded by `std::sync` locks which are never held across
//! an `.await`; lock poisoning is treated as unrecoverable and unwrapped.

use citysim_core::config::LayeredConfig;
use citysim_core::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Location and timing of the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub root: PathBuf,
    /// Time between two prune sweeps
    pub interval: Duration,
    /// Idle time after which an artifact is evicted
    pub expiry: Duration,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>, interval: Duration, expiry: Duration) -> Self {
        Self { root: root.into(), interval, expiry }
    }

    pub fn from_layered(config: &LayeredConfig) -> Self {
        Self::new(config.cache_dir.value.clone(), config.cache_interval(), config.cache_expiry())
    }
}

/// Content-derived cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of a semantic query, stable across processes and call order
    ///
    /// Queries must serialize deterministically, so maps inside them should be
    /// ordered (`BTreeMap`).
    pub fn fingerprint<T: Serialize>(query: &T) -> Result<Self> {
        let json = serde_json::to_string(query)?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of cached artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedKind {
    Json,
    Raster,
}

impl CachedKind {
    fn extension(&self) -> &'static str {
        match self {
            CachedKind::Json => "json",
            CachedKind::Raster => "bin",
        }
    }
}

/// One cached artifact and its last access time
#[derive(Debug)]
pub struct CachedObject {
    key: CacheKey,
    kind: CachedKind,
    path: PathBuf,
    last_access: Mutex<Instant>,
}

impl CachedObject {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn kind(&self) -> CachedKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the artifact as used now
    pub fn touch(&self) {
        *self.last_access.lock().unwrap() = Instant::now();
    }

    /// Read the artifact, counting as a use
    pub fn content(&self) -> Result<Vec<u8>> {
        self.touch();
        Ok(fs::read(&self.path)?)
    }

    fn idle_since(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock().unwrap())
    }

    /// Delete the backing file
    fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(key = %self.key, error = %e, "Failed to delete cached artifact");
            }
        }
    }
}

/// Time-expiring artifact cache
#[derive(Debug)]
pub struct Cache {
    config: CacheConfig,
    objects: RwLock<HashMap<CacheKey, Arc<CachedObject>>>,
}

impl Cache {
    /// Create a cache rooted at `config.root`
    ///
    /// A root that cannot be created is only logged; writes retry creating it.
    pub fn new(config: CacheConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.root) {
            tracing::warn!(root = %config.root.display(), error = %e, "Failed to create cache directory");
        }

        Self { config, objects: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up an artifact, counting as a use
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CachedObject>> {
        let object = self.objects.read().unwrap().get(key).cloned();

        match &object {
            Some(object) => {
                object.touch();
                tracing::debug!(key = %key, "Cache hit");
            }
            None => tracing::debug!(key = %key, "Cache miss"),
        }

        object
    }

    /// Whether an artifact is present, without counting as a use
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.objects.read().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store content under a key, replacing any previous artifact
    pub fn insert(&self, key: CacheKey, kind: CachedKind, content: &[u8]) -> Result<Arc<CachedObject>> {
        let path = self.config.root.join(format!("{}.{}", key, kind.extension()));
        if let Err(e) = fs::write(&path, content) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
            // The root vanished underneath us
            fs::create_dir_all(&self.config.root)?;
            fs::write(&path, content)?;
        }

        let object = Arc::new(CachedObject {
            key: key.clone(),
            kind,
            path,
            last_access: Mutex::new(Instant::now()),
        });
        self.objects.write().unwrap().insert(key, Arc::clone(&object));

        Ok(object)
    }

    /// Return the artifact for `key`, producing and storing it when absent
    pub fn get_or_insert_with<F>(
        &self,
        key: CacheKey,
        kind: CachedKind,
        producer: F,
    ) -> Result<Arc<CachedObject>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(object) = self.lookup(&key) {
            return Ok(object);
        }

        let content = producer()?;
        self.insert(key, kind, &content)
    }

    /// Evict every artifact idle for at least the expiry window
    ///
    /// Works on a snapshot of the keys and checks each key under the write
    /// lock on its own, so a sweep never blocks writers for long.
    pub fn prune(&self, now: Instant) -> usize {
        let keys: Vec<CacheKey> = self.objects.read().unwrap().keys().cloned().collect();
        let mut evicted = 0;

        for key in keys {
            let removed = {
                let mut objects = self.objects.write().unwrap();
                let expired =
                    objects.get(&key).is_some_and(|o| o.idle_since(now) >= self.config.expiry);
                if expired {
                    objects.remove(&key)
                } else {
                    None
                }
            };

            if let Some(object) = removed {
                object.release();
                evicted += 1;
                tracing::info!(key = %key, "Evicted cached artifact");
            }
        }

        evicted
    }

    /// Spawn the background prune task
    ///
    /// The task holds a weak reference and stops once the cache is dropped.
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Cache> = Arc::downgrade(self);
        let period = self.config.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let now = ticker.tick().await;
                let Some(live) = cache.upgrade() else {
                    break;
                };
                live.prune(now);
            }
        })
    }
}

/// Create-or-get factory for the process-wide cache
#[derive(Debug, Default)]
pub struct CacheFactory {
    instance: OnceLock<Arc<Cache>>,
}

impl CacheFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the cache and start its pruner on first call
    ///
    /// Later calls return the existing instance and ignore `config`. Must be
    /// called from within a Tokio runtime.
    pub fn create_or_get(&self, config: CacheConfig) -> Arc<Cache> {
        Arc::clone(self.instance.get_or_init(|| {
            tracing::info!(
                root = %config.root.display(),
                interval_secs = config.interval.as_secs(),
                expiry_secs = config.expiry.as_secs(),
                "Creating artifact cache"
            );
            let cache = Arc::new(Cache::new(config));
            cache.start();
            cache
        }))
    }
}
