//! Publishing per-user vectors to an external key-value cache.
//!
//! Each user gets two entries: the quantized payload under
//! `sha256("{prefix}_{user}")` and its `(min, max)` scale as two
//! little-endian f32 values under `sha256("{prefix}_{user}_min_max")`.
//! Store failures and timeouts are logged and reported as misses or failed
//! writes; they never surface as errors to callers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::vector::{Scale, SparseVector, UserId};

pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Stores `value`; `Ok(false)` when the store declined the write.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// `Ok(None)` on a miss or an expired entry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Lowercase hex SHA-256 of `template`.
pub fn cache_key(template: &str) -> String {
    hex::encode(Sha256::digest(template.as_bytes()))
}

// ============================================================================
// Stores
// ============================================================================

/// In-process store with per-entry expiry. Clones share entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<FxHashMap<String, (Instant, Arc<Vec<u8>>)>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let expires = Instant::now() + ttl;
        self.entries
            .write()
            .insert(key.to_string(), (expires, Arc::new(value.to_vec())));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some((expires, data)) if *expires > now => return Ok(Some(data.to_vec())),
                Some(_) => {}
            }
        }
        self.entries.write().remove(key);
        Ok(None)
    }
}

/// One file per key under a root directory.
///
/// Each file starts with the expiry time as f64 seconds since the epoch,
/// followed by the value. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Cache(format!("unsupported key {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("tmp");

        let mut buf = Vec::with_capacity(8 + value.len());
        buf.extend_from_slice(&(unix_now() + ttl.as_secs_f64()).to_le_bytes());
        buf.extend_from_slice(value);

        tokio::fs::write(&tmp, &buf).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some((header, value)) = data.split_first_chunk::<8>() else {
            return Err(Error::Corruption(format!("truncated cache file {:?}", path)));
        };
        if f64::from_le_bytes(*header) <= unix_now() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(value.to_vec()))
    }
}

// ============================================================================
// Adapter
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Per-call store timeout in milliseconds
    pub timeout_ms: u64,
    /// Concurrent store calls during bulk publish/fetch
    pub concurrency: usize,
    /// Key template prefix
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            timeout_ms: 2_000,
            concurrency: 8,
            key_prefix: "recommend".to_string(),
        }
    }
}

/// Counts from a bulk publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    pub published: usize,
    pub failed: usize,
    /// Empty vectors, which are never written
    pub skipped: usize,
}

/// Hit/miss counts from [`CacheAdapter::audit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub hits: usize,
    pub misses: usize,
    pub missing: Vec<UserId>,
}

#[derive(Clone)]
pub struct CacheAdapter {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl std::fmt::Debug for CacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheAdapter {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn payload_key(&self, user: UserId) -> String {
        cache_key(&format!("{}_{}", self.config.key_prefix, user))
    }

    pub fn scale_key(&self, user: UserId) -> String {
        cache_key(&format!("{}_{}_min_max", self.config.key_prefix, user))
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms.max(1))
    }

    async fn set(&self, key: &str, value: &[u8]) -> bool {
        match tokio::time::timeout(self.timeout(), self.store.set(key, value, self.ttl())).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => {
                log::warn!("[cache] write of {} failed: {}", key, e);
                false
            }
            Err(_) => {
                log::warn!("[cache] write of {} timed out", key);
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match tokio::time::timeout(self.timeout(), self.store.get(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                log::warn!("[cache] read of {} failed: {}", key, e);
                None
            }
            Err(_) => {
                log::warn!("[cache] read of {} timed out", key);
                None
            }
        }
    }

    /// Quantizes and stores `vector` for `user`. Empty vectors are not
    /// written. Returns whether both entries were stored.
    ///
    /// If the scale cannot be written after the payload was, the payload is
    /// overwritten with an empty record list so that readers never decode it
    /// against a previous scale.
    pub async fn publish(&self, user: UserId, vector: &SparseVector) -> bool {
        if vector.is_empty() {
            return false;
        }
        let (payload, scale) = vector.quantize(true);
        let payload_key = self.payload_key(user);
        if !self.set(&payload_key, &payload).await {
            return false;
        }
        if self.set(&self.scale_key(user), &scale.to_bytes()).await {
            return true;
        }

        log::warn!("[cache] scale for user {} not stored, blanking payload", user);
        let (blank, _) = SparseVector::new(user).quantize(false);
        self.set(&payload_key, &blank).await;
        false
    }

    /// The cached vector for `user`; empty when either entry is missing.
    pub async fn fetch(&self, user: UserId) -> SparseVector {
        let Some(raw_scale) = self.get(&self.scale_key(user)).await else {
            return SparseVector::new(user);
        };
        let Some(scale) = Scale::from_bytes(&raw_scale) else {
            log::warn!("[cache] malformed scale entry for user {}", user);
            return SparseVector::new(user);
        };
        let Some(payload) = self.get(&self.payload_key(user)).await else {
            return SparseVector::new(user);
        };
        SparseVector::dequantize(user, &payload, scale.extent())
    }

    /// Publishes every vector, at most `concurrency` store calls in flight.
    pub async fn publish_all(&self, outputs: Vec<(UserId, SparseVector)>) -> PublishSummary {
        let mut summary = PublishSummary::default();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (user, vector) in outputs {
            if vector.is_empty() {
                summary.skipped += 1;
                continue;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let adapter = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                adapter.publish(user, &vector).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.published += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    log::error!("[cache] publish task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "[cache] published {} users ({} failed, {} empty)",
            summary.published,
            summary.failed,
            summary.skipped
        );
        summary
    }

    /// Fetches many users concurrently. Misses are left out of the result.
    pub async fn fetch_many(
        &self,
        users: impl IntoIterator<Item = UserId>,
    ) -> FxHashMap<UserId, SparseVector> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for user in users {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let adapter = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (user, adapter.fetch(user).await)
            });
        }

        let mut out = FxHashMap::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((user, vector)) if !vector.is_empty() => {
                    out.insert(user, vector);
                }
                Ok(_) => {}
                Err(e) => log::error!("[cache] fetch task failed: {}", e),
            }
        }
        out
    }

    /// Checks which users have a readable cache entry.
    pub async fn audit(&self, users: impl IntoIterator<Item = UserId>) -> AuditReport {
        let users: Vec<UserId> = users.into_iter().collect();
        let found = self.fetch_many(users.iter().copied()).await;

        let mut report = AuditReport::default();
        for user in users {
            if found.contains_key(&user) {
                report.hits += 1;
            } else {
                report.misses += 1;
                report.missing.push(user);
            }
        }
        log::info!("[cache] audit: {} hits, {} misses", report.hits, report.misses);
        report
    }
}
