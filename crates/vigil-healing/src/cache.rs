//! Persisted healing cache
//!
//! In-memory layer is a `moka` cache; persistence is a JSON object
//! `{ error_key: HealingRecord }` at `<root>/.vigil/cache/healing_cache.json`.
//!
//! - Records older than the TTL, or without a timestamp, are treated as absent
//! - At capacity, the oldest records are evicted first
//! - Unreadable entries are dropped on load; an unparseable file is deleted
//! - `flush` writes a temp file and renames it over the target

use crate::models::HealingRecord;
use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default record lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default capacity
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Location of the cache file relative to the project root
pub const CACHE_RELATIVE_PATH: &str = ".vigil/cache/healing_cache.json";

/// Key -> record store used by the orchestrator
#[async_trait]
pub trait HealingStore: Send + Sync {
    /// Live record for `error_key`
    async fn get(&self, error_key: &str) -> Option<HealingRecord>;

    /// Insert or replace a record
    async fn put(&self, record: HealingRecord);

    /// Persist pending changes. Never fails; problems are logged.
    async fn flush(&self);
}

/// File-backed healing cache
#[derive(Debug)]
pub struct HealingCache {
    path: PathBuf,
    ttl: Duration,
    max_entries: usize,
    inner: Cache<String, HealingRecord>,
    dirty: AtomicBool,
}

impl HealingCache {
    /// Open the cache under `project_root` with default limits
    pub async fn open(project_root: impl AsRef<Path>) -> Self {
        Self::open_at(
            project_root.as_ref().join(CACHE_RELATIVE_PATH),
            DEFAULT_TTL,
            DEFAULT_MAX_ENTRIES,
        )
        .await
    }

    /// Open a cache file with explicit limits
    pub async fn open_at(path: impl Into<PathBuf>, ttl: Duration, max_entries: usize) -> Self {
        let cache = Self {
            path: path.into(),
            ttl,
            max_entries: max_entries.max(1),
            inner: Cache::builder().time_to_live(ttl).build(),
            dirty: AtomicBool::new(false),
        };
        cache.load().await;
        cache
    }

    /// Cache file location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records
    pub async fn len(&self) -> usize {
        self.inner.run_pending_tasks().await;
        usize::try_from(self.inner.entry_count()).unwrap_or(usize::MAX)
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every record
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        self.dirty.store(true, Ordering::Release);
    }

    async fn load(&self) {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "healing_cache_read_failed");
                return;
            }
        };

        let entries = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "healing_cache_corrupt_removed");
                if let Err(e) = tokio::fs::remove_file(&self.path).await {
                    tracing::debug!(error = %e, "healing_cache_remove_failed");
                }
                return;
            }
        };

        let now = Utc::now();
        let mut live: Vec<HealingRecord> = entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<HealingRecord>(value) {
                Ok(record) if !record.is_expired(self.ttl, now) => Some(record),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(error_key = %key, error = %e, "healing_cache_entry_dropped");
                    None
                }
            })
            .collect();

        // newest first, so truncation keeps the most recent
        live.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        live.truncate(self.max_entries);
        let count = live.len();
        for record in live {
            self.inner.insert(record.error_key.clone(), record).await;
        }
        tracing::debug!(entries = count, "healing_cache_loaded");
    }

    async fn evict_oldest(&self) {
        self.inner.run_pending_tasks().await;
        let current = usize::try_from(self.inner.entry_count()).unwrap_or(usize::MAX);
        if current < self.max_entries {
            return;
        }

        let mut by_age: Vec<(String, Option<chrono::DateTime<Utc>>)> = self
            .inner
            .iter()
            .map(|(key, record)| (key.as_ref().clone(), record.timestamp))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1));

        let excess = current + 1 - self.max_entries;
        for (key, _) in by_age.into_iter().take(excess) {
            self.inner.invalidate(&key).await;
        }
        self.inner.run_pending_tasks().await;
    }

    fn snapshot(&self) -> Map<String, Value> {
        self.inner
            .iter()
            .filter_map(|(key, record)| {
                serde_json::to_value(&record)
                    .ok()
                    .map(|value| (key.as_ref().clone(), value))
            })
            .collect()
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl HealingStore for HealingCache {
    async fn get(&self, error_key: &str) -> Option<HealingRecord> {
        let record = self.inner.get(error_key).await?;
        if record.is_expired(self.ttl, Utc::now()) {
            self.inner.invalidate(error_key).await;
            self.dirty.store(true, Ordering::Release);
            return None;
        }
        Some(record)
    }

    async fn put(&self, record: HealingRecord) {
        if !self.inner.contains_key(&record.error_key) {
            self.evict_oldest().await;
        }
        self.inner.insert(record.error_key.clone(), record).await;
        self.dirty.store(true, Ordering::Release);
    }

    async fn flush(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }

        self.inner.run_pending_tasks().await;
        let bytes = match serde_json::to_vec_pretty(&Value::Object(self.snapshot())) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "healing_cache_serialize_failed");
                return;
            }
        };

        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || Self::write_atomic(&path, &bytes)).await;
        match written {
            Ok(Ok(())) => tracing::debug!(path = %self.path.display(), "healing_cache_flushed"),
            Ok(Err(e)) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(path = %self.path.display(), error = %e, "healing_cache_flush_failed");
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(error = %e, "healing_cache_flush_task_failed");
            }
        }
    }
}

/// Non-persistent store, for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryHealingStore {
    records: parking_lot::Mutex<HashMap<String, HealingRecord>>,
}

impl MemoryHealingStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl HealingStore for MemoryHealingStore {
    async fn get(&self, error_key: &str) -> Option<HealingRecord> {
        self.records.lock().get(error_key).cloned()
    }

    async fn put(&self, record: HealingRecord) {
        self.records.lock().insert(record.error_key.clone(), record);
    }

    async fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorCategory;

    fn record(key: &str, fixed: bool) -> HealingRecord {
        HealingRecord::new(key, ErrorCategory::ImportError, "import_healer", fixed, "diagnosis_only")
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HealingCache::open(dir.path()).await;
        cache.put(record("k1", true)).await;
        let got = cache.get("k1").await.unwrap();
        assert!(got.fixed);
        assert_eq!(got.strategy_used, "import_healer");
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HealingCache::open(dir.path()).await;
        let old = record("old", true)
            .with_timestamp(Some(Utc::now() - chrono::Duration::days(30)));
        cache.put(old).await;
        assert!(cache.get("old").await.is_none());
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HealingCache::open_at(dir.path().join("c.json"), DEFAULT_TTL, 5).await;
        for i in 0..8 {
            let stamped = record(&format!("k{i}"), false)
                .with_timestamp(Some(Utc::now() - chrono::Duration::minutes(60 - i)));
            cache.put(stamped).await;
        }
        assert!(cache.len().await <= 5);
        assert!(cache.get("k0").await.is_none());
        assert!(cache.get("k7").await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HealingCache::open(dir.path()).await;
        cache.put(record("a", true)).await;
        cache.put(record("b", false)).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_flush_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        let cache = HealingCache::open(&root).await;
        cache.put(record("x", true)).await;
        cache.flush().await;
        assert!(root.join(".vigil").join("cache").join("healing_cache.json").exists());
    }
}
