//! Content-addressable asset cache.
//!
//! The key is a SHA-256 over an asset request's semantic inputs
//! (normalized description, target model, variation seed), so a second
//! run with unchanged semantics reuses the stored artifact instead of
//! paying for another provider call. Expired entries behave as misses
//! on lookup and are only removed by an explicit [`AssetCache::sweep`].
//!
//! Forced bypass supports full regeneration without discarding the
//! cache: lookups always miss, but stores still write, so later normal
//! runs pick up the refreshed artifact.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::fsutil;

/// Deterministic key over an asset request's semantic inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash (normalized description, model, seed) into a cache key.
/// Normalization collapses whitespace and lowercases, so prompt
/// reflowing does not defeat the cache.
pub fn cache_key(description: &str, model: &str, seed: u64) -> CacheKey {
    let normalized = description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(seed.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at < now)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: Vec<CacheEntry>,
}

/// On-disk artifact cache with a concurrent in-memory index.
pub struct AssetCache {
    dir: PathBuf,
    index_path: PathBuf,
    index: DashMap<String, CacheEntry>,
    bypass: AtomicBool,
    /// Serializes index snapshots to disk; entry mutation itself is
    /// covered by the DashMap.
    persist_lock: Mutex<()>,
}

impl AssetCache {
    /// Open (or create) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index_path = dir.join("index.json");
        let index = DashMap::new();
        if index_path.exists() {
            let text = std::fs::read_to_string(&index_path)?;
            let loaded: CacheIndex = serde_json::from_str(&text)?;
            for entry in loaded.entries {
                index.insert(entry.key.clone(), entry);
            }
        }
        Ok(Self {
            dir,
            index_path,
            index,
            bypass: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
        })
    }

    /// Force every lookup to miss while stores keep writing.
    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::SeqCst);
    }

    pub fn bypass(&self) -> bool {
        self.bypass.load(Ordering::SeqCst)
    }

    /// Return the stored artifact path on a hit. Misses on: bypass mode,
    /// unknown key, expired entry, or an index entry whose artifact file
    /// has gone missing.
    pub fn lookup(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<PathBuf> {
        if self.bypass() {
            return None;
        }
        let entry = self.index.get(key.as_str())?;
        if entry.expired(now) || !entry.artifact_path.exists() {
            return None;
        }
        Some(entry.artifact_path.clone())
    }

    /// Return the artifact path for `key` if the file is still on disk,
    /// ignoring bypass mode and expiry. For referencing artifacts that
    /// already settled in an earlier run, not for skipping generation.
    pub fn peek(&self, key: &CacheKey) -> Option<PathBuf> {
        let entry = self.index.get(key.as_str())?;
        if !entry.artifact_path.exists() {
            return None;
        }
        Some(entry.artifact_path.clone())
    }

    /// Store artifact bytes under `key`, returning the artifact path.
    /// Writes even in bypass mode so subsequent normal runs benefit.
    pub fn store(
        &self,
        key: &CacheKey,
        bytes: &[u8],
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, PipelineError> {
        let artifact_path = self.dir.join(format!("{key}.bin"));
        fsutil::atomic_write(&artifact_path, bytes)?;
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            artifact_path: artifact_path.clone(),
            created_at: now,
            expires_at: ttl.map(|t| now + t),
        };
        self.index.insert(entry.key.clone(), entry);
        self.persist()?;
        tracing::debug!(
            target: "brandloom::cache",
            key = %key,
            bytes = bytes.len(),
            "artifact stored"
        );
        Ok(artifact_path)
    }

    /// Maintenance sweep: drop expired entries and their artifacts.
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let expired: Vec<CacheEntry> = self
            .index
            .iter()
            .filter(|e| e.expired(now))
            .map(|e| e.value().clone())
            .collect();
        for entry in &expired {
            self.index.remove(&entry.key);
            let _ = std::fs::remove_file(&entry.artifact_path);
        }
        if !expired.is_empty() {
            self.persist()?;
        }
        Ok(expired.len())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn persist(&self) -> Result<(), PipelineError> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|e| PipelineError::internal(format!("cache persist lock: {e}")))?;
        let mut entries: Vec<CacheEntry> =
            self.index.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        fsutil::atomic_write_json(&self.index_path, &CacheIndex { entries })
    }
}
