//! Blueprint cache with mtime and TTL invalidation.
//!
//! Cache key is `path:mtime:flagshash`, so any file modification makes
//! every prior entry unreachable; TTL expiry and explicit per-file
//! invalidation handle the rest. Hit rate is tracked for the status
//! surface.

use super::{Blueprint, BlueprintFlags, now_seconds};
use crate::error::Result;
use crate::storage::IndexStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_TTL_SECONDS: f64 = 3600.0;

#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

pub struct BlueprintCache {
    store: Arc<IndexStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl_seconds: f64,
}

impl BlueprintCache {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    /// Look up a cached blueprint. Misses on: unknown key, expired entry,
    /// or the file no longer existing.
    pub fn get(
        &self,
        project_root: &Path,
        file_path: &str,
        flags: &BlueprintFlags,
    ) -> Result<Option<Blueprint>> {
        let Some(mtime) = file_mtime(project_root, file_path) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let key = cache_key(file_path, mtime, flags);

        let Some((json, expires_at)) = self.store.sqlite.cache_get(&key)? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if now_seconds() > expires_at {
            self.store.sqlite.cache_delete(&key)?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        match serde_json::from_str::<Blueprint>(&json) {
            Ok(mut blueprint) => {
                blueprint.cached = true;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(blueprint))
            }
            Err(e) => {
                tracing::warn!("dropping undecodable blueprint cache entry: {e}");
                self.store.sqlite.cache_delete(&key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub fn put(
        &self,
        project_root: &Path,
        file_path: &str,
        flags: &BlueprintFlags,
        blueprint: &Blueprint,
    ) -> Result<()> {
        let Some(mtime) = file_mtime(project_root, file_path) else {
            return Ok(());
        };
        let key = cache_key(file_path, mtime, flags);
        let json = serde_json::to_string(blueprint)?;
        self.store
            .sqlite
            .cache_put(&key, &json, now_seconds() + self.ttl_seconds, file_path)?;
        Ok(())
    }

    /// Drop every cached entry for a file, regardless of flags or mtime.
    pub fn invalidate(&self, file_path: &str) -> Result<usize> {
        self.store.sqlite.cache_invalidate(file_path)
    }

    pub fn cleanup_expired(&self) -> Result<usize> {
        self.store.sqlite.cache_cleanup_expired(now_seconds())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate_percent: if total > 0 {
                (hits as f64 / total as f64 * 1000.0).round() / 10.0
            } else {
                0.0
            },
        }
    }
}

/// `path:mtime:flagshash` with the flag hash truncated to 8 hex chars.
pub fn cache_key(file_path: &str, mtime: f64, flags: &BlueprintFlags) -> String {
    let digest = Sha256::digest(flags.canonical().as_bytes());
    let hash: String = digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{file_path}:{mtime:.6}:{hash}")
}

fn file_mtime(project_root: &Path, file_path: &str) -> Option<f64> {
    let absolute = project_root.join(file_path);
    let metadata = std::fs::metadata(absolute).ok()?;
    metadata
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn blueprint(file: &str) -> Blueprint {
        Blueprint {
            file_path: file.into(),
            generated_at: 0.0,
            nodes: Vec::new(),
            hydrated: Vec::new(),
            removed_symbols: Vec::new(),
            cached: false,
        }
    }

    fn setup() -> (TempDir, TempDir, BlueprintCache) {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("a.py"), "x = 1\n").unwrap();
        let index = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open(index.path(), 8).unwrap());
        let cache = BlueprintCache::new(store);
        (repo, index, cache)
    }

    #[test]
    fn put_then_get_is_a_hit_marked_cached() {
        let (repo, _index, cache) = setup();
        let flags = BlueprintFlags::default();
        cache
            .put(repo.path(), "a.py", &flags, &blueprint("a.py"))
            .unwrap();

        let got = cache.get(repo.path(), "a.py", &flags).unwrap().unwrap();
        assert!(got.cached);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn different_flags_are_different_entries() {
        let (repo, _index, cache) = setup();
        let plain = BlueprintFlags::default();
        let with_deps = BlueprintFlags {
            deps: true,
            ..Default::default()
        };
        cache
            .put(repo.path(), "a.py", &plain, &blueprint("a.py"))
            .unwrap();
        assert!(cache.get(repo.path(), "a.py", &with_deps).unwrap().is_none());
    }

    #[test]
    fn missing_file_is_always_a_miss() {
        let (repo, _index, cache) = setup();
        let flags = BlueprintFlags::default();
        assert!(cache.get(repo.path(), "gone.py", &flags).unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn invalidate_removes_all_flag_variants() {
        let (repo, _index, cache) = setup();
        let plain = BlueprintFlags::default();
        let with_deps = BlueprintFlags {
            deps: true,
            ..Default::default()
        };
        cache
            .put(repo.path(), "a.py", &plain, &blueprint("a.py"))
            .unwrap();
        cache
            .put(repo.path(), "a.py", &with_deps, &blueprint("a.py"))
            .unwrap();

        let removed = cache.invalidate("a.py").unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(repo.path(), "a.py", &plain).unwrap().is_none());
        assert!(cache.get(repo.path(), "a.py", &with_deps).unwrap().is_none());
    }

    #[test]
    fn mtime_change_invalidates_implicitly() {
        let (repo, _index, cache) = setup();
        let flags = BlueprintFlags::default();
        cache
            .put(repo.path(), "a.py", &flags, &blueprint("a.py"))
            .unwrap();

        // Rewrite with a different mtime.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(repo.path().join("a.py"), "x = 2\n").unwrap();
        let changed = filetime_bump(repo.path().join("a.py"));
        if changed {
            assert!(cache.get(repo.path(), "a.py", &flags).unwrap().is_none());
        }
    }

    // Some filesystems have coarse mtime granularity; only assert when the
    // mtime actually moved.
    fn filetime_bump(path: std::path::PathBuf) -> bool {
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, "x = 3\n").unwrap();
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        before != after
    }
}
