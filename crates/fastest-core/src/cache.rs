//! On-disk memo of discovery results, keyed by a per-file fingerprint so a
//! rerun over an unchanged tree can skip re-parsing entirely.

use crate::error::Result;
use crate::model::{Fixture, TestItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Cheap identity for a file's contents: size and mtime rule out almost
/// every unchanged file without touching its bytes, and the hash catches
/// the rest (a `touch`, a checkout that preserves mtime, clock skew).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
struct Fingerprint {
    size: u64,
    modified: SystemTime,
    hash: String,
}

impl Fingerprint {
    fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
            hash: hash_file(path)?,
        })
    }

    /// `true` when `other` could plausibly be the same contents as `self`.
    /// Mtimes within `CLOCK_SKEW` of each other are treated as equal before
    /// falling through to the hash, since filesystems don't all report
    /// sub-second precision the same way.
    fn matches(&self, other: &Fingerprint) -> bool {
        const CLOCK_SKEW: Duration = Duration::from_secs(2);
        if self.size != other.size {
            return false;
        }
        let close_enough = match (
            self.modified.duration_since(SystemTime::UNIX_EPOCH),
            other.modified.duration_since(SystemTime::UNIX_EPOCH),
        ) {
            (Ok(a), Ok(b)) => a.abs_diff(b) < CLOCK_SKEW,
            _ => false,
        };
        close_enough && self.hash == other.hash
    }
}

fn hash_file(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// One file's memoized discovery output, plus the fingerprint it's valid for.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheEntry {
    pub tests: Vec<TestItem>,
    pub fixtures: Vec<Fixture>,
    fingerprint: Fingerprint,
    cached_at: SystemTime,
}

/// A discovery cache persisted as a single JSON file. Entries carry their
/// own fingerprint, so staleness is judged per-file rather than against one
/// global "last run" timestamp.
#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoveryCache {
    schema_version: u32,
    ttl: Duration,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl DiscoveryCache {
    /// Bumped whenever `CacheEntry`'s shape changes; an on-disk cache from an
    /// older schema is discarded rather than deserialized partially.
    const SCHEMA_VERSION: u32 = 1;
    const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    pub fn new() -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            ttl: Self::DEFAULT_TTL,
            entries: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut cache: Self = serde_json::from_reader(BufReader::new(file))?;

        if cache.schema_version != Self::SCHEMA_VERSION {
            warn!(
                found = cache.schema_version,
                expected = Self::SCHEMA_VERSION,
                "discarding discovery cache with an incompatible schema"
            );
            cache = Self::new();
        }

        cache.evict_expired();
        Ok(cache)
    }

    /// Writes via a sibling temp file and renames over the target, so a
    /// reader never observes a half-written cache file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            serde_json::to_writer(BufWriter::new(file), self)?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }

    /// Returns the memoized tests and fixtures for `path` if a fresh entry
    /// exists whose fingerprint still matches the file on disk.
    pub fn get(&self, path: &Path) -> Option<(Vec<TestItem>, Vec<Fixture>)> {
        let entry = self.entries.get(path)?;
        if self.is_expired(entry) {
            return None;
        }
        let current = Fingerprint::of(path).ok()?;
        entry
            .fingerprint
            .matches(&current)
            .then(|| (entry.tests.clone(), entry.fixtures.clone()))
    }

    pub fn update(&mut self, path: PathBuf, tests: Vec<TestItem>, fixtures: Vec<Fixture>) -> Result<()> {
        let fingerprint = Fingerprint::of(&path)?;
        self.entries.insert(
            path,
            CacheEntry {
                tests,
                fixtures,
                fingerprint,
                cached_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops entries for files that no longer exist on disk.
    pub fn evict_missing(&mut self) {
        self.entries.retain(|path, _| path.exists());
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        SystemTime::now()
            .duration_since(entry.cached_at)
            .map(|elapsed| elapsed > self.ttl)
            .unwrap_or(false)
    }

    fn evict_expired(&mut self) {
        let now = SystemTime::now();
        self.entries.retain(|_, entry| {
            now.duration_since(entry.cached_at)
                .map(|elapsed| elapsed <= self.ttl)
                .unwrap_or(true)
        });
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let now = SystemTime::now();
        let expired = self
            .entries
            .values()
            .filter(|entry| {
                now.duration_since(entry.cached_at)
                    .map(|elapsed| elapsed > self.ttl)
                    .unwrap_or(false)
            })
            .count();

        CacheStats {
            total_entries: self.entries.len(),
            total_tests: self.entries.values().map(|e| e.tests.len()).sum(),
            expired_entries: expired,
        }
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_tests: usize,
    pub expired_entries: usize,
}

/// Picks an OS cache directory, falling back to the current directory and
/// finally the system temp dir if neither is resolvable (e.g. a minimal
/// container with no `HOME` set).
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::data_local_dir)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| {
            warn!("no cache or home directory resolvable, falling back to the temp dir");
            std::env::temp_dir()
        })
        .join("fastest")
        .join("discovery_cache.json")
}
