use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const RECORDS_KEY: &str = "kpi_records_cache";
pub const DEFINITIONS_KEY: &str = "kpi_definitions_cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

/// Keyed store for fetched data, stamped with the time it was written.
pub trait RecordCache {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>>;
    fn set<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) -> anyhow::Result<()>;
    fn invalidate(&self, key: &str) -> anyhow::Result<()>;
}

/// JSON files under a directory, one per key.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl RecordCache for FileCache {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let path = self.path(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(key, error = %err, "dropping unreadable cache entry");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn set<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache dir {}", self.dir.display()))?;
        let json = serde_json::to_string(entry)?;
        std::fs::write(self.path(key), json)?;
        Ok(())
    }

    fn invalidate(&self, key: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Serves `key` from the cache while younger than `ttl`, otherwise runs
/// `fetch` and stores its result.
pub async fn fetch_with_cache<C, T, F, Fut>(
    cache: &C,
    key: &str,
    ttl: Duration,
    now: DateTime<Utc>,
    fetch: F,
) -> anyhow::Result<T>
where
    C: RecordCache,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if let Some(entry) = cache.get::<T>(key) {
        let age = now - entry.timestamp;
        if age < ttl {
            tracing::debug!(key, age_secs = age.num_seconds(), "serving from cache");
            return Ok(entry.data);
        }
    }

    let data = fetch().await?;
    let entry = CacheEntry {
        timestamp: now,
        data,
    };
    if let Err(err) = cache.set(key, &entry) {
        tracing::warn!(key, error = %err, "cache write failed");
    }
    Ok(entry.data)
}
