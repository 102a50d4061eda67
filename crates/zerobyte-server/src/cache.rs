//! In-process TTL cache for engine results
//!
//! Values are stored as JSON text with an absolute expiration. Reads of
//! expired or unparsable entries are misses; expired entries are dropped on
//! read.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Default entry lifetime
pub const ONE_DAY: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Key/value cache with per-entry expiration
pub struct Cache {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl Cache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            default_ttl,
        }
    }

    /// Store `value` for the default lifetime
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value`, replacing any existing entry
    pub fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let value = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return;
            }
        };

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.entries
            .write()
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Utc::now();
        let entry = self.entries.read().get(key).cloned()?;

        if entry.is_expired(now) {
            let mut entries = self.entries.write();
            // A concurrent set may have replaced it
            if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
                entries.remove(key);
            }
            return None;
        }

        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Ignoring unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub fn del(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Remove every key starting with `prefix`, returning how many were dropped
    pub fn del_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let keys: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &keys {
            entries.remove(key);
        }

        if !keys.is_empty() {
            debug!("Invalidated {} cache entries under {}", keys.len(), prefix);
        }
        keys.len()
    }

    /// Live entries under `prefix`; malformed entries are skipped
    pub fn get_by_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Vec<(String, T)> {
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut results = Vec::new();

        {
            let entries = self.entries.read();
            for (key, entry) in entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
            {
                if entry.is_expired(now) {
                    expired.push(key.clone());
                    continue;
                }
                if let Ok(value) = serde_json::from_str(&entry.value) {
                    results.push((key.clone(), value));
                }
            }
        }

        if !expired.is_empty() {
            let mut entries = self.entries.write();
            for key in expired {
                if entries.get(&key).map(|e| e.is_expired(now)).unwrap_or(false) {
                    entries.remove(&key);
                }
            }
        }

        results
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop all expired entries
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(ONE_DAY)
    }
}

/// Key scheme shared by everything that reads or invalidates the cache
pub mod keys {
    /// Prefix covering every entry of a repository
    pub fn repository(repository_id: &str) -> String {
        format!("repo:{}:", repository_id)
    }

    pub fn stats(repository_id: &str) -> String {
        format!("repo:{}:stats", repository_id)
    }

    pub fn snapshots(repository_id: &str, backup_id: Option<&str>) -> String {
        format!("repo:{}:snapshots:{}", repository_id, backup_id.unwrap_or("all"))
    }

    pub fn ls(
        repository_id: &str,
        snapshot_id: &str,
        path: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> String {
        format!(
            "repo:{}:ls:{}:{}:{}:{}",
            repository_id,
            snapshot_id,
            path.unwrap_or("root"),
            offset,
            limit
        )
    }

    pub fn retention(repository_id: &str, schedule_id: &str) -> String {
        format!("repo:{}:retention:{}", repository_id, schedule_id)
    }

    pub fn updates(version: &str) -> String {
        format!("system:updates:{}", version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Stats {
        total_size: u64,
    }

    #[test]
    fn test_set_and_get() {
        let cache = Cache::default();
        cache.set("repo:r1:stats", &Stats { total_size: 42 });

        let stats: Option<Stats> = cache.get("repo:r1:stats");
        assert_eq!(stats, Some(Stats { total_size: 42 }));
        assert!(cache.get::<Stats>("repo:r2:stats").is_none());
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = Cache::default();
        cache.set_with_ttl("repo:r1:stats", &Stats { total_size: 1 }, Duration::ZERO);

        assert!(cache.get::<Stats>("repo:r1:stats").is_none());
        // The expired row was dropped on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unparsable_entry_is_a_miss() {
        let cache = Cache::default();
        cache.set("repo:r1:stats", "not stats");
        assert!(cache.get::<Stats>("repo:r1:stats").is_none());
        assert_eq!(cache.get::<String>("repo:r1:stats").as_deref(), Some("not stats"));
    }

    #[test]
    fn test_prefix_invalidation() {
        let cache = Cache::default();
        cache.set(&keys::stats("r1"), &1);
        cache.set(&keys::snapshots("r1", None), &2);
        cache.set(&keys::ls("r1", "s1", None, 0, 100), &3);
        cache.set(&keys::stats("r10"), &4);

        assert_eq!(cache.del_by_prefix(&keys::repository("r1")), 3);
        assert!(cache.get::<u32>(&keys::stats("r1")).is_none());
        assert_eq!(cache.get::<u32>(&keys::stats("r10")), Some(4));
    }

    #[test]
    fn test_get_by_prefix() {
        let cache = Cache::default();
        cache.set("repo:a:snapshots:all", &1);
        cache.set("repo:a:stats", &2);
        cache.set("repo:a:bad", "x");
        cache.set_with_ttl("repo:a:old", &3, Duration::ZERO);
        cache.set("repo:b:stats", &4);

        let found: Vec<(String, u32)> = cache.get_by_prefix("repo:a:");
        assert_eq!(
            found,
            vec![("repo:a:snapshots:all".to_string(), 1), ("repo:a:stats".to_string(), 2)]
        );
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_purge_and_clear() {
        let cache = Cache::default();
        cache.set_with_ttl("a", &1, Duration::ZERO);
        cache.set("b", &2);
        assert_eq!(cache.purge_expired(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_scheme() {
        assert_eq!(keys::repository("r"), "repo:r:");
        assert_eq!(keys::snapshots("r", Some("b1")), "repo:r:snapshots:b1");
        assert_eq!(keys::ls("r", "s", Some("/docs"), 10, 50), "repo:r:ls:s:/docs:10:50");
        assert_eq!(keys::ls("r", "s", None, 0, 100), "repo:r:ls:s:root:0:100");
        assert_eq!(keys::retention("r", "sch"), "repo:r:retention:sch");
        assert_eq!(keys::updates("v1.0.0"), "system:updates:v1.0.0");
    }
}
