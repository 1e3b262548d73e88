use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cached response. `expires` is absolute wall-clock seconds; `0` means
/// session-only (never auto-expires, only manual purge). The body lives
/// either inline or in a blob file named by `blob_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub expires: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
}

/// HTTP cache keyed by `scheme://host:port/path?search`. With a cache
/// directory configured, bodies are written as `cache/<uuid>` blobs and the
/// index is persisted to `__cache.json`; without one everything stays
/// inline and in memory.
#[derive(Debug, Default)]
pub struct HttpCache {
    entries: HashMap<String, CacheEntry>,
    dir: Option<PathBuf>,
}

const INDEX_FILE: &str = "__cache.json";
const BLOB_DIR: &str = "cache";

impl HttpCache {
    pub fn new(dir: Option<PathBuf>) -> Self {
        let mut cache = HttpCache { entries: HashMap::new(), dir };
        cache.load_index();
        cache
    }

    fn load_index(&mut self) {
        let Some(dir) = &self.dir else { return };
        let index = dir.join(INDEX_FILE);
        if !index.is_file() {
            return;
        }
        match fs::read_to_string(&index) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => self.entries = entries,
                Err(e) => {
                    warn!("dropping malformed cache index {}: {e}", index.display());
                    self.entries = HashMap::new();
                }
            },
            Err(e) => warn!("failed to read cache index {}: {e}", index.display()),
        }
    }

    fn persist_index(&self) {
        let Some(dir) = &self.dir else { return };
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("failed to create cache dir {}: {e}", dir.display());
            return;
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => {
                if let Err(e) = fs::write(dir.join(INDEX_FILE), json) {
                    warn!("failed to write cache index: {e}");
                }
            }
            Err(e) => warn!("failed to serialize cache index: {e}"),
        }
    }

    fn blob_path(&self, blob_id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(BLOB_DIR).join(blob_id))
    }

    fn remove_entry(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            if let Some(blob_id) = entry.blob_id {
                if let Some(path) = self.blob_path(&blob_id) {
                    let _ = fs::remove_file(path);
                }
            }
            self.persist_index();
        }
    }

    /// Serves `key` if present and fresh at `now`. Expired entries are
    /// deleted together with their blobs; entries whose blob went missing
    /// are dropped and treated as a miss.
    pub fn lookup(&mut self, key: &str, now: u64) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.expires > 0 && now >= entry.expires {
            self.remove_entry(key);
            return None;
        }
        if let Some(content) = &entry.content {
            info!("cache hit {key}");
            return Some(content.clone());
        }
        if let Some(blob_id) = entry.blob_id.clone() {
            let path = self.blob_path(&blob_id)?;
            match fs::read(&path) {
                Ok(bytes) => {
                    info!("cache hit {key} (blob {blob_id})");
                    return Some(String::from_utf8_lossy(&bytes).into_owned());
                }
                Err(e) => {
                    warn!("cache blob {} unreadable: {e}", path.display());
                    self.remove_entry(key);
                    return None;
                }
            }
        }
        // An entry with neither content nor blob is corrupt.
        warn!("dropping empty cache entry {key}");
        self.remove_entry(key);
        None
    }

    /// Stores a response body under `key` with the given absolute expiry.
    pub fn store(&mut self, key: &str, body: &[u8], expires: u64) {
        let mut entry = CacheEntry { expires, content: None, blob_id: None };
        if let Some(dir) = &self.dir {
            let blob_id = Uuid::new_v4().to_string();
            let blob_dir = dir.join(BLOB_DIR);
            if let Err(e) = fs::create_dir_all(&blob_dir) {
                warn!("failed to create blob dir {}: {e}", blob_dir.display());
                return;
            }
            if let Err(e) = fs::write(blob_dir.join(&blob_id), body) {
                warn!("failed to write cache blob: {e}");
                return;
            }
            entry.blob_id = Some(blob_id);
        } else {
            entry.content = Some(String::from_utf8_lossy(body).into_owned());
        }
        self.entries.insert(key.to_string(), entry);
        self.persist_index();
    }

    pub fn purge(&mut self, key: &str) {
        self.remove_entry(key);
    }
}

/// Decides whether (and until when) a 200 GET response may be stored, given
/// its `Cache-Control` header. `no-store` and unrecognized directives skip
/// caching; `max-age=N` yields an absolute expiry of `now + N` seconds; no
/// header at all stores a session-only entry.
pub fn cache_expiry(cache_control: Option<&str>, now: u64) -> Option<u64> {
    let Some(cc) = cache_control else { return Some(0) };
    if cc.contains("no-store") {
        return None;
    }
    if let Some(pos) = cc.find("max-age") {
        let rest = &cc[pos + "max-age".len()..];
        let n = rest.strip_prefix('=')?.trim();
        let n: u64 = n
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok()?;
        return Some(now + n);
    }
    // Directive we do not understand: better not to cache.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("skiff-cache-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn inline_store_and_lookup() {
        let mut cache = HttpCache::new(None);
        cache.store("k", b"body", 0);
        assert_eq!(cache.lookup("k", 1_000).as_deref(), Some("body"));
    }

    #[test]
    fn expiry_at_exact_second() {
        // max-age=N stored at t0 must miss at exactly t0+N.
        let mut cache = HttpCache::new(None);
        let expires = cache_expiry(Some("max-age=60"), 1_000).unwrap();
        assert_eq!(expires, 1_060);
        cache.store("k", b"body", expires);
        assert!(cache.lookup("k", 1_059).is_some());
        assert!(cache.lookup("k", 1_060).is_none());
        // The expired entry is gone for good, even for earlier clocks.
        assert!(cache.lookup("k", 0).is_none());
    }

    #[test]
    fn session_entry_never_auto_expires() {
        let mut cache = HttpCache::new(None);
        cache.store("k", b"body", 0);
        assert!(cache.lookup("k", u64::MAX).is_some());
        cache.purge("k");
        assert!(cache.lookup("k", 0).is_none());
    }

    #[test]
    fn blob_round_trip_and_removal() {
        let dir = temp_cache_dir();
        let mut cache = HttpCache::new(Some(dir.clone()));
        cache.store("k", b"blob body", 500);
        let blobs: Vec<_> = fs::read_dir(dir.join("cache")).unwrap().collect();
        assert_eq!(blobs.len(), 1);
        assert_eq!(cache.lookup("k", 100).as_deref(), Some("blob body"));
        assert!(cache.lookup("k", 500).is_none());
        let blobs: Vec<_> = fs::read_dir(dir.join("cache")).unwrap().collect();
        assert!(blobs.is_empty(), "expired blob should be deleted");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn index_survives_reload() {
        let dir = temp_cache_dir();
        {
            let mut cache = HttpCache::new(Some(dir.clone()));
            cache.store("k", b"persisted", 0);
        }
        let mut cache = HttpCache::new(Some(dir.clone()));
        assert_eq!(cache.lookup("k", 1).as_deref(), Some("persisted"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn malformed_index_tolerated() {
        let dir = temp_cache_dir();
        fs::write(dir.join(INDEX_FILE), "{not json").unwrap();
        let mut cache = HttpCache::new(Some(dir.clone()));
        assert!(cache.lookup("k", 0).is_none());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn cache_control_policy() {
        assert_eq!(cache_expiry(None, 10), Some(0));
        assert_eq!(cache_expiry(Some("max-age=5"), 10), Some(15));
        assert_eq!(cache_expiry(Some("no-store"), 10), None);
        assert_eq!(cache_expiry(Some("private"), 10), None);
        assert_eq!(cache_expiry(Some("max-age=oops"), 10), None);
    }
}
