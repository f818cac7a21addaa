// Peer Cache - Versioned JSON file of recently seen peer endpoints
// Principle: A warm-start hint, never a source of truth; stale or
// malformed contents degrade to an empty cache

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Cache file schema version
pub const PEER_CACHE_VERSION: u32 = 1;

/// At most this many peers are kept, most recent first
pub const MAX_CACHED_PEERS: usize = 100;

/// Default maximum entry age (24 h), overridable via config
pub const DEFAULT_PEER_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// One cached peer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPeer {
    pub ip: String,
    pub port: u16,
    pub id: String,
    /// Unix seconds of the last accepted heartbeat
    #[serde(rename = "lastSeen")]
    pub last_seen: u64,
}

impl CachedPeer {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.ip.parse().ok()?;
        Some(SocketAddr::new(ip, self.port))
    }
}

/// On-disk shape
#[derive(Debug, Serialize, Deserialize)]
struct PeerCacheFile {
    version: u32,
    timestamp: u64,
    peers: Vec<CachedPeer>,
}

/// Reader/writer for the cache file. Writes are overwrite-in-full.
pub struct PeerCache {
    path: PathBuf,
    max_age: Duration,
}

impl PeerCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached peers, pruning entries older than the max age.
    /// A missing, unreadable, malformed, or wrong-version file is an
    /// empty cache, not an error.
    pub fn load(&self) -> Vec<CachedPeer> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let file: PeerCacheFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring malformed peer cache {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        if file.version != PEER_CACHE_VERSION {
            warn!(
                "Ignoring peer cache with unknown version {} (expected {})",
                file.version, PEER_CACHE_VERSION
            );
            return Vec::new();
        }

        let now = Utc::now().timestamp().max(0) as u64;
        let cutoff = now.saturating_sub(self.max_age.as_secs());
        let mut peers: Vec<CachedPeer> = file
            .peers
            .into_iter()
            .filter(|p| p.last_seen >= cutoff)
            .collect();
        peers.truncate(MAX_CACHED_PEERS);

        debug!("Loaded {} cached peer(s)", peers.len());
        peers
    }

    /// Persist peers, keeping only the MAX_CACHED_PEERS most recent
    pub fn store(&self, mut peers: Vec<CachedPeer>) -> std::io::Result<()> {
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers.truncate(MAX_CACHED_PEERS);

        let file = PeerCacheFile {
            version: PEER_CACHE_VERSION,
            timestamp: Utc::now().timestamp().max(0) as u64,
            peers,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, json)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(ip: &str, last_seen: u64) -> CachedPeer {
        CachedPeer {
            ip: ip.to_string(),
            port: 42424,
            id: "ab".repeat(44),
            last_seen,
        }
    }

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    #[test]
    fn test_store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PeerCache::new(dir.path().join("peers.json"), DEFAULT_PEER_CACHE_MAX_AGE);

        let peers = vec![peer("1.2.3.4", now()), peer("5.6.7.8", now() - 60)];
        cache.store(peers.clone()).unwrap();

        let loaded = cache.load();
        assert_eq!(loaded, peers);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PeerCache::new(dir.path().join("absent.json"), DEFAULT_PEER_CACHE_MAX_AGE);
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        std::fs::write(&path, "{not json").unwrap();
        let cache = PeerCache::new(path, DEFAULT_PEER_CACHE_MAX_AGE);
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_wrong_version_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        std::fs::write(
            &path,
            format!(
                "{{\"version\":2,\"timestamp\":{},\"peers\":[]}}",
                now()
            ),
        )
        .unwrap();
        let cache = PeerCache::new(path, DEFAULT_PEER_CACHE_MAX_AGE);
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_old_entries_pruned_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PeerCache::new(dir.path().join("peers.json"), Duration::from_secs(3600));

        cache
            .store(vec![peer("1.1.1.1", now()), peer("2.2.2.2", now() - 7200)])
            .unwrap();

        let loaded = cache.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].ip, "1.1.1.1");
    }

    #[test]
    fn test_store_caps_at_most_recent_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PeerCache::new(dir.path().join("peers.json"), DEFAULT_PEER_CACHE_MAX_AGE);

        let base = now();
        let peers: Vec<CachedPeer> = (0..150)
            .map(|i| peer(&format!("10.0.{}.{}", i / 256, i % 256), base - i))
            .collect();
        cache.store(peers).unwrap();

        let loaded = cache.load();
        assert_eq!(loaded.len(), MAX_CACHED_PEERS);
        // The newest entry survived the cut
        assert_eq!(loaded[0].last_seen, base);
    }

    #[test]
    fn test_store_overwrites_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PeerCache::new(dir.path().join("peers.json"), DEFAULT_PEER_CACHE_MAX_AGE);

        cache.store(vec![peer("1.1.1.1", now())]).unwrap();
        cache.store(vec![peer("9.9.9.9", now())]).unwrap();

        let loaded = cache.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].ip, "9.9.9.9");
    }

    #[test]
    fn test_socket_addr_parsing() {
        assert!(peer("1.2.3.4", 0).socket_addr().is_some());
        assert!(peer("not-an-ip", 0).socket_addr().is_none());
    }
}
