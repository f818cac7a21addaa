// Peer Registry - Bounded map of live peers with sequence tracking
// Principle: Liveness timers self-regulate the set; capacity is a ceiling,
// not an LRU

use crate::network::protocol::Location;
use ed25519_dalek::VerifyingKey;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default ceiling on registry cardinality
pub const DEFAULT_MAX_PEERS: usize = 1_000_000;

/// A peer is evicted when no heartbeat was accepted for this long
pub const PEER_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between self-heartbeats (stale sweep runs on the same tick)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// PEER RECORD
// =============================================================================

/// State kept per known peer
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Last accepted monotonic sequence number
    pub seq: u64,

    /// When the last heartbeat was accepted
    pub last_seen: Instant,

    /// Verified public key, cached on first admission
    pub key: Option<VerifyingKey>,

    /// Self-reported location, if the peer opted in
    pub loc: Option<Location>,
}

// =============================================================================
// PEER REGISTRY
// =============================================================================

/// In-memory map of live peers keyed by wire id. The local node's own
/// record is always present; a peer absent from the map is
/// indistinguishable from "never seen".
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
    local_id: String,
    max_peers: usize,
}

impl PeerRegistry {
    /// Create a registry seeded with the local node's record at seq 0
    pub fn new(local_id: String, max_peers: usize) -> Self {
        let mut peers = HashMap::new();
        peers.insert(
            local_id.clone(),
            PeerRecord {
                seq: 0,
                last_seen: Instant::now(),
                key: None,
                loc: None,
            },
        );
        Self {
            peers,
            local_id,
            max_peers,
        }
    }

    /// Insert or update a peer record. The caller has already verified
    /// sequence monotonicity and the signature. Returns true when the id
    /// was not present before.
    pub fn add_or_update(
        &mut self,
        id: &str,
        seq: u64,
        key: Option<VerifyingKey>,
        loc: Option<Location>,
    ) -> bool {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.seq = seq;
                record.last_seen = Instant::now();
                if record.key.is_none() {
                    record.key = key;
                }
                if loc.is_some() {
                    record.loc = loc;
                }
                false
            }
            None => {
                self.peers.insert(
                    id.to_string(),
                    PeerRecord {
                        seq,
                        last_seen: Instant::now(),
                        key,
                        loc,
                    },
                );
                debug!("Peer admitted: {} (seq {})", &id[..16.min(id.len())], seq);
                true
            }
        }
    }

    /// Advisory capacity check, consulted before signature verification:
    /// known ids are always accepted, new ids only below the ceiling.
    pub fn can_accept(&self, id: &str) -> bool {
        self.peers.contains_key(id) || self.peers.len() < self.max_peers
    }

    /// Last accepted sequence for a peer, if known
    pub fn last_seq(&self, id: &str) -> Option<u64> {
        self.peers.get(id).map(|r| r.seq)
    }

    /// Cached public key for a peer, if already admitted
    pub fn cached_key(&self, id: &str) -> Option<VerifyingKey> {
        self.peers.get(id).and_then(|r| r.key)
    }

    /// Remove every record whose last accepted heartbeat is older than
    /// PEER_TIMEOUT at `now`. The local record is never evicted. Returns
    /// the number of peers removed.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let local_id = self.local_id.clone();
        let before = self.peers.len();
        self.peers.retain(|id, record| {
            *id == local_id
                || now.saturating_duration_since(record.last_seen) <= PEER_TIMEOUT
        });
        let removed = before - self.peers.len();
        if removed > 0 {
            debug!("Evicted {} stale peer(s)", removed);
        }
        removed
    }

    /// Idempotent delete; the local record cannot be removed
    pub fn remove(&mut self, id: &str) -> bool {
        if id == self.local_id {
            return false;
        }
        self.peers.remove(id).is_some()
    }

    /// True when the id has a record
    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    /// Current cardinality, the "Active Nodes" count
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Refresh the local record after a self-heartbeat
    pub fn touch_local(&mut self, seq: u64, loc: Option<Location>) {
        if let Some(record) = self.peers.get_mut(&self.local_id) {
            record.seq = seq;
            record.last_seen = Instant::now();
            if loc.is_some() {
                record.loc = loc;
            }
        }
    }

    /// Attach or clear the local record's location without touching its
    /// sequence (opt-in happens between ticks)
    pub fn set_local_location(&mut self, loc: Option<Location>) {
        if let Some(record) = self.peers.get_mut(&self.local_id) {
            record.loc = loc;
        }
    }

    /// Locations of every peer that shared one
    pub fn locations(&self) -> Vec<Location> {
        self.peers.values().filter_map(|r| r.loc.clone()).collect()
    }

    /// Local node id
    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

// =============================================================================
// TESTS
// =============================================================================
