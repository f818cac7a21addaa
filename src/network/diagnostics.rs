// Diagnostics - Protocol health counters, windowed for the dashboard
// Note: counters reset every window (10 s) while the dashboard broadcasts
// every second, so displayed values are per-window rates that zero on roll

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Counter window length
pub const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(10);

/// Last-window counter values, as served to the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub heartbeats_received: u64,
    pub heartbeats_relayed: u64,
    #[serde(rename = "invalidPoW")]
    pub invalid_pow: u64,
    pub duplicate_seq: u64,
    pub invalid_sig: u64,
    pub invalid_format: u64,
    pub new_peers_added: u64,
    pub leave_messages: u64,
    pub bytes_received: u64,
    pub bytes_relayed: u64,
}

/// Process-wide counters. Increments are lock-free; the window roll and
/// dashboard reads go through the snapshot lock.
#[derive(Debug, Default)]
pub struct Diagnostics {
    heartbeats_received: AtomicU64,
    heartbeats_relayed: AtomicU64,
    invalid_pow: AtomicU64,
    duplicate_seq: AtomicU64,
    invalid_sig: AtomicU64,
    invalid_format: AtomicU64,
    new_peers_added: AtomicU64,
    leave_messages: AtomicU64,
    bytes_received: AtomicU64,
    bytes_relayed: AtomicU64,

    last_window: RwLock<DiagnosticsSnapshot>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_relayed(&self, fanout: u64) {
        self.heartbeats_relayed.fetch_add(fanout, Ordering::Relaxed);
    }

    pub fn invalid_pow(&self) {
        self.invalid_pow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_seq(&self) {
        self.duplicate_seq.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_sig(&self) {
        self.invalid_sig.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_format(&self, count: u64) {
        self.invalid_format.fetch_add(count, Ordering::Relaxed);
    }

    pub fn new_peer_added(&self) {
        self.new_peers_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn leave_message(&self) {
        self.leave_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_relayed(&self, n: u64) {
        self.bytes_relayed.fetch_add(n, Ordering::Relaxed);
    }

    /// Counter values accumulated in the window so far
    pub fn current(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            heartbeats_relayed: self.heartbeats_relayed.load(Ordering::Relaxed),
            invalid_pow: self.invalid_pow.load(Ordering::Relaxed),
            duplicate_seq: self.duplicate_seq.load(Ordering::Relaxed),
            invalid_sig: self.invalid_sig.load(Ordering::Relaxed),
            invalid_format: self.invalid_format.load(Ordering::Relaxed),
            new_peers_added: self.new_peers_added.load(Ordering::Relaxed),
            leave_messages: self.leave_messages.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
        }
    }

    /// Close the window: zero the counters and publish their final values
    /// as the last-window snapshot.
    pub fn roll_window(&self) -> DiagnosticsSnapshot {
        let snapshot = DiagnosticsSnapshot {
            heartbeats_received: self.heartbeats_received.swap(0, Ordering::Relaxed),
            heartbeats_relayed: self.heartbeats_relayed.swap(0, Ordering::Relaxed),
            invalid_pow: self.invalid_pow.swap(0, Ordering::Relaxed),
            duplicate_seq: self.duplicate_seq.swap(0, Ordering::Relaxed),
            invalid_sig: self.invalid_sig.swap(0, Ordering::Relaxed),
            invalid_format: self.invalid_format.swap(0, Ordering::Relaxed),
            new_peers_added: self.new_peers_added.swap(0, Ordering::Relaxed),
            leave_messages: self.leave_messages.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.swap(0, Ordering::Relaxed),
        };
        if let Ok(mut last) = self.last_window.write() {
            *last = snapshot.clone();
        }
        snapshot
    }

    /// Values of the most recently completed window
    pub fn last_window(&self) -> DiagnosticsSnapshot {
        self.last_window
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let diag = Diagnostics::new();
        diag.heartbeat_received();
        diag.heartbeat_received();
        diag.invalid_pow();
        diag.bytes_received(100);

        let snap = diag.current();
        assert_eq!(snap.heartbeats_received, 2);
        assert_eq!(snap.invalid_pow, 1);
        assert_eq!(snap.bytes_received, 100);
    }

    #[test]
    fn test_roll_window_resets_and_publishes() {
        let diag = Diagnostics::new();
        diag.heartbeat_received();
        diag.duplicate_seq();

        let rolled = diag.roll_window();
        assert_eq!(rolled.heartbeats_received, 1);
        assert_eq!(rolled.duplicate_seq, 1);

        // Counters are zeroed, the last window holds the rolled values
        assert_eq!(diag.current(), DiagnosticsSnapshot::default());
        assert_eq!(diag.last_window(), rolled);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_string(&DiagnosticsSnapshot::default()).unwrap();
        assert!(json.contains("heartbeatsReceived"));
        assert!(json.contains("invalidPoW"));
        assert!(json.contains("duplicateSeq"));
        assert!(json.contains("bytesRelayed"));
    }
}
