// Gossip Engine - Heartbeat emission, inbound filter chain, hop-limited relay
// Principle: Cheap checks first. Signature verification is bounded by the
// rate of genuinely new sequences, never by raw gossip volume.

use crate::geo::GeoState;
use crate::identity::{self, pow, Identity};
use crate::network::diagnostics::Diagnostics;
use crate::network::protocol::{GossipMessage, Location, MAX_RELAY_HOPS};
use crate::network::registry::PeerRegistry;
use crate::network::swarm::{Connection, Relay, SwarmEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// Grace period after the shutdown LEAVE so last writes can flush
pub const LEAVE_GRACE: Duration = Duration::from_millis(500);

/// Dashboard refresh request; `true` bypasses the broadcast throttle
pub type RefreshSender = mpsc::UnboundedSender<bool>;

/// The gossip state machine. Driven by swarm events and the heartbeat
/// tick; owns the local sequence counter.
pub struct GossipEngine {
    identity: Arc<Identity>,
    registry: Arc<RwLock<PeerRegistry>>,
    diagnostics: Arc<Diagnostics>,
    relay: Arc<dyn Relay>,
    refresh: RefreshSender,
    geo: Arc<GeoState>,
    local_seq: AtomicU64,
}

impl GossipEngine {
    pub fn new(
        identity: Arc<Identity>,
        registry: Arc<RwLock<PeerRegistry>>,
        diagnostics: Arc<Diagnostics>,
        relay: Arc<dyn Relay>,
        refresh: RefreshSender,
        geo: Arc<GeoState>,
    ) -> Self {
        Self {
            identity,
            registry,
            diagnostics,
            relay,
            refresh,
            geo,
            local_seq: AtomicU64::new(0),
        }
    }

    /// Current local sequence number
    pub fn local_seq(&self) -> u64 {
        self.local_seq.load(Ordering::SeqCst)
    }

    /// Location to ride on outbound heartbeats, when opted in
    fn own_location(&self) -> Option<Location> {
        if !self.geo.opted_in() {
            return None;
        }
        self.geo.location()
    }

    /// Dispatch one swarm event
    pub async fn handle_event(&self, event: SwarmEvent) {
        match event {
            SwarmEvent::Connected(conn) => self.hello(&conn),
            SwarmEvent::Message { conn, message } => self.handle_message(&conn, message).await,
            SwarmEvent::Disconnected { peer_id, .. } => self.handle_disconnect(peer_id).await,
        }
    }

    /// Inbound message entry point (already syntactically validated by the
    /// codec)
    pub async fn handle_message(&self, conn: &Arc<Connection>, message: GossipMessage) {
        match message {
            GossipMessage::Heartbeat { .. } => self.handle_heartbeat(conn, message).await,
            GossipMessage::Leave { .. } => self.handle_leave(conn, message).await,
        }
    }

    /// Ordered filter chain: PoW → sequence duplicate → capacity →
    /// signature → admission → relay. Each failure is counted and the
    /// message dropped.
    async fn handle_heartbeat(&self, conn: &Arc<Connection>, message: GossipMessage) {
        let GossipMessage::Heartbeat {
            ref id,
            seq,
            hops,
            nonce,
            ref sig,
            ref loc,
        } = message
        else {
            return;
        };

        self.diagnostics.heartbeat_received();

        // Our own heartbeat flooded back to us
        if id == self.identity.id() {
            return;
        }

        if !pow::verify(id, nonce) {
            trace!("Invalid PoW from {}", &id[..16]);
            self.diagnostics.invalid_pow();
            return;
        }

        let was_new = {
            let mut registry = self.registry.write().await;

            // Duplicate suppression before signature verification
            if let Some(stored) = registry.last_seq(id) {
                if seq <= stored {
                    self.diagnostics.duplicate_seq();
                    return;
                }
            }

            // Capacity is advisory and admission-side only
            if !registry.can_accept(id) {
                debug!("Registry full, refusing new peer {}", &id[..16]);
                return;
            }

            let key = match registry.cached_key(id) {
                Some(key) => key,
                None => match identity::key_from_id(id) {
                    Some(key) => key,
                    None => {
                        self.diagnostics.invalid_sig();
                        return;
                    }
                },
            };

            if !identity::verify_seq_signature(seq, sig, &key) {
                trace!("Invalid signature from {}", &id[..16]);
                self.diagnostics.invalid_sig();
                return;
            }

            registry.add_or_update(id, seq, Some(key), loc.clone())
        };

        // A 0-hop heartbeat came straight from our counterpart: pin the
        // socket to that identity
        if hops == 0 && conn.bind_peer_id(id) {
            debug!("Connection {} bound to peer {}", conn.id(), &id[..16]);
        }

        if was_new {
            self.diagnostics.new_peer_added();
            self.request_refresh(false);
        }

        self.relay_message(&message, conn.id());
    }

    /// LEAVE accelerates convergence; correctness never depends on it
    async fn handle_leave(&self, conn: &Arc<Connection>, message: GossipMessage) {
        let GossipMessage::Leave { ref id, .. } = message else {
            return;
        };

        self.diagnostics.leave_message();

        if id == self.identity.id() {
            return;
        }

        let known = {
            let mut registry = self.registry.write().await;
            registry.remove(id)
        };

        // An unknown LEAVE is dropped without relay: the hop limit plus
        // duplicate-by-absence gives convergence
        if !known {
            return;
        }

        debug!("Peer left: {}", &id[..16]);
        self.request_refresh(false);
        self.relay_message(&message, conn.id());
    }

    /// Forward a message to every connection except its source socket,
    /// with the hop counter advanced. Split-horizon plus the hop bound is
    /// the only loop prevention.
    fn relay_message(&self, message: &GossipMessage, source: u64) {
        if message.hops() >= MAX_RELAY_HOPS {
            return;
        }
        let relayed = message.bump_hops();
        let Ok(frame) = relayed.encode() else {
            return;
        };
        let fanout = self.relay.broadcast(&frame, Some(source));
        if fanout > 0 {
            if matches!(relayed, GossipMessage::Heartbeat { .. }) {
                self.diagnostics.heartbeat_relayed(fanout as u64);
            }
            self.diagnostics
                .bytes_relayed((frame.len() * fanout) as u64);
        }
    }

    /// Heartbeat tick: advance the local sequence, broadcast, sweep stale
    /// peers. Runs every HEARTBEAT_INTERVAL.
    pub async fn tick(&self) {
        let seq = self.local_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let loc = self.own_location();

        {
            let mut registry = self.registry.write().await;
            registry.touch_local(seq, loc.clone());
        }

        if let Ok(frame) = self.build_heartbeat(seq, 0, loc).encode() {
            self.relay.broadcast(&frame, None);
        }

        let removed = {
            let mut registry = self.registry.write().await;
            registry.evict_stale(Instant::now())
        };
        if removed > 0 {
            self.request_refresh(false);
        }
    }

    /// Greet a brand-new direct connection with the current sequence so
    /// the joiner converges without waiting a full tick
    pub fn hello(&self, conn: &Arc<Connection>) {
        let seq = self.local_seq();
        if let Ok(frame) = self.build_heartbeat(seq, 0, self.own_location()).encode() {
            conn.send(frame);
        }
        self.request_refresh(false);
    }

    /// Socket closed: clear the pinned identity, if it was our direct
    /// neighbor
    async fn handle_disconnect(&self, peer_id: Option<String>) {
        let Some(id) = peer_id else {
            return;
        };
        let removed = {
            let mut registry = self.registry.write().await;
            registry.remove(&id)
        };
        if removed {
            debug!("Direct neighbor gone: {}", &id[..16]);
            self.request_refresh(false);
        }
    }

    /// Best-effort LEAVE to every connection on graceful shutdown
    pub fn broadcast_leave(&self) {
        let message = GossipMessage::Leave {
            id: self.identity.id().to_string(),
            hops: 0,
        };
        if let Ok(frame) = message.encode() {
            self.relay.broadcast(&frame, None);
        }
    }

    /// Build a signed heartbeat for the given sequence
    pub fn build_heartbeat(&self, seq: u64, hops: u32, loc: Option<Location>) -> GossipMessage {
        GossipMessage::Heartbeat {
            id: self.identity.id().to_string(),
            seq,
            hops,
            nonce: self.identity.nonce(),
            sig: self.identity.sign_seq(seq),
            loc,
        }
    }

    fn request_refresh(&self, force: bool) {
        let _ = self.refresh.send(force);
    }
}

// =============================================================================
// TESTS
// =============================================================================
