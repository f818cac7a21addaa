// Bootstrap - Three-phase peer discovery
// Principle: Cached peers, then a randomized sweep, then the swarm topic
// as the unconditional backstop; a phase that fails is not an error

use crate::identity::{self, pow, Identity};
use crate::network::feistel::AddressSweep;
use crate::network::peer_cache::{CachedPeer, PeerCache};
use crate::network::protocol::{GossipMessage, LineAssembler};
use crate::network::swarm::Swarm;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Swarm rendezvous topic name; the wire topic is its SHA-256
pub const SWARM_TOPIC_NAME: &str = "hypermind-lklynet-v1";

/// Concurrent probes during the IPv4 sweep
pub const SCAN_CONCURRENCY: usize = 50;

/// Connect timeout per sweep probe
pub const SCAN_CONNECTION_TIMEOUT: Duration = Duration::from_millis(300);

/// Connect timeout per cached-peer attempt
pub const CACHE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a probed endpoint gets to answer the handshake heartbeat
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// The 32-byte rendezvous topic
pub fn swarm_topic() -> [u8; 32] {
    let digest = Sha256::digest(SWARM_TOPIC_NAME.as_bytes());
    digest.into()
}

// =============================================================================
// CONFIG & OUTCOME
// =============================================================================

/// Bootstrap settings, lifted from the environment by the CLI layer
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub peer_cache_enabled: bool,
    pub peer_cache_path: PathBuf,
    pub peer_cache_max_age: Duration,
    pub enable_ipv4_scan: bool,
    pub scan_port: u16,
    pub bootstrap_timeout: Duration,
    /// Debug override: skip phases 1-2, probe this address directly
    pub bootstrap_peer_ip: Option<Ipv4Addr>,
}

/// How the node found its first peer, for logs and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// BOOTSTRAP_PEER_IP override probe succeeded
    DebugPeer,
    /// A cached endpoint answered
    CachedPeer,
    /// The IPv4 sweep validated an endpoint
    ScanHit,
    /// No phase produced a peer; the joined topic is the backstop
    Fallback,
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct Bootstrap {
    config: BootstrapConfig,
    identity: Arc<Identity>,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig, identity: Arc<Identity>) -> Self {
        Self { config, identity }
    }

    /// Run the discovery phases. The topic join happens first so the
    /// backstop is live while the phases run; the first phase to produce
    /// a connection short-circuits the rest.
    pub async fn run(&self, swarm: &Swarm) -> BootstrapOutcome {
        swarm.join(swarm_topic());

        let deadline = Instant::now() + self.config.bootstrap_timeout;

        if let Some(ip) = self.config.bootstrap_peer_ip {
            let target = SocketAddr::new(IpAddr::V4(ip), self.config.scan_port);
            info!("Bootstrap override: probing {}", target);
            match handshake_probe(target, &self.identity).await {
                Some(stream) => {
                    swarm.adopt(stream).await;
                    return BootstrapOutcome::DebugPeer;
                }
                None => {
                    warn!("Bootstrap override peer {} did not validate", target);
                    return BootstrapOutcome::Fallback;
                }
            }
        }

        if self.config.peer_cache_enabled {
            if let Some(outcome) = self.try_cached_peers(swarm, deadline).await {
                return outcome;
            }
        }

        if self.config.enable_ipv4_scan {
            if let Some(outcome) = self.sweep_ipv4(swarm, deadline).await {
                return outcome;
            }
        }

        info!("Bootstrap phases exhausted; waiting on swarm topic");
        BootstrapOutcome::Fallback
    }

    /// Phase 1: cached endpoints, tried in file order with a short
    /// connect timeout each; the first connect wins.
    async fn try_cached_peers(
        &self,
        swarm: &Swarm,
        deadline: Instant,
    ) -> Option<BootstrapOutcome> {
        let cache = PeerCache::new(
            self.config.peer_cache_path.clone(),
            self.config.peer_cache_max_age,
        );
        let peers = cache.load();
        if peers.is_empty() {
            debug!("Peer cache empty");
            return None;
        }
        info!("Trying {} cached peer(s)", peers.len());

        for peer in peers {
            if Instant::now() >= deadline {
                return None;
            }
            if peer.id == self.identity.id() {
                continue;
            }
            let Some(addr) = peer.socket_addr() else {
                continue;
            };
            match swarm.dial(addr, CACHE_CONNECT_TIMEOUT).await {
                Ok(_) => {
                    info!("Connected to cached peer {}", addr);
                    return Some(BootstrapOutcome::CachedPeer);
                }
                Err(e) => debug!("Cached peer {} unreachable: {}", addr, e),
            }
        }
        None
    }

    /// Phase 2: Feistel-permuted sweep with a bounded probe fan-out.
    /// Outstanding probes are aborted on first success or deadline.
    async fn sweep_ipv4(&self, swarm: &Swarm, deadline: Instant) -> Option<BootstrapOutcome> {
        info!("Starting IPv4 sweep on port {}", self.config.scan_port);
        let seed: [u8; 32] = rand::random();
        let mut sweep = AddressSweep::new(&seed);
        let mut probes: JoinSet<Option<TcpStream>> = JoinSet::new();
        let scan_port = self.config.scan_port;

        loop {
            while probes.len() < SCAN_CONCURRENCY {
                let Some(addr) = sweep.next_address() else {
                    break;
                };
                let target = SocketAddr::new(IpAddr::V4(addr), scan_port);
                let identity = self.identity.clone();
                probes.spawn(async move { handshake_probe(target, &identity).await });
            }
            if probes.is_empty() {
                return None;
            }

            tokio::select! {
                joined = probes.join_next() => match joined {
                    Some(Ok(Some(stream))) => {
                        probes.abort_all();
                        if let Ok(peer) = stream.peer_addr() {
                            info!("Sweep validated peer {}", peer);
                        }
                        swarm.adopt(stream).await;
                        return Some(BootstrapOutcome::ScanHit);
                    }
                    Some(_) => continue,
                    None => return None,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    info!("Bootstrap deadline reached, stopping sweep");
                    probes.abort_all();
                    return None;
                }
            }
        }
    }
}

// =============================================================================
// HANDSHAKE PROBE
// =============================================================================

/// Protocol-level probe: connect, send one signed `seq:0` heartbeat, and
/// require a well-formed heartbeat back whose PoW and signature verify.
/// Returns the open stream on success so the caller can adopt it.
pub async fn handshake_probe(addr: SocketAddr, identity: &Identity) -> Option<TcpStream> {
    let mut stream = tokio::time::timeout(SCAN_CONNECTION_TIMEOUT, TcpStream::connect(addr))
        .await
        .ok()?
        .ok()?;

    let hello = GossipMessage::Heartbeat {
        id: identity.id().to_string(),
        seq: 0,
        hops: 0,
        nonce: identity.nonce(),
        sig: identity.sign_seq(0),
        loc: None,
    };
    let frame = hello.encode().ok()?;
    stream.write_all(frame.as_bytes()).await.ok()?;

    let valid = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_valid_heartbeat(&mut stream, identity))
        .await
        .ok()??;
    if valid {
        Some(stream)
    } else {
        None
    }
}

/// Read until one complete line arrives and judge it. Any outcome other
/// than a verifiable heartbeat from a different identity fails the probe.
async fn read_valid_heartbeat(stream: &mut TcpStream, identity: &Identity) -> Option<bool> {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return Some(false);
        }
        let (lines, _) = assembler.push(&buf[..n]);
        if let Some(line) = lines.into_iter().next() {
            let Ok(GossipMessage::Heartbeat {
                id, seq, nonce, sig, ..
            }) = GossipMessage::decode(&line)
            else {
                return Some(false);
            };
            if id == identity.id() || !pow::verify(&id, nonce) {
                return Some(false);
            }
            let Some(key) = identity::key_from_id(&id) else {
                return Some(false);
            };
            return Some(identity::verify_seq_signature(seq, &sig, &key));
        }
    }
}

// =============================================================================
// CACHE SNAPSHOT
// =============================================================================

/// Build cache entries from the currently bound direct neighbors. The
/// advertised port is the scan port every node listens on, not the
/// ephemeral socket port.
pub fn cache_snapshot(swarm: &Swarm, scan_port: u16) -> Vec<CachedPeer> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    swarm
        .connections()
        .iter()
        .filter_map(|conn| {
            let id = conn.peer_id()?;
            Some(CachedPeer {
                ip: conn.addr().ip().to_string(),
                port: scan_port,
                id,
                last_seen: now,
            })
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
