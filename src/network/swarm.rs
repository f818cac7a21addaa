// Swarm Adapter - Connection lifecycle over TCP duplex streams
// Principle: The adapter owns the sockets; gossip logic never touches I/O.
// This is the seam a rendezvous DHT substrate plugs into: it produces the
// same duplex streams the listener and dialer produce here.

use crate::network::diagnostics::Diagnostics;
use crate::network::protocol::{GossipMessage, LineAssembler};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outbound frames queued per connection before drops begin. Writes are
/// fire-and-forget: a slow socket loses messages instead of stalling peers.
const OUTBOUND_QUEUE: usize = 64;

/// Connection identifier, unique per process
pub type ConnectionId = u64;

// =============================================================================
// CONNECTION
// =============================================================================

/// One duplex byte stream to a directly connected neighbor
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    outbound: mpsc::Sender<String>,
    /// Identity of the immediate counterpart, bound once on the first
    /// 0-hop HEARTBEAT received on this socket
    peer_id: Mutex<Option<String>>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a frame for writing. Fire-and-forget: a full queue or closed
    /// writer drops the frame silently.
    pub fn send(&self, frame: String) {
        let _ = self.outbound.try_send(frame);
    }

    /// Peer id pinned to this socket, if any
    pub fn peer_id(&self) -> Option<String> {
        self.peer_id.lock().ok().and_then(|g| g.clone())
    }

    /// Bind the socket to a peer identity. Only the first bind takes
    /// effect; returns true when this call did the binding.
    pub fn bind_peer_id(&self, id: &str) -> bool {
        match self.peer_id.lock() {
            Ok(mut guard) => {
                if guard.is_none() {
                    *guard = Some(id.to_string());
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }

    /// Standalone connection with a dangling writer, for driving the
    /// gossip engine without sockets.
    #[cfg(test)]
    pub fn detached(id: ConnectionId) -> Arc<Self> {
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);
        Arc::new(Self {
            id,
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            outbound: tx,
            peer_id: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("peer_id", &self.peer_id())
            .finish()
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Events dispatched to the node's event loop. Per-connection ordering is
/// FIFO; nothing is promised across connections.
#[derive(Debug)]
pub enum SwarmEvent {
    /// A new direct connection is up (inbound or dialed)
    Connected(Arc<Connection>),

    /// A validated message arrived on a connection
    Message {
        conn: Arc<Connection>,
        message: GossipMessage,
    },

    /// A connection closed; carries the pinned peer id, if one was bound
    Disconnected {
        conn_id: ConnectionId,
        peer_id: Option<String>,
    },
}

// =============================================================================
// RELAY
// =============================================================================

/// Broadcast seam between the gossip engine and the connection set.
/// The engine computes the outbound frame once; the relay writes it to
/// every connection except an optional source socket (split-horizon).
pub trait Relay: Send + Sync {
    /// Returns the fan-out (number of connections written to)
    fn broadcast(&self, frame: &str, except: Option<ConnectionId>) -> usize;

    /// Number of currently open direct connections
    fn direct_count(&self) -> usize;
}

// =============================================================================
// SWARM
// =============================================================================

/// Connection manager: TCP listener, dialer, per-connection reader and
/// writer tasks, and the connection snapshot.
pub struct Swarm {
    inner: Arc<SwarmInner>,
}

struct SwarmInner {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_conn_id: AtomicU64,
    events: mpsc::Sender<SwarmEvent>,
    diagnostics: Arc<Diagnostics>,
    topic: Mutex<Option<[u8; 32]>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Swarm {
    pub fn new(events: mpsc::Sender<SwarmEvent>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            inner: Arc::new(SwarmInner {
                connections: RwLock::new(HashMap::new()),
                next_conn_id: AtomicU64::new(1),
                events,
                diagnostics,
                topic: Mutex::new(None),
                accept_task: Mutex::new(None),
            }),
        }
    }

    /// Bind the listener and start accepting inbound connections.
    /// Returns the bound address (useful when port 0 was requested).
    pub async fn start(&self, listen_port: u16) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", listen_port)).await?;
        let addr = listener.local_addr()?;
        info!("Swarm listening on {}", addr);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!("Inbound connection from {}", remote);
                        SwarmInner::attach(&inner, stream).await;
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        if let Ok(mut slot) = self.inner.accept_task.lock() {
            *slot = Some(task);
        }

        Ok(addr)
    }

    /// Announce interest in a swarm topic. The listener keeps accepting
    /// whatever the rendezvous layer sends our way; a DHT substrate
    /// plugged in behind this adapter would publish the topic digest.
    pub fn join(&self, topic: [u8; 32]) {
        info!("Joined swarm topic {}", hex::encode(topic));
        if let Ok(mut slot) = self.inner.topic.lock() {
            *slot = Some(topic);
        }
    }

    /// Topic currently joined, if any
    pub fn topic(&self) -> Option<[u8; 32]> {
        self.inner.topic.lock().ok().and_then(|g| *g)
    }

    /// Dial a remote endpoint with a connect timeout
    pub async fn dial(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> std::io::Result<Arc<Connection>> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout")
            })??;
        Ok(SwarmInner::attach(&self.inner, stream).await)
    }

    /// Adopt an already-open stream (bootstrap probes hand their validated
    /// sockets over instead of reconnecting)
    pub async fn adopt(&self, stream: TcpStream) -> Arc<Connection> {
        SwarmInner::attach(&self.inner, stream).await
    }

    /// Snapshot of the open connections
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stop accepting and drop every connection's writer
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.inner.accept_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Ok(mut map) = self.inner.connections.write() {
            map.clear();
        }
        info!("Swarm shut down");
    }
}

impl Relay for Swarm {
    fn broadcast(&self, frame: &str, except: Option<ConnectionId>) -> usize {
        let Ok(map) = self.inner.connections.read() else {
            return 0;
        };
        let mut fanout = 0;
        for (id, conn) in map.iter() {
            if Some(*id) == except {
                continue;
            }
            conn.send(frame.to_string());
            fanout += 1;
        }
        fanout
    }

    fn direct_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .map(|map| map.len())
            .unwrap_or(0)
    }
}

impl SwarmInner {
    /// Register a stream: split it, spawn its reader and writer tasks,
    /// emit Connected.
    async fn attach(inner: &Arc<Self>, stream: TcpStream) -> Arc<Connection> {
        let _ = stream.set_nodelay(true);
        let addr = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (read_half, write_half) = stream.into_split();

        let id = inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let conn = Arc::new(Connection {
            id,
            addr,
            outbound: tx,
            peer_id: Mutex::new(None),
        });

        if let Ok(mut map) = inner.connections.write() {
            map.insert(id, conn.clone());
        }

        tokio::spawn(run_writer(rx, write_half));

        let _ = inner.events.send(SwarmEvent::Connected(conn.clone())).await;

        let reader_inner = inner.clone();
        let reader_conn = conn.clone();
        tokio::spawn(async move {
            reader_inner.run_reader(reader_conn, read_half).await;
        });

        conn
    }

    /// Read loop: chunks through the line assembler, decoded messages to
    /// the event channel, protocol failures counted and dropped. Any read
    /// error closes the connection; no error crosses to other connections.
    async fn run_reader(self: Arc<Self>, conn: Arc<Connection>, mut read_half: OwnedReadHalf) {
        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; 4096];

        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    self.diagnostics.bytes_received(n as u64);
                    let (lines, dropped) = assembler.push(&buf[..n]);
                    if dropped > 0 {
                        self.diagnostics.invalid_format(dropped);
                    }
                    for line in lines {
                        match GossipMessage::decode(&line) {
                            Ok(message) => {
                                let event = SwarmEvent::Message {
                                    conn: conn.clone(),
                                    message,
                                };
                                if self.events.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!("Dropping invalid line from {}: {}", conn.addr(), e);
                                self.diagnostics.invalid_format(1);
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("Read error on {}: {}", conn.addr(), e);
                    break;
                }
            }
        }

        if let Ok(mut map) = self.connections.write() {
            map.remove(&conn.id());
        }
        let _ = self
            .events
            .send(SwarmEvent::Disconnected {
                conn_id: conn.id(),
                peer_id: conn.peer_id(),
            })
            .await;
    }
}

/// Writer loop: drains the outbound queue. Write failures are ignored
/// per-message; the remote will be timed out by liveness.
async fn run_writer(mut rx: mpsc::Receiver<String>, mut write_half: OwnedWriteHalf) {
    while let Some(frame) = rx.recv().await {
        let _ = write_half.write_all(frame.as_bytes()).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================
