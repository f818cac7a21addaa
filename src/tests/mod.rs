// Integration tests - Whole-node scenarios over localhost sockets

mod dashboard_http;
mod networking;

use crate::geo::GeoState;
use crate::network::swarm::SwarmEvent;
use crate::network::{Diagnostics, GossipEngine, PeerRegistry, Relay, Swarm};
use crate::identity::Identity;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// A complete in-process node: swarm, engine, and an event pump task.
/// Heartbeat ticks are driven manually so tests stay deterministic.
pub struct TestNode {
    pub identity: Arc<Identity>,
    pub registry: Arc<RwLock<PeerRegistry>>,
    pub diagnostics: Arc<Diagnostics>,
    pub swarm: Arc<Swarm>,
    pub engine: Arc<GossipEngine>,
    pub addr: SocketAddr,
}

impl TestNode {
    pub async fn spawn() -> Self {
        let identity = Arc::new(Identity::generate().unwrap());
        let registry = Arc::new(RwLock::new(PeerRegistry::new(
            identity.id().to_string(),
            1000,
        )));
        let diagnostics = Arc::new(Diagnostics::new());

        let (events_tx, mut events_rx) = mpsc::channel::<SwarmEvent>(256);
        let swarm = Arc::new(Swarm::new(events_tx, diagnostics.clone()));
        let addr = swarm.start(0).await.unwrap();

        let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel();
        let relay: Arc<dyn Relay> = swarm.clone();
        let engine = Arc::new(GossipEngine::new(
            identity.clone(),
            registry.clone(),
            diagnostics.clone(),
            relay,
            refresh_tx,
            Arc::new(GeoState::new(false)),
        ));

        // Event pump: the node's single-consumer loop
        let pump_engine = engine.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                pump_engine.handle_event(event).await;
            }
        });
        // Drain refresh requests so the channel never backs up
        tokio::spawn(async move { while refresh_rx.recv().await.is_some() {} });

        Self {
            identity,
            registry,
            diagnostics,
            swarm,
            engine,
            addr,
        }
    }

    pub async fn connect_to(&self, other: &TestNode) {
        self.swarm
            .dial(other.addr, Duration::from_millis(500))
            .await
            .unwrap();
    }

    pub async fn peer_count(&self) -> usize {
        self.registry.read().await.size()
    }

    pub async fn knows(&self, other: &TestNode) -> bool {
        self.registry.read().await.contains(other.identity.id())
    }
}

/// Poll an async predicate until it holds or the deadline passes
pub async fn eventually<F, Fut>(deadline: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= end {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
