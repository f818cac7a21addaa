// Runner - Main node execution logic
// Principle: One event loop owns every gossip state transition; everything
// else is a timer tick or a read-only dashboard view

use crate::cli::config::NodeConfig;
use crate::dashboard::server::{
    build_snapshot, Broadcaster, DashboardServer, DashboardState,
};
use crate::dashboard::HistoryLog;
use crate::geo::{GeoResolver, GeoState};
use crate::identity::Identity;
use crate::network::bootstrap::{cache_snapshot, Bootstrap};
use crate::network::diagnostics::DIAGNOSTICS_INTERVAL;
use crate::network::gossip::LEAVE_GRACE;
use crate::network::peer_cache::PeerCache;
use crate::network::registry::HEARTBEAT_INTERVAL;
use crate::network::swarm::SwarmEvent;
use crate::network::{Diagnostics, GossipEngine, PeerRegistry, Relay, Swarm};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Queued swarm events before readers block
const SWARM_EVENT_QUEUE: usize = 1024;

/// How often live neighbors are written back to the peer cache
const CACHE_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Runner errors; all of these abort startup
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Identity error: {0}")]
    Identity(#[from] crate::identity::IdentityError),

    #[error("Overlay listen error: {0}")]
    Listen(#[from] std::io::Error),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] crate::dashboard::server::DashboardError),
}

/// Run the node with the given configuration until a termination signal
pub async fn run_node(config: NodeConfig) -> Result<(), RunnerError> {
    info!("🚀 Starting hypermind node");

    let identity = Arc::new(Identity::load_or_generate(&config.identity_path)?);
    info!("🆔 Node id: {}…", &identity.id()[..16]);

    let registry = Arc::new(RwLock::new(PeerRegistry::new(
        identity.id().to_string(),
        config.max_peers,
    )));
    let diagnostics = Arc::new(Diagnostics::new());
    let geo = Arc::new(GeoState::new(config.location_optin));
    let history = Arc::new(HistoryLog::default());
    let broadcaster = Arc::new(Broadcaster::default());

    let (events_tx, mut events_rx) = mpsc::channel::<SwarmEvent>(SWARM_EVENT_QUEUE);
    let swarm = Arc::new(Swarm::new(events_tx, diagnostics.clone()));
    let overlay_addr = swarm.start(config.scan_port).await?;
    info!("📡 Overlay port: {}", overlay_addr.port());

    let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<bool>();
    let relay: Arc<dyn Relay> = swarm.clone();
    let engine = Arc::new(GossipEngine::new(
        identity.clone(),
        registry.clone(),
        diagnostics.clone(),
        relay.clone(),
        refresh_tx,
        geo.clone(),
    ));

    let dash_state = DashboardState {
        registry: registry.clone(),
        diagnostics: diagnostics.clone(),
        relay,
        geo: geo.clone(),
        history: history.clone(),
        broadcaster: broadcaster.clone(),
        geo_api_url: config.geo_api_url.clone(),
        local_id: identity.id().to_string(),
    };
    let dashboard = DashboardServer::new(config.http_port).start_background(dash_state.clone())?;
    info!("🌐 Dashboard: http://{}", dashboard.address());

    // Startup opt-in resolves in the background; the node runs fine
    // without coordinates
    if config.location_optin {
        let geo = geo.clone();
        let registry = registry.clone();
        let state = dash_state.clone();
        let url = config.geo_api_url.clone();
        tokio::spawn(async move {
            let loc = GeoResolver::new(url).resolve().await;
            geo.set_location(loc.clone());
            registry.write().await.set_local_location(loc);
            let snapshot = build_snapshot(&state).await;
            state.broadcaster.publish(snapshot, true);
        });
    }

    // Discovery runs alongside the event loop; whatever it finds arrives
    // as ordinary swarm events
    let bootstrap = Bootstrap::new(config.bootstrap.clone(), identity.clone());
    let bootstrap_swarm = swarm.clone();
    tokio::spawn(async move {
        let outcome = bootstrap.run(&bootstrap_swarm).await;
        info!("Bootstrap finished: {:?}", outcome);
    });

    let cache = config.bootstrap.peer_cache_enabled.then(|| {
        PeerCache::new(
            config.bootstrap.peer_cache_path.clone(),
            config.bootstrap.peer_cache_max_age,
        )
    });

    run_event_loop(
        &engine,
        &mut events_rx,
        &mut refresh_rx,
        &dash_state,
        cache.as_ref(),
        &swarm,
        config.scan_port,
    )
    .await;

    // Graceful shutdown: best-effort LEAVE, short grace, then teardown
    info!("🛑 Shutting down…");
    engine.broadcast_leave();
    tokio::time::sleep(LEAVE_GRACE).await;

    if let Some(cache) = &cache {
        persist_cache(cache, &swarm, config.scan_port);
    }
    dashboard.shutdown();
    swarm.shutdown();

    info!("👋 Node stopped cleanly");
    Ok(())
}

/// Main event loop: swarm events, dashboard refreshes, and the three
/// timers (heartbeat, diagnostics window, cache persist)
async fn run_event_loop(
    engine: &GossipEngine,
    events_rx: &mut mpsc::Receiver<SwarmEvent>,
    refresh_rx: &mut mpsc::UnboundedReceiver<bool>,
    dash_state: &DashboardState,
    cache: Option<&PeerCache>,
    swarm: &Swarm,
    scan_port: u16,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut diagnostics_window = tokio::time::interval(DIAGNOSTICS_INTERVAL);
    let mut cache_persist = tokio::time::interval(CACHE_PERSIST_INTERVAL);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Termination signal received");
                break;
            }

            Some(event) = events_rx.recv() => {
                engine.handle_event(event).await;
            }

            Some(force) = refresh_rx.recv() => {
                let snapshot = build_snapshot(dash_state).await;
                dash_state.broadcaster.publish(snapshot, force);
            }

            _ = heartbeat.tick() => {
                engine.tick().await;
                let snapshot = build_snapshot(dash_state).await;
                dash_state.history.record(snapshot.count);
                dash_state.broadcaster.publish(snapshot, false);
            }

            _ = diagnostics_window.tick() => {
                dash_state.diagnostics.roll_window();
            }

            _ = cache_persist.tick() => {
                if let Some(cache) = cache {
                    persist_cache(cache, swarm, scan_port);
                }
            }
        }
    }
}

/// Merge the live direct neighbors into the cache file
fn persist_cache(cache: &PeerCache, swarm: &Swarm, scan_port: u16) {
    let mut entries = cache.load();
    for peer in cache_snapshot(swarm, scan_port) {
        match entries.iter_mut().find(|e| e.id == peer.id) {
            Some(existing) => *existing = peer,
            None => entries.push(peer),
        }
    }
    if entries.is_empty() {
        return;
    }
    if let Err(e) = cache.store(entries) {
        warn!("Could not persist peer cache: {}", e);
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
