// Dashboard Server - HTTP + SSE presentation layer using warp
//
// The dashboard only reads shared node state; the one mutation it owns is
// the location opt-in. State pushes go through a throttled broadcaster so
// a gossip burst cannot flood subscribers.

use crate::dashboard::history::HistoryLog;
use crate::dashboard::types::{OptInResponse, StatsSnapshot};
use crate::geo::{GeoResolver, GeoState};
use crate::network::diagnostics::Diagnostics;
use crate::network::registry::PeerRegistry;
use crate::network::swarm::Relay;
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, RwLock};
use tracing::info;
use warp::Filter;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Minimum spacing between SSE pushes, unless forced
pub const BROADCAST_THROTTLE: Duration = Duration::from_millis(1000);

/// Queued snapshots per lagging subscriber before drops
const BROADCAST_CAPACITY: usize = 64;

// =============================================================================
// BROADCASTER
// =============================================================================

/// Fan-out of state snapshots to SSE subscribers, throttled to one push
/// per BROADCAST_THROTTLE except for forced pushes (e.g. opt-in).
pub struct Broadcaster {
    tx: broadcast::Sender<StatsSnapshot>,
    last_push: Mutex<Option<Instant>>,
    throttle: Duration,
}

impl Broadcaster {
    pub fn new(throttle: Duration) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            last_push: Mutex::new(None),
            throttle,
        }
    }

    /// Push a snapshot. Returns false when the throttle swallowed it.
    pub fn publish(&self, snapshot: StatsSnapshot, force: bool) -> bool {
        let Ok(mut last) = self.last_push.lock() else {
            return false;
        };
        let now = Instant::now();
        if !force {
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.throttle {
                    return false;
                }
            }
        }
        *last = Some(now);
        let _ = self.tx.send(snapshot);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatsSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BROADCAST_THROTTLE)
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// Read handles onto the node, injected into every route
#[derive(Clone)]
pub struct DashboardState {
    pub registry: Arc<RwLock<PeerRegistry>>,
    pub diagnostics: Arc<Diagnostics>,
    pub relay: Arc<dyn Relay>,
    pub geo: Arc<GeoState>,
    pub history: Arc<HistoryLog>,
    pub broadcaster: Arc<Broadcaster>,
    pub geo_api_url: String,
    pub local_id: String,
}

/// Assemble the dashboard view of the node
pub async fn build_snapshot(state: &DashboardState) -> StatsSnapshot {
    let registry = state.registry.read().await;
    StatsSnapshot {
        count: registry.size(),
        direct: state.relay.direct_count(),
        id: state.local_id.clone(),
        diagnostics: state.diagnostics.last_window(),
        locations: registry.locations(),
        opted_in: state.geo.opted_in(),
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Dashboard server errors
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("Bind error: {0}")]
    Bind(String),
}

/// HTTP server for the dashboard surface
pub struct DashboardServer {
    port: u16,
    address: [u8; 4],
}

impl DashboardServer {
    /// Listen on every interface; the dashboard is the public face
    pub fn new(port: u16) -> Self {
        Self {
            port,
            address: [0, 0, 0, 0],
        }
    }

    pub fn with_address(port: u16, address: [u8; 4]) -> Self {
        Self { port, address }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.address, self.port))
    }

    /// Start in the background, returning a shutdown handle. A bind
    /// failure is fatal to startup and surfaces as an error here.
    pub fn start_background(
        self,
        state: DashboardState,
    ) -> Result<DashboardHandle, DashboardError> {
        let (tx, rx) = oneshot::channel::<()>();
        let (addr, server) = warp::serve(routes(state))
            .try_bind_with_graceful_shutdown(self.socket_addr(), async {
                rx.await.ok();
            })
            .map_err(|e| DashboardError::Bind(e.to_string()))?;

        info!("Dashboard ready on http://{}", addr);
        tokio::spawn(server);

        Ok(DashboardHandle {
            addr,
            shutdown_tx: Some(tx),
        })
    }
}

/// Handle for a running dashboard server
pub struct DashboardHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl DashboardHandle {
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// =============================================================================
// ROUTES
// =============================================================================

fn with_state(
    state: DashboardState,
) -> impl Filter<Extract = (DashboardState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn routes(
    state: DashboardState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_index);

    let events = warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_events);

    let stats = warp::path!("api" / "stats")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_stats);

    let optin = warp::path!("api" / "location-optin")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handle_optin);

    let history = warp::path!("api" / "history")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handle_history);

    index.or(events).or(stats).or(optin).or(history)
}

/// `GET /`: landing page with the count server-rendered
async fn handle_index(state: DashboardState) -> Result<impl warp::Reply, Infallible> {
    let snapshot = build_snapshot(&state).await;
    let html = include_str!("index.html").replace("{{COUNT}}", &snapshot.count.to_string());
    Ok(warp::reply::html(html))
}

/// `GET /api/stats`: single-shot snapshot
async fn handle_stats(state: DashboardState) -> Result<impl warp::Reply, Infallible> {
    let snapshot = build_snapshot(&state).await;
    Ok(warp::reply::json(&snapshot))
}

/// `GET /events`: SSE stream; subscribers get an immediate snapshot,
/// then throttled pushes
async fn handle_events(state: DashboardState) -> Result<impl warp::Reply, Infallible> {
    let initial = build_snapshot(&state).await;
    let rx = state.broadcaster.subscribe();

    let updates = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(snapshot) => return Some((snapshot, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let stream = futures::stream::once(async move { initial })
        .chain(updates)
        .map(|snapshot| warp::sse::Event::default().json_data(&snapshot));

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}

/// `POST /api/location-optin`: enable location sharing, resolve our
/// location, force a broadcast
async fn handle_optin(state: DashboardState) -> Result<impl warp::Reply, Infallible> {
    state.geo.opt_in();

    if state.geo.location().is_none() {
        let resolver = GeoResolver::new(state.geo_api_url.clone());
        state.geo.set_location(resolver.resolve().await);
    }
    let location = state.geo.location();

    {
        let mut registry = state.registry.write().await;
        registry.set_local_location(location.clone());
    }

    let snapshot = build_snapshot(&state).await;
    state.broadcaster.publish(snapshot, true);

    Ok(warp::reply::json(&OptInResponse {
        success: true,
        has_location: location.is_some(),
        location,
    }))
}

/// `GET /api/history`: recent count samples
async fn handle_history(state: DashboardState) -> Result<impl warp::Reply, Infallible> {
    let points = state.history.points();
    Ok(warp::reply::json(&serde_json::json!({ "points": points })))
}

// =============================================================================
// TESTS
// =============================================================================
