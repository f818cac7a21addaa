// Geolocation - Opt-in location lookup for the dashboard map
// Principle: Location is cosmetic and best-effort; lookup failure leaves
// the node opted-in without coordinates

use crate::network::protocol::Location;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP timeout for the lookup
pub const GEO_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Default lookup endpoint (returns JSON for the caller's public IP)
pub const DEFAULT_GEO_API_URL: &str = "http://ip-api.com/json";

// =============================================================================
// SHARED OPT-IN STATE
// =============================================================================

/// Opt-in flag and resolved location, shared between the gossip engine
/// (outbound heartbeats) and the dashboard.
#[derive(Debug, Default)]
pub struct GeoState {
    opted_in: AtomicBool,
    location: RwLock<Option<Location>>,
}

impl GeoState {
    pub fn new(opted_in: bool) -> Self {
        Self {
            opted_in: AtomicBool::new(opted_in),
            location: RwLock::new(None),
        }
    }

    pub fn opted_in(&self) -> bool {
        self.opted_in.load(Ordering::Relaxed)
    }

    pub fn opt_in(&self) {
        self.opted_in.store(true, Ordering::Relaxed);
    }

    pub fn location(&self) -> Option<Location> {
        self.location.read().ok().and_then(|g| g.clone())
    }

    pub fn set_location(&self, loc: Option<Location>) {
        if let Ok(mut slot) = self.location.write() {
            *slot = loc;
        }
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Shape of the lookup response; extra fields are ignored
#[derive(Debug, Deserialize)]
struct GeoApiResponse {
    status: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
}

/// Resolves the node's own location from its public IP
pub struct GeoResolver {
    url: String,
}

impl GeoResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Fetch and validate the location. Any failure is a None.
    pub async fn resolve(&self) -> Option<Location> {
        let client = reqwest::Client::builder()
            .timeout(GEO_LOOKUP_TIMEOUT)
            .build()
            .ok()?;

        let response = match client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Geolocation lookup failed: {}", e);
                return None;
            }
        };
        let body: GeoApiResponse = response.json().await.ok()?;
        let loc = parse_response(body)?;
        debug!("Resolved own location: {:?}", loc.city);
        Some(loc)
    }
}

impl Default for GeoResolver {
    fn default() -> Self {
        Self::new(DEFAULT_GEO_API_URL)
    }
}

fn parse_response(body: GeoApiResponse) -> Option<Location> {
    if let Some(status) = &body.status {
        if status != "success" {
            return None;
        }
    }
    let lat = body.lat?;
    let lon = body.lon?;
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    Some(Location {
        lat,
        lon,
        city: body.city,
    })
}

// =============================================================================
// TESTS
// =============================================================================
