// Dashboard Types - JSON shapes served over HTTP and SSE

use crate::network::diagnostics::DiagnosticsSnapshot;
use crate::network::protocol::Location;
use serde::{Deserialize, Serialize};

/// One dashboard state push, also served by `GET /api/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Live peer-set cardinality, the local node included
    pub count: usize,
    /// Open direct connections
    pub direct: usize,
    /// Local node id
    pub id: String,
    /// Last diagnostics window
    pub diagnostics: DiagnosticsSnapshot,
    /// Locations of every opted-in peer
    pub locations: Vec<Location>,
    #[serde(rename = "optedIn")]
    pub opted_in: bool,
}

/// Response of `POST /api/location-optin`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptInResponse {
    pub success: bool,
    pub location: Option<Location>,
    #[serde(rename = "hasLocation")]
    pub has_location: bool,
}
