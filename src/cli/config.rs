// CLI Configuration - Convert CLI args to node config
// Principle: Clear mapping between user input and internal configuration

use crate::cli::RunCmd;
use crate::network::bootstrap::BootstrapConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Complete node configuration derived from CLI arguments and env
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Dashboard HTTP port
    pub http_port: u16,
    /// Peer registry ceiling
    pub max_peers: usize,
    /// Gossip overlay listen port
    pub scan_port: u16,
    /// Identity key file
    pub identity_path: PathBuf,
    /// Share location from startup
    pub location_optin: bool,
    /// Geolocation lookup endpoint
    pub geo_api_url: String,
    /// Discovery settings
    pub bootstrap: BootstrapConfig,
}

impl NodeConfig {
    /// Create configuration from the CLI run command
    pub fn from_run_cmd(cmd: &RunCmd) -> Result<Self, ConfigError> {
        if cmd.max_peers == 0 {
            return Err(ConfigError::InvalidMaxPeers);
        }
        if cmd.port == cmd.scan_port {
            return Err(ConfigError::PortConflict(cmd.port));
        }

        let bootstrap = BootstrapConfig {
            peer_cache_enabled: cmd.peer_cache_enabled,
            peer_cache_path: cmd.peer_cache_path.clone(),
            peer_cache_max_age: Duration::from_secs(cmd.peer_cache_max_age),
            enable_ipv4_scan: cmd.enable_ipv4_scan,
            scan_port: cmd.scan_port,
            bootstrap_timeout: Duration::from_millis(cmd.bootstrap_timeout),
            bootstrap_peer_ip: cmd.bootstrap_peer_ip,
        };

        Ok(Self {
            http_port: cmd.port,
            max_peers: cmd.max_peers,
            scan_port: cmd.scan_port,
            identity_path: cmd.identity_path.clone(),
            location_optin: cmd.location_optin,
            geo_api_url: cmd.geo_api_url.clone(),
            bootstrap,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MAX_PEERS must be at least 1")]
    InvalidMaxPeers,

    #[error("PORT and SCAN_PORT cannot both be {0}")]
    PortConflict(u16),
}
