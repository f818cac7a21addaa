// CLI - Command line interface for the hypermind node
// Principle: Every knob is an environment variable first, a flag second

pub mod config;
pub mod runner;

use clap::{ArgAction, Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::geo::DEFAULT_GEO_API_URL;

/// Hypermind - decentralized peer-counting overlay
#[derive(Parser, Debug)]
#[command(name = "hypermind-node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Decentralized peer counter: join the swarm, gossip liveness, count the mesh")]
#[command(long_about = r#"
Hypermind joins a named swarm, discovers other instances across the public
network, exchanges signed liveness heartbeats, and serves the live peer
count as a real-time dashboard.

Run a node with the dashboard on port 3000:
  hypermind-node run

Join via a known peer:
  BOOTSTRAP_PEER_IP=203.0.113.7 hypermind-node run

Enable the randomized IPv4 sweep:
  ENABLE_IPV4_SCAN=true hypermind-node run
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "HYPERMIND_LOG")]
    pub log_level: String,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the node
    Run(RunCmd),

    /// Key management
    Key(KeyCmd),
}

/// Run the node
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Dashboard HTTP port
    #[arg(long, default_value = "3000", env = "PORT")]
    pub port: u16,

    /// Ceiling on the peer registry
    #[arg(long, default_value = "1000000", env = "MAX_PEERS")]
    pub max_peers: usize,

    /// Enable the Feistel-permuted IPv4 sweep during bootstrap
    #[arg(long, default_value_t = false, action = ArgAction::Set, env = "ENABLE_IPV4_SCAN")]
    pub enable_ipv4_scan: bool,

    /// TCP port the gossip overlay listens on (and probes during scans)
    #[arg(long, default_value = "42424", env = "SCAN_PORT")]
    pub scan_port: u16,

    /// Wall-clock budget for the cache and sweep phases, milliseconds
    #[arg(long, default_value = "30000", env = "BOOTSTRAP_TIMEOUT")]
    pub bootstrap_timeout: u64,

    /// Warm-start from the peer cache file
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "PEER_CACHE_ENABLED")]
    pub peer_cache_enabled: bool,

    /// Peer cache file path
    #[arg(long, default_value = "./peers.json", env = "PEER_CACHE_PATH")]
    pub peer_cache_path: PathBuf,

    /// Maximum age of cached peers, seconds
    #[arg(long, default_value = "86400", env = "PEER_CACHE_MAX_AGE")]
    pub peer_cache_max_age: u64,

    /// Debug override: skip discovery and probe this address directly
    #[arg(long, env = "BOOTSTRAP_PEER_IP")]
    pub bootstrap_peer_ip: Option<Ipv4Addr>,

    /// Share this node's location from startup
    #[arg(long, default_value_t = false, action = ArgAction::Set, env = "LOCATION_OPTIN")]
    pub location_optin: bool,

    /// Identity key file (generated and mined when absent)
    #[arg(long, default_value = "./identity.json", env = "IDENTITY_PATH")]
    pub identity_path: PathBuf,

    /// Geolocation lookup endpoint
    #[arg(long, default_value = DEFAULT_GEO_API_URL, env = "GEO_API_URL")]
    pub geo_api_url: String,
}

/// Key management commands
#[derive(Parser, Debug)]
pub struct KeyCmd {
    #[command(subcommand)]
    pub subcommand: KeySubcommand,
}

#[derive(Subcommand, Debug)]
pub enum KeySubcommand {
    /// Generate a keypair and mine its proof-of-work nonce
    Generate {
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect an identity file
    Inspect {
        /// Identity file path
        path: PathBuf,
    },
}
