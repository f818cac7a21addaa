// Network - The gossip overlay: codec, registry, engine, swarm, bootstrap

pub mod bootstrap;
pub mod diagnostics;
pub mod feistel;
pub mod gossip;
pub mod peer_cache;
pub mod protocol;
pub mod registry;
pub mod swarm;

pub use bootstrap::{Bootstrap, BootstrapConfig, BootstrapOutcome};
pub use diagnostics::Diagnostics;
pub use gossip::GossipEngine;
pub use protocol::{GossipMessage, Location};
pub use registry::PeerRegistry;
pub use swarm::{Relay, Swarm, SwarmEvent};
