//! libp2p network behaviour for a Shroud node.
//!
//! Only what a node needs to hold connections open and learn who is on the
//! other end:
//! - Identify for exchanging protocol version and listen addresses
//! - Ping for liveness and round-trip measurement

use std::time::Duration;

use libp2p::{identify, identity::PublicKey, ping, swarm::NetworkBehaviour};

/// Protocol version announced over identify.
pub const PROTOCOL_VERSION: &str = "/shroud/0.1.0";

/// The composite network behaviour driven by the node's swarm.
#[derive(NetworkBehaviour)]
pub struct NodeBehaviour {
    /// Identify protocol. Tells peers which protocols and addresses we have.
    pub identify: identify::Behaviour,

    /// Ping for connection liveness.
    pub ping: ping::Behaviour,
}

impl NodeBehaviour {
    pub fn new(local_public_key: PublicKey) -> Self {
        Self {
            identify: identify::Behaviour::new(create_identify_config(local_public_key)),
            ping: ping::Behaviour::new(create_ping_config()),
        }
    }
}

/// Create identify configuration for Shroud.
pub fn create_identify_config(local_public_key: PublicKey) -> identify::Config {
    identify::Config::new(PROTOCOL_VERSION.to_string(), local_public_key)
        .with_agent_version(format!("shroud/{}", env!("CARGO_PKG_VERSION")))
}

pub fn create_ping_config() -> ping::Config {
    ping::Config::new().with_interval(Duration::from_secs(15))
}
