//! # Shroud P2P
//!
//! Node construction and bootnode bootstrap for a libp2p network, with an
//! optional anonymizing transport.
//!
//! ## Architecture
//!
//! - `address` turns bootnode strings into [`PeerReference`]s
//! - `transport` picks the stack once: direct TCP, or an embedded Tor client
//!   as the only transport
//! - `node` owns the swarm (driven by a background task) and exposes the
//!   advertised addresses, connections and bootstrap
//! - `bootstrap` holds the per-peer attempt loop and the aggregate policy
//!
//! ## Bootstrap policy
//!
//! A node needs one live entry point. Bootstrap fails only when there were
//! bootnodes and none of them could be reached; partial failure is normal
//! churn and is only logged.

pub mod address;
pub mod behaviour;
pub mod bootstrap;
pub mod config;
pub mod error;
mod event_loop;
pub mod identity;
pub mod node;
pub mod transport;

pub use address::{parse_many, parse_one, PeerReference};
pub use bootstrap::*;
pub use config::NodeConfig;
pub use error::*;
pub use identity::NodeIdentity;
pub use node::{Node, NodeState};
pub use transport::*;

pub use libp2p::{Multiaddr, PeerId};
