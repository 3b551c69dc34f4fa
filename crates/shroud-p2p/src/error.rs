//! Error types for node construction, address parsing, dialing and bootstrap.
//!
//! Propagation policy:
//! - [`FormatError`] and [`ConstructionError`] always escalate to the caller.
//! - [`DialError`] is recorded per peer and folded into a bootstrap summary.
//! - [`BootstrapError`] is raised only when every attempted peer failed.

use libp2p::PeerId;
use thiserror::Error;

use crate::bootstrap::BootstrapSummary;

/// A peer descriptor could not be turned into a [`crate::PeerReference`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("empty peer address at position {index}")]
    EmptyEntry { index: usize },

    #[error("invalid multiaddr {input:?}: {reason}")]
    InvalidMultiaddr { input: String, reason: String },

    #[error("peer address {input:?} does not end with a /p2p/<peer-id> component")]
    MissingPeerId { input: String },

    #[error("peer address {input:?} has no host component (ip4, ip6, dns, dns4, dns6 or onion3)")]
    MissingHost { input: String },

    #[error("peer address {input:?} has no tcp port after its host")]
    MissingPort { input: String },

    #[error("bootnode #{index}: {source}")]
    InBatch {
        index: usize,
        #[source]
        source: Box<FormatError>,
    },
}

/// The network stack could not be built. Never retried.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("identity error: {0}")]
    Identity(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("anonymizing transport unavailable: {0}")]
    AnonymizerUnavailable(String),

    #[error("failed to listen on {address}: {reason}")]
    Listen { address: String, reason: String },

    #[error("no listen address reported for {address} within {waited_ms}ms")]
    ListenTimeout { address: String, waited_ms: u64 },
}

/// A single connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    #[error("connection to {peer} failed: {reason}")]
    Connection { peer: PeerId, reason: String },

    #[error("connection to {peer} timed out after {after_ms}ms")]
    Timeout { peer: PeerId, after_ms: u64 },

    #[error("node is shutting down")]
    NodeStopped,
}

/// Every configured bootnode was unreachable.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to bootstrap: all {} peers unreachable", .summary.attempted())]
    AllPeersFailed { summary: BootstrapSummary },
}

impl BootstrapError {
    /// Per-peer detail of the failed bootstrap.
    pub fn summary(&self) -> &BootstrapSummary {
        match self {
            BootstrapError::AllPeersFailed { summary } => summary,
        }
    }
}

/// A configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
