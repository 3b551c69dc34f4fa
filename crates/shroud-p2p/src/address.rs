//! Bootnode address parsing.
//!
//! A bootnode is given as a multiaddr that ends with the peer's identity:
//!
//! ```text
//! /ip4/203.0.113.7/tcp/4001/p2p/12D3KooW...
//! /dns4/boot.example.org/tcp/4001/p2p/12D3KooW...
//! /onion3/<56 chars>:4001/p2p/12D3KooW...
//! ```
//!
//! The identity is split off into [`PeerReference::peer_id`] so a failed dial
//! can always be reported against the peer, whatever transport its address
//! uses.

use std::fmt;
use std::str::FromStr;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::Serialize;

use crate::error::FormatError;

/// A peer we know how to reach: its identity plus the routable addresses
/// (without the trailing `/p2p` component).
///
/// Only built by the parser (or trusted crate code), so there is always at
/// least one address the identity came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerReference {
    peer_id: PeerId,
    addresses: Vec<Multiaddr>,
}

impl PeerReference {
    pub(crate) fn new(peer_id: PeerId, addresses: Vec<Multiaddr>) -> Self {
        debug_assert!(!addresses.is_empty());
        Self { peer_id, addresses }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn addresses(&self) -> &[Multiaddr] {
        &self.addresses
    }
}

impl fmt::Display for PeerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addresses.first() {
            Some(addr) => write!(f, "{}/p2p/{}", addr, self.peer_id),
            None => write!(f, "/p2p/{}", self.peer_id),
        }
    }
}

impl FromStr for PeerReference {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_one(s)
    }
}

/// Parse a single peer descriptor.
pub fn parse_one(text: &str) -> Result<PeerReference, FormatError> {
    let input = text.trim();
    if input.is_empty() {
        return Err(FormatError::EmptyEntry { index: 0 });
    }

    let mut addr: Multiaddr =
        input
            .parse()
            .map_err(|e: libp2p::multiaddr::Error| FormatError::InvalidMultiaddr {
                input: input.to_string(),
                reason: e.to_string(),
            })?;

    let peer_id = match addr.pop() {
        Some(Protocol::P2p(peer_id)) => peer_id,
        _ => {
            return Err(FormatError::MissingPeerId {
                input: input.to_string(),
            })
        }
    };

    check_routable(&addr, input)?;

    Ok(PeerReference::new(peer_id, vec![addr]))
}

/// Parse a comma-separated list of peer descriptors.
///
/// Empty input means "no bootnodes" and yields an empty list. Any malformed
/// entry fails the whole batch.
pub fn parse_many(text: &str) -> Result<Vec<PeerReference>, FormatError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .enumerate()
        .map(|(index, entry)| {
            if entry.trim().is_empty() {
                return Err(FormatError::EmptyEntry { index });
            }
            parse_one(entry).map_err(|e| FormatError::InBatch {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

/// The address must start with a host followed by a tcp port. `onion3`
/// carries both in one component.
fn check_routable(addr: &Multiaddr, input: &str) -> Result<(), FormatError> {
    let mut components = addr.iter();
    match components.next() {
        Some(Protocol::Onion3(_)) => Ok(()),
        Some(
            Protocol::Ip4(_)
            | Protocol::Ip6(_)
            | Protocol::Dns(_)
            | Protocol::Dns4(_)
            | Protocol::Dns6(_),
        ) => match components.next() {
            Some(Protocol::Tcp(_)) => Ok(()),
            _ => Err(FormatError::MissingPort {
                input: input.to_string(),
            }),
        },
        _ => Err(FormatError::MissingHost {
            input: input.to_string(),
        }),
    }
}
