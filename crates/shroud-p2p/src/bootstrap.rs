//! Bootnode bootstrap.
//!
//! Connects to every configured bootnode and records the outcome of each
//! attempt. Attempts are independent: one unreachable bootnode never stops
//! the others from being tried.
//!
//! ## Aggregate policy
//!
//! A node only needs one live entry point into the network, so bootstrap
//! succeeds if *at least one* peer was reached, or if there were no peers to
//! try. It fails only when the list was non-empty and every attempt failed.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::address::PeerReference;
use crate::error::{BootstrapError, DialError};

/// Order in which bootnodes are dialed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapStrategy {
    /// One peer at a time, in the order given.
    #[default]
    Sequential,
    /// All peers at once, joined before the aggregate rule is applied.
    Concurrent,
}

/// Bootstrap configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Upper bound for a single connection attempt.
    pub dial_timeout_ms: u64,

    pub strategy: BootstrapStrategy,

    /// Treat "every bootnode unreachable" as a fatal startup error instead of
    /// continuing standalone.
    pub strict: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 10_000,
            strategy: BootstrapStrategy::Sequential,
            strict: false,
        }
    }
}

/// Something that can open a connection to a peer.
#[async_trait]
pub trait PeerDialer {
    async fn dial_peer(&self, peer: &PeerReference) -> Result<(), DialError>;
}

/// Outcome of a single bootstrap attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerOutcome {
    pub peer: PeerReference,
    /// `None` when the connection was established.
    pub error: Option<String>,
}

impl PeerOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-peer results of a bootstrap run, in the order the peers were given.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapSummary {
    pub outcomes: Vec<PeerOutcome>,
}

impl BootstrapSummary {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    /// Apply the at-least-one-reachable rule.
    pub fn into_result(self) -> Result<BootstrapSummary, BootstrapError> {
        if self.attempted() > 0 && self.succeeded() == 0 {
            Err(BootstrapError::AllPeersFailed { summary: self })
        } else {
            Ok(self)
        }
    }

    /// One-line description for logging.
    pub fn log_line(&self) -> String {
        if self.attempted() == 0 {
            return "Bootstrap skipped: no bootnodes configured".to_string();
        }
        format!(
            "Bootstrap finished: {}/{} bootnodes reachable ({} failed)",
            self.succeeded(),
            self.attempted(),
            self.failed()
        )
    }
}

/// Dial every peer with `dialer` and apply the aggregate policy.
pub async fn run_bootstrap<D>(
    dialer: &D,
    peers: Vec<PeerReference>,
    strategy: BootstrapStrategy,
) -> Result<BootstrapSummary, BootstrapError>
where
    D: PeerDialer + ?Sized,
{
    let outcomes = match strategy {
        BootstrapStrategy::Sequential => {
            let mut outcomes = Vec::with_capacity(peers.len());
            for peer in peers {
                outcomes.push(attempt(dialer, peer).await);
            }
            outcomes
        }
        BootstrapStrategy::Concurrent => join_all(peers.into_iter().map(|peer| attempt(dialer, peer))).await,
    };

    let summary = BootstrapSummary { outcomes };
    info!("{}", summary.log_line());
    summary.into_result()
}

async fn attempt<D>(dialer: &D, peer: PeerReference) -> PeerOutcome
where
    D: PeerDialer + ?Sized,
{
    info!(peer = %peer.peer_id(), "bootstrapping to peer");
    let error = match dialer.dial_peer(&peer).await {
        Ok(()) => {
            info!(peer = %peer.peer_id(), "connected to bootnode");
            None
        }
        Err(e) => {
            warn!(peer = %peer.peer_id(), error = %e, "failed to bootstrap to peer");
            Some(e.to_string())
        }
    };
    PeerOutcome { peer, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use libp2p::PeerId;

    /// Reaches exactly the peers in `reachable`, recording dial order.
    struct FakeDialer {
        reachable: HashSet<PeerId>,
        dialed: Mutex<Vec<PeerId>>,
    }

    impl FakeDialer {
        fn new(reachable: &[&PeerReference]) -> Self {
            Self {
                reachable: reachable.iter().map(|p| p.peer_id()).collect(),
                dialed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PeerDialer for FakeDialer {
        async fn dial_peer(&self, peer: &PeerReference) -> Result<(), DialError> {
            self.dialed.lock().unwrap().push(peer.peer_id());
            if self.reachable.contains(&peer.peer_id()) {
                Ok(())
            } else {
                Err(DialError::Connection {
                    peer: peer.peer_id(),
                    reason: "connection refused".to_string(),
                })
            }
        }
    }

    fn make_peer(port: u16) -> PeerReference {
        PeerReference::new(
            PeerId::random(),
            vec![format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap()],
        )
    }

    #[tokio::test]
    async fn test_empty_peer_list_succeeds() {
        let dialer = FakeDialer::new(&[]);
        let summary = run_bootstrap(&dialer, vec![], BootstrapStrategy::Sequential)
            .await
            .unwrap();

        assert_eq!(summary.attempted(), 0);
        assert!(dialer.dialed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_succeeds() {
        let (a, b, c) = (make_peer(1), make_peer(2), make_peer(3));
        let dialer = FakeDialer::new(&[&b]);

        let summary = run_bootstrap(
            &dialer,
            vec![a.clone(), b.clone(), c.clone()],
            BootstrapStrategy::Sequential,
        )
        .await
        .unwrap();

        assert_eq!(summary.attempted(), 3);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        let flags: Vec<bool> = summary.outcomes.iter().map(|o| o.succeeded()).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert!(summary.outcomes[0].error.as_deref().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_sequential_dials_in_given_order_without_stopping() {
        let peers = vec![make_peer(1), make_peer(2), make_peer(3)];
        let dialer = FakeDialer::new(&[]);

        let _ = run_bootstrap(&dialer, peers.clone(), BootstrapStrategy::Sequential).await;

        let expected: Vec<PeerId> = peers.iter().map(|p| p.peer_id()).collect();
        assert_eq!(*dialer.dialed.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_all_failed_is_an_error() {
        let peers = vec![make_peer(1), make_peer(2)];
        let dialer = FakeDialer::new(&[]);

        let err = run_bootstrap(&dialer, peers, BootstrapStrategy::Sequential)
            .await
            .unwrap_err();

        assert_eq!(err.summary().attempted(), 2);
        assert_eq!(err.summary().succeeded(), 0);
        assert!(err.to_string().contains("all 2 peers unreachable"));
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let (a, b, c) = (make_peer(1), make_peer(2), make_peer(3));
        let peers = vec![a.clone(), b.clone(), c.clone()];

        let sequential = run_bootstrap(
            &FakeDialer::new(&[&a, &c]),
            peers.clone(),
            BootstrapStrategy::Sequential,
        )
        .await
        .unwrap();
        let concurrent = run_bootstrap(
            &FakeDialer::new(&[&a, &c]),
            peers,
            BootstrapStrategy::Concurrent,
        )
        .await
        .unwrap();

        assert_eq!(sequential, concurrent);
    }

    #[test]
    fn test_summary_log_line() {
        assert!(BootstrapSummary::default().log_line().contains("no bootnodes"));

        let summary = BootstrapSummary {
            outcomes: vec![
                PeerOutcome {
                    peer: make_peer(1),
                    error: None,
                },
                PeerOutcome {
                    peer: make_peer(2),
                    error: Some("timeout".to_string()),
                },
            ],
        };
        assert!(summary.log_line().contains("1/2 bootnodes reachable"));
        assert!(summary.into_result().is_ok());
    }
}
