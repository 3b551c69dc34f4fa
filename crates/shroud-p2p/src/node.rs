//! The node: identity, transport stack and swarm, plus bootstrap.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized -> Constructing -> Ready -> Bootstrapping -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! A failure while constructing is returned to the caller and there is no
//! node. Bootstrapping always ends in `Running`, even with zero peers; what
//! to do about a failed bootstrap is the caller's decision. Shutdown can be
//! requested at any point after `Ready` through [`Node::shutdown_token`].

use std::time::Duration;

use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::address::PeerReference;
use crate::behaviour::NodeBehaviour;
use crate::bootstrap::{run_bootstrap, BootstrapConfig, BootstrapSummary, PeerDialer};
use crate::config::NodeConfig;
use crate::error::{BootstrapError, ConstructionError, DialError};
use crate::event_loop::{Command, EventLoop};
use crate::identity::NodeIdentity;
use crate::transport::{TransportMode, TransportSelection};

const COMMAND_BUFFER: usize = 32;

/// Where a node is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Uninitialized,
    Constructing,
    Ready,
    Bootstrapping,
    Running,
    ShuttingDown,
    Terminated,
}

impl NodeState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Uninitialized, Constructing)
                | (Constructing, Ready)
                | (Ready, Bootstrapping)
                | (Bootstrapping, Running)
                | (Ready | Bootstrapping | Running, ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }
}

/// A running peer-to-peer node.
pub struct Node {
    identity: NodeIdentity,
    mode: TransportMode,
    state: NodeState,
    bootstrap: BootstrapConfig,
    listen_addrs: watch::Receiver<Vec<Multiaddr>>,
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    event_loop: JoinHandle<()>,
    span: Span,
}

impl Node {
    /// Build the transport stack, start the swarm and, in direct mode, bind
    /// the listen endpoint. Returns once the node is `Ready`.
    pub async fn construct(config: NodeConfig) -> Result<Self, ConstructionError> {
        let mut state = NodeState::Uninitialized;
        advance(&mut state, NodeState::Constructing);

        let identity = match &config.identity_path {
            Some(path) => NodeIdentity::load_or_generate(path)?,
            None => NodeIdentity::generate(),
        };
        let peer_id = identity.peer_id();
        let span = info_span!("node", peer = %peer_id);

        let stack = TransportSelection::from_mode(
            config.mode,
            config.listen,
            &config.transport.anonymizer,
        )
        .build(identity.keypair(), &config.transport)
        .instrument(span.clone())
        .await?;

        let behaviour = NodeBehaviour::new(identity.keypair().public());
        let (mut swarm, listen) = stack.into_swarm(
            behaviour,
            peer_id,
            Duration::from_millis(config.transport.idle_connection_timeout_ms),
        );

        if let Some(address) = &listen {
            swarm
                .listen_on(address.clone())
                .map_err(|e| ConstructionError::Listen {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let (addrs_tx, mut listen_addrs) = watch::channel(Vec::new());
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let shutdown = CancellationToken::new();
        let event_loop = tokio::spawn(
            EventLoop::new(swarm, commands_rx, addrs_tx, shutdown.clone())
                .run()
                .instrument(span.clone()),
        );

        if let Some(address) = listen {
            let waited_ms = config.transport.listen_ready_timeout_ms;
            let ready = tokio::time::timeout(Duration::from_millis(waited_ms), async {
                listen_addrs
                    .wait_for(|addrs| !addrs.is_empty())
                    .await
                    .map(|_| ())
            })
            .await;

            let failure = match ready {
                Ok(Ok(())) => None,
                Ok(Err(_)) => Some(ConstructionError::Listen {
                    address: address.to_string(),
                    reason: "listener closed before reporting an address".to_string(),
                }),
                Err(_) => Some(ConstructionError::ListenTimeout {
                    address: address.to_string(),
                    waited_ms,
                }),
            };
            if let Some(e) = failure {
                shutdown.cancel();
                return Err(e);
            }
        } else {
            span.in_scope(|| info!("no listener in this transport mode, node is dial-only"));
        }

        advance(&mut state, NodeState::Ready);
        span.in_scope(|| info!(mode = ?config.mode, "node ready"));

        Ok(Self {
            identity,
            mode: config.mode,
            state,
            bootstrap: config.bootstrap,
            listen_addrs,
            commands,
            shutdown,
            event_loop,
            span,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Bound addresses as reported by the swarm, without our identity.
    pub fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listen_addrs.borrow().clone()
    }

    /// Every bound address with `/p2p/<our peer id>` appended, in the order the
    /// swarm reported them.
    pub fn advertised_addresses(&self) -> Vec<String> {
        let peer_id = self.peer_id();
        self.listen_addrs
            .borrow()
            .iter()
            .map(|addr| with_peer_id(addr, peer_id).to_string())
            .collect()
    }

    /// Open a connection to `peer`, bounded by the configured dial timeout.
    pub async fn connect(&self, peer: &PeerReference) -> Result<(), DialError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Dial {
                peer: peer.clone(),
                reply,
            })
            .await
            .map_err(|_| DialError::NodeStopped)?;

        let limit_ms = self.bootstrap.dial_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(limit_ms), response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DialError::NodeStopped),
            Err(_) => Err(DialError::Timeout {
                peer: peer.peer_id(),
                after_ms: limit_ms,
            }),
        }
    }

    pub async fn is_connected(&self, peer_id: PeerId) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(Command::IsConnected { peer_id, reply })
            .await
            .is_err()
        {
            return false;
        }
        response.await.unwrap_or(false)
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(Command::ConnectedPeers { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    /// Connect to the given bootnodes. See [`crate::bootstrap`] for the
    /// aggregate policy.
    pub async fn bootstrap(
        &mut self,
        peers: Vec<PeerReference>,
    ) -> Result<BootstrapSummary, BootstrapError> {
        self.set_state(NodeState::Bootstrapping);
        let result = run_bootstrap(&*self, peers, self.bootstrap.strategy)
            .instrument(self.span.clone())
            .await;
        self.set_state(NodeState::Running);
        result
    }

    /// Token that stops the node's swarm when cancelled. Safe to cancel at
    /// any time, including while a bootstrap is in flight.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the swarm, releasing listeners and connections, and drop the
    /// identity.
    pub async fn shutdown(mut self) {
        self.set_state(NodeState::ShuttingDown);
        self.shutdown.cancel();
        if let Err(e) = (&mut self.event_loop).await {
            self.span
                .in_scope(|| warn!(error = %e, "event loop ended abnormally"));
        }
        self.set_state(NodeState::Terminated);
        self.span.in_scope(|| info!("node terminated"));
    }

    fn set_state(&mut self, next: NodeState) {
        let _entered = self.span.enter();
        advance(&mut self.state, next);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl PeerDialer for Node {
    async fn dial_peer(&self, peer: &PeerReference) -> Result<(), DialError> {
        self.connect(peer).await
    }
}

fn advance(state: &mut NodeState, next: NodeState) {
    if state.can_transition_to(next) {
        debug!(from = ?*state, to = ?next, "node state");
        *state = next;
    } else {
        debug!(from = ?*state, to = ?next, "ignoring node state change");
    }
}

fn with_peer_id(addr: &Multiaddr, peer_id: PeerId) -> Multiaddr {
    match addr.iter().last() {
        Some(Protocol::P2p(_)) => addr.clone(),
        _ => addr.clone().with(Protocol::P2p(peer_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use NodeState::*;
        let path = [
            Uninitialized,
            Constructing,
            Ready,
            Bootstrapping,
            Running,
            ShuttingDown,
            Terminated,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }

        assert!(Ready.can_transition_to(ShuttingDown));
        assert!(Bootstrapping.can_transition_to(ShuttingDown));
        assert!(!Running.can_transition_to(Bootstrapping));
        assert!(!Terminated.can_transition_to(Ready));
        assert!(!ShuttingDown.can_transition_to(Running));
    }

    #[test]
    fn test_advance_ignores_invalid_change() {
        let mut state = NodeState::ShuttingDown;
        advance(&mut state, NodeState::Running);
        assert_eq!(state, NodeState::ShuttingDown);
    }

    #[test]
    fn test_with_peer_id_appends_identity_once() {
        let peer_id = PeerId::random();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();

        let full = with_peer_id(&addr, peer_id);
        assert_eq!(full.to_string(), format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", peer_id));
        assert_eq!(with_peer_id(&full, peer_id), full);
    }
}
