//! The task that owns and drives the swarm.
//!
//! [`crate::Node`] never touches the swarm directly. It sends [`Command`]s and
//! waits on oneshot replies; listen addresses are published on a watch
//! channel. The loop exits when the shutdown token is cancelled or every
//! command sender is gone, and dropping the swarm closes all listeners and
//! connections.

use std::collections::HashMap;

use futures::StreamExt;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{DialError as SwarmDialError, SwarmEvent};
use libp2p::{identify, ping, Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::address::PeerReference;
use crate::behaviour::{NodeBehaviour, NodeBehaviourEvent};
use crate::error::DialError;

type DialReply = oneshot::Sender<Result<(), DialError>>;

pub(crate) enum Command {
    Dial { peer: PeerReference, reply: DialReply },
    IsConnected { peer_id: PeerId, reply: oneshot::Sender<bool> },
    ConnectedPeers { reply: oneshot::Sender<Vec<PeerId>> },
}

pub(crate) struct EventLoop {
    swarm: Swarm<NodeBehaviour>,
    commands: mpsc::Receiver<Command>,
    listen_addrs: watch::Sender<Vec<Multiaddr>>,
    pending_dials: HashMap<PeerId, Vec<DialReply>>,
    shutdown: CancellationToken,
}

impl EventLoop {
    pub(crate) fn new(
        swarm: Swarm<NodeBehaviour>,
        commands: mpsc::Receiver<Command>,
        listen_addrs: watch::Sender<Vec<Multiaddr>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            swarm,
            commands,
            listen_addrs,
            pending_dials: HashMap::new(),
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }

        info!(
            connections = self.swarm.connected_peers().count(),
            pending_dials = self.pending_dials.len(),
            "stopping swarm"
        );
        // Dropping `self` closes listeners and connections; waiting dialers
        // observe the dropped reply senders.
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer, reply } => self.dial(peer, reply),
            Command::IsConnected { peer_id, reply } => {
                let _ = reply.send(self.swarm.is_connected(&peer_id));
            }
            Command::ConnectedPeers { reply } => {
                let _ = reply.send(self.swarm.connected_peers().copied().collect());
            }
        }
    }

    fn dial(&mut self, peer: PeerReference, reply: DialReply) {
        let peer_id = peer.peer_id();
        if self.swarm.is_connected(&peer_id) {
            let _ = reply.send(Ok(()));
            return;
        }

        let opts = DialOpts::peer_id(peer_id)
            .addresses(peer.addresses().to_vec())
            .build();
        match self.swarm.dial(opts) {
            // Already dialing this peer: wait for that attempt.
            Ok(()) | Err(SwarmDialError::DialPeerConditionFalse(_)) => {
                debug!(peer = %peer_id, "dialing");
                self.pending_dials.entry(peer_id).or_default().push(reply);
            }
            Err(e) => {
                let _ = reply.send(Err(DialError::Connection {
                    peer: peer_id,
                    reason: e.to_string(),
                }));
            }
        }
    }

    fn resolve_dial(&mut self, peer_id: PeerId, result: Result<(), DialError>) {
        if let Some(waiting) = self.pending_dials.remove(&peer_id) {
            for reply in waiting {
                let _ = reply.send(result.clone());
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening");
                self.listen_addrs.send_modify(|addrs| {
                    if !addrs.contains(&address) {
                        addrs.push(address);
                    }
                });
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                debug!(%address, "listen address expired");
                self.listen_addrs
                    .send_modify(|addrs| addrs.retain(|a| a != &address));
            }
            SwarmEvent::ListenerClosed {
                addresses, reason, ..
            } => {
                match reason {
                    Ok(()) => debug!(?addresses, "listener closed"),
                    Err(e) => warn!(?addresses, error = %e, "listener closed with error"),
                }
                self.listen_addrs
                    .send_modify(|addrs| addrs.retain(|a| !addresses.contains(a)));
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!(error = %error, "listener error");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                info!(
                    peer = %peer_id,
                    address = %endpoint.get_remote_address(),
                    dialer = endpoint.is_dialer(),
                    "connection established"
                );
                self.resolve_dial(peer_id, Ok(()));
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(
                    peer = %peer_id,
                    remaining = num_established,
                    cause = ?cause,
                    "connection closed"
                );
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if !self.swarm.is_connected(&peer_id) {
                    self.resolve_dial(
                        peer_id,
                        Err(DialError::Connection {
                            peer: peer_id,
                            reason: error.to_string(),
                        }),
                    );
                }
            }
            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => {
                debug!(address = %send_back_addr, error = %error, "inbound connection failed");
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    peer = %peer_id,
                    agent = %info.agent_version,
                    protocol = %info.protocol_version,
                    "identified peer"
                );
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Ping(ping::Event {
                peer,
                result: Ok(rtt),
                ..
            })) => {
                trace!(peer = %peer, rtt_ms = rtt.as_millis() as u64, "ping");
            }
            other => trace!(event = ?other, "swarm event"),
        }
    }
}
