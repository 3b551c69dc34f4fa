//! Transport selection for the node.
//!
//! Two stacks are available, chosen once at startup:
//!
//! 1. **Direct**: TCP with DNS resolution. Dials and listens in the clear
//!    (connections are still authenticated and encrypted with Noise).
//! 2. **Anonymized**: an embedded Tor client is the only transport. Nothing is
//!    dialed or accepted outside of Tor, and no TCP listener is bound.
//!
//! Both resolve to the same boxed `(PeerId, StreamMuxerBox)` transport, so the
//! node and the bootstrap logic never see which one is in use.

use std::net::Ipv4Addr;
use std::ops::Range;
use std::time::Duration;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::{upgrade::Version, Boxed};
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{dns, noise, tcp, yamux, Multiaddr, PeerId, Swarm, Transport};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConstructionError;

/// Listen ports are drawn from the non-privileged range so that several
/// local instances do not collide.
pub const EPHEMERAL_PORT_RANGE: Range<u16> = 1024..u16::MAX;

/// A fully upgraded transport, as consumed by the swarm.
pub type BoxedTransport = Boxed<(PeerId, StreamMuxerBox)>;

/// How the node reaches the network. Fixed for the lifetime of the process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Plain TCP.
    Direct,
    /// All traffic through the embedded Tor client.
    #[default]
    Anonymized,
}

impl TransportMode {
    /// Human-readable description for logging.
    pub fn description(&self) -> &'static str {
        match self {
            TransportMode::Direct => "direct TCP (peers see our IP address)",
            TransportMode::Anonymized => "Tor (embedded client, outbound only)",
        }
    }
}

/// Where the node listens in direct mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEndpoint {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl ListenEndpoint {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self { host, port }
    }

    /// Wildcard host, random non-privileged port.
    pub fn random() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, random_port())
    }

    pub fn to_multiaddr(&self) -> Multiaddr {
        Multiaddr::empty()
            .with(Protocol::Ip4(self.host))
            .with(Protocol::Tcp(self.port))
    }
}

impl Default for ListenEndpoint {
    fn default() -> Self {
        Self::random()
    }
}

/// Pick a listen port uniformly from [`EPHEMERAL_PORT_RANGE`].
pub fn random_port() -> u16 {
    rand::thread_rng().gen_range(EPHEMERAL_PORT_RANGE)
}

/// Configuration for the embedded Tor client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    /// Run the Tor client in-process. An external Tor daemon is not supported.
    pub embedded: bool,

    /// Allow dialing `/ip4` and `/ip6` targets through Tor (exit traffic),
    /// not only DNS names and onion services.
    pub allow_ip_targets: bool,

    /// How long the Tor client may take to bootstrap before construction fails.
    pub bootstrap_timeout_ms: u64,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            embedded: true,
            allow_ip_targets: true,
            bootstrap_timeout_ms: 120_000,
        }
    }
}

/// Configuration for the transport layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Time allowed for protocol negotiation, Noise and Yamux on a new connection.
    pub upgrade_timeout_ms: u64,

    /// Connections with no active streams are closed after this long.
    pub idle_connection_timeout_ms: u64,

    /// How long construction waits for the listener to report its addresses.
    pub listen_ready_timeout_ms: u64,

    pub anonymizer: AnonymizerConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            upgrade_timeout_ms: 20_000,
            idle_connection_timeout_ms: 60_000,
            listen_ready_timeout_ms: 5_000,
            anonymizer: AnonymizerConfig::default(),
        }
    }
}

/// The transport strategy, resolved from the mode flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSelection {
    Direct { listen: ListenEndpoint },
    Anonymized(AnonymizerConfig),
}

impl TransportSelection {
    pub fn from_mode(mode: TransportMode, listen: ListenEndpoint, anonymizer: &AnonymizerConfig) -> Self {
        match mode {
            TransportMode::Direct => TransportSelection::Direct { listen },
            TransportMode::Anonymized => TransportSelection::Anonymized(anonymizer.clone()),
        }
    }

    pub fn mode(&self) -> TransportMode {
        match self {
            TransportSelection::Direct { .. } => TransportMode::Direct,
            TransportSelection::Anonymized(_) => TransportMode::Anonymized,
        }
    }

    /// Build the transport stack. Failure is fatal for the node.
    pub async fn build(
        self,
        keypair: &Keypair,
        config: &TransportConfig,
    ) -> Result<StackBuilder, ConstructionError> {
        let upgrade_timeout = Duration::from_millis(config.upgrade_timeout_ms);
        let mode = self.mode();

        let (transport, listen) = match self {
            TransportSelection::Direct { listen } => {
                let transport = direct_transport(keypair, upgrade_timeout)?;
                (transport, Some(listen.to_multiaddr()))
            }
            TransportSelection::Anonymized(anonymizer) => {
                if !anonymizer.embedded {
                    return Err(ConstructionError::AnonymizerUnavailable(
                        "only the embedded Tor client is supported".to_string(),
                    ));
                }
                let transport = anonymized_transport(keypair, &anonymizer, upgrade_timeout).await?;
                (transport, None)
            }
        };

        info!(mode = ?mode, "transport ready: {}", mode.description());
        Ok(StackBuilder {
            mode,
            transport,
            listen,
        })
    }
}

/// A built transport stack waiting to be turned into a swarm.
pub struct StackBuilder {
    mode: TransportMode,
    transport: BoxedTransport,
    listen: Option<Multiaddr>,
}

impl StackBuilder {
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// The address the node should listen on, if this stack accepts inbound
    /// connections at all.
    pub fn listen_address(&self) -> Option<&Multiaddr> {
        self.listen.as_ref()
    }

    /// Consume the stack and produce a swarm driving `behaviour`.
    pub fn into_swarm<B: NetworkBehaviour>(
        self,
        behaviour: B,
        local_peer_id: PeerId,
        idle_connection_timeout: Duration,
    ) -> (Swarm<B>, Option<Multiaddr>) {
        let config = libp2p::swarm::Config::with_tokio_executor()
            .with_idle_connection_timeout(idle_connection_timeout);
        let swarm = Swarm::new(self.transport, behaviour, local_peer_id, config);
        (swarm, self.listen)
    }
}

fn noise_config(keypair: &Keypair) -> Result<noise::Config, ConstructionError> {
    noise::Config::new(keypair)
        .map_err(|e| ConstructionError::Transport(format!("noise configuration: {}", e)))
}

fn direct_transport(
    keypair: &Keypair,
    upgrade_timeout: Duration,
) -> Result<BoxedTransport, ConstructionError> {
    let tcp = || tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));

    let resolving = match dns::tokio::Transport::system(tcp()) {
        Ok(transport) => transport,
        Err(e) => {
            warn!(error = %e, "system DNS configuration unavailable, using default resolvers");
            dns::tokio::Transport::custom(
                tcp(),
                dns::ResolverConfig::default(),
                dns::ResolverOpts::default(),
            )
        }
    };

    Ok(resolving
        .upgrade(Version::V1)
        .authenticate(noise_config(keypair)?)
        .multiplex(yamux::Config::default())
        .timeout(upgrade_timeout)
        .boxed())
}

#[cfg(feature = "tor")]
async fn anonymized_transport(
    keypair: &Keypair,
    config: &AnonymizerConfig,
    upgrade_timeout: Duration,
) -> Result<BoxedTransport, ConstructionError> {
    use libp2p_community_tor::{AddressConversion, TorTransport};

    info!("bootstrapping embedded Tor client");
    let limit = Duration::from_millis(config.bootstrap_timeout_ms);
    let tor = match tokio::time::timeout(limit, TorTransport::bootstrapped()).await {
        Ok(Ok(tor)) => tor,
        Ok(Err(e)) => return Err(ConstructionError::AnonymizerUnavailable(e.to_string())),
        Err(_) => {
            return Err(ConstructionError::AnonymizerUnavailable(format!(
                "Tor client did not bootstrap within {}ms",
                config.bootstrap_timeout_ms
            )))
        }
    };

    let conversion = if config.allow_ip_targets {
        AddressConversion::IpAndDns
    } else {
        AddressConversion::DnsOnly
    };

    Ok(tor
        .with_address_conversion(conversion)
        .upgrade(Version::V1)
        .authenticate(noise_config(keypair)?)
        .multiplex(yamux::Config::default())
        .timeout(upgrade_timeout)
        .boxed())
}

#[cfg(not(feature = "tor"))]
async fn anonymized_transport(
    _keypair: &Keypair,
    _config: &AnonymizerConfig,
    _upgrade_timeout: Duration,
) -> Result<BoxedTransport, ConstructionError> {
    Err(ConstructionError::AnonymizerUnavailable(
        "built without the `tor` feature; rebuild with `--features tor` or run with --no-tor"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_port_is_unprivileged() {
        for _ in 0..1_000 {
            let port = random_port();
            assert!(EPHEMERAL_PORT_RANGE.contains(&port));
        }
    }

    #[test]
    fn test_listen_endpoint_multiaddr() {
        let endpoint = ListenEndpoint::new(Ipv4Addr::UNSPECIFIED, 4242);
        assert_eq!(endpoint.to_multiaddr().to_string(), "/ip4/0.0.0.0/tcp/4242");
    }

    #[test]
    fn test_selection_follows_mode() {
        let listen = ListenEndpoint::new(Ipv4Addr::LOCALHOST, 5000);
        let anonymizer = AnonymizerConfig::default();

        let direct = TransportSelection::from_mode(TransportMode::Direct, listen, &anonymizer);
        assert_eq!(direct, TransportSelection::Direct { listen });
        assert_eq!(direct.mode(), TransportMode::Direct);

        let tor = TransportSelection::from_mode(TransportMode::Anonymized, listen, &anonymizer);
        assert_eq!(tor.mode(), TransportMode::Anonymized);
    }

    #[test]
    fn test_default_mode_is_anonymized() {
        assert_eq!(TransportMode::default(), TransportMode::Anonymized);
    }

    #[tokio::test]
    async fn test_direct_stack_listens_on_endpoint() {
        let keypair = Keypair::generate_ed25519();
        let listen = ListenEndpoint::new(Ipv4Addr::LOCALHOST, 4100);
        let stack = TransportSelection::Direct { listen }
            .build(&keypair, &TransportConfig::default())
            .await
            .unwrap();

        assert_eq!(stack.mode(), TransportMode::Direct);
        assert_eq!(stack.listen_address(), Some(&listen.to_multiaddr()));
    }

    #[tokio::test]
    async fn test_external_anonymizer_is_rejected() {
        let keypair = Keypair::generate_ed25519();
        let anonymizer = AnonymizerConfig {
            embedded: false,
            ..AnonymizerConfig::default()
        };
        let result = TransportSelection::Anonymized(anonymizer)
            .build(&keypair, &TransportConfig::default())
            .await;

        assert!(matches!(
            result,
            Err(ConstructionError::AnonymizerUnavailable(_))
        ));
    }

    #[cfg(feature = "tor")]
    #[tokio::test]
    async fn test_tor_bootstrap_timeout_is_unavailable() {
        let keypair = Keypair::generate_ed25519();
        let anonymizer = AnonymizerConfig {
            bootstrap_timeout_ms: 1,
            ..AnonymizerConfig::default()
        };
        let result = TransportSelection::Anonymized(anonymizer)
            .build(&keypair, &TransportConfig::default())
            .await;

        assert!(matches!(
            result,
            Err(ConstructionError::AnonymizerUnavailable(_))
        ));
    }

    #[cfg(feature = "tor")]
    #[tokio::test]
    #[ignore = "bootstraps a real Tor client over the network"]
    async fn test_tor_stack_has_no_listener() {
        let keypair = Keypair::generate_ed25519();
        let stack = TransportSelection::Anonymized(AnonymizerConfig::default())
            .build(&keypair, &TransportConfig::default())
            .await
            .unwrap();

        assert_eq!(stack.mode(), TransportMode::Anonymized);
        assert_eq!(stack.listen_address(), None);

        let behaviour = crate::behaviour::NodeBehaviour::new(keypair.public());
        let (_swarm, listen) = stack.into_swarm(
            behaviour,
            keypair.public().to_peer_id(),
            Duration::from_secs(60),
        );
        assert!(listen.is_none());
    }

    #[cfg(not(feature = "tor"))]
    #[tokio::test]
    async fn test_anonymized_requires_tor_feature() {
        let keypair = Keypair::generate_ed25519();
        let result = TransportSelection::Anonymized(AnonymizerConfig::default())
            .build(&keypair, &TransportConfig::default())
            .await;

        assert!(matches!(
            result,
            Err(ConstructionError::AnonymizerUnavailable(_))
        ));
    }
}
