//! Command-line flags and how they map onto [`NodeConfig`].

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shroud_p2p::{BootstrapStrategy, NodeConfig, TransportMode};

/// Run a libp2p node, over Tor by default.
#[derive(Parser, Debug)]
#[command(name = "shroud-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run a normal libp2p node without Tor
    #[arg(long, env = "SHROUD_NO_TOR")]
    pub no_tor: bool,

    /// Comma-separated list of bootnodes (multiaddrs ending in /p2p/<peer-id>)
    #[arg(long, env = "SHROUD_BOOTNODES", default_value = "")]
    pub bootnodes: String,

    /// Listen port (default: random non-privileged port)
    #[arg(long, env = "SHROUD_PORT")]
    pub port: Option<u16>,

    /// Listen host for direct mode
    #[arg(long, env = "SHROUD_LISTEN_HOST")]
    pub listen_host: Option<Ipv4Addr>,

    /// Keep the node identity in this file across restarts
    #[arg(long, env = "SHROUD_IDENTITY")]
    pub identity: Option<PathBuf>,

    /// JSON node configuration; flags given here take precedence
    #[arg(long, env = "SHROUD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Upper bound for each bootnode connection attempt, in milliseconds
    #[arg(long, env = "SHROUD_DIAL_TIMEOUT_MS")]
    pub dial_timeout_ms: Option<u64>,

    /// Dial all bootnodes at once instead of one after another
    #[arg(long, env = "SHROUD_CONCURRENT_BOOTSTRAP")]
    pub concurrent_bootstrap: bool,

    /// Exit with an error when no bootnode can be reached
    #[arg(long, env = "SHROUD_STRICT_BOOTSTRAP")]
    pub strict_bootstrap: bool,
}

impl Cli {
    /// Load the config file, if any, and apply the flags on top of it.
    pub fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_json_file(path).context("loading node configuration")?,
            None => NodeConfig::default(),
        };

        if self.no_tor {
            config.mode = TransportMode::Direct;
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(host) = self.listen_host {
            config.listen.host = host;
        }
        if let Some(path) = &self.identity {
            config.identity_path = Some(path.clone());
        }
        if let Some(ms) = self.dial_timeout_ms {
            config.bootstrap.dial_timeout_ms = ms;
        }
        if self.concurrent_bootstrap {
            config.bootstrap.strategy = BootstrapStrategy::Concurrent;
        }
        if self.strict_bootstrap {
            config.bootstrap.strict = true;
        }

        Ok(config)
    }
}
