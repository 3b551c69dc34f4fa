//! shroud-node: run a libp2p node, over Tor unless `--no-tor` is given, and
//! join the network through the configured bootnodes.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use shroud_p2p::{parse_many, BootstrapError, Node};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// The network layer logs at debug unless `RUST_LOG` says otherwise.
const DEFAULT_LOG_FILTER: &str = "info,shroud_p2p=debug";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    let bootnodes = parse_many(&cli.bootnodes).context("invalid --bootnodes")?;
    let config = cli.node_config()?;
    let strict = config.bootstrap.strict;

    let mut node = Node::construct(config)
        .await
        .context("failed to start node")?;

    for address in node.advertised_addresses() {
        println!("{}", address);
    }
    info!(
        peer = %node.peer_id(),
        mode = node.mode().description(),
        bootnodes = bootnodes.len(),
        "node started"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let bootstrap = tokio::select! {
        result = node.bootstrap(bootnodes) => Some(result),
        _ = &mut shutdown => None,
    };

    match bootstrap {
        Some(Ok(summary)) => {
            for outcome in summary.outcomes.iter().filter(|o| !o.succeeded()) {
                warn!(peer = %outcome.peer, error = ?outcome.error, "bootnode unreachable");
            }
        }
        Some(Err(e)) => {
            report_failed_bootstrap(&e);
            if strict {
                node.shutdown().await;
                return Err(e).context("bootstrap failed and --strict-bootstrap is set");
            }
            error!("no bootnode reachable, continuing standalone");
        }
        None => {
            println!("signal interrupt, shutting down...");
            node.shutdown().await;
            return Ok(());
        }
    }

    shutdown.await;
    println!("signal interrupt, shutting down...");
    node.shutdown().await;
    Ok(())
}

fn report_failed_bootstrap(e: &BootstrapError) {
    for outcome in &e.summary().outcomes {
        error!(peer = %outcome.peer, error = ?outcome.error, "bootnode unreachable");
    }
    error!("{}", e);
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
