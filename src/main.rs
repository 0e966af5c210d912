//! Tridimensional Duels Server
//!
//! Authoritative session server for Tridimensional Duels.
//! Configuration comes from the environment (see `config`).

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tridimensional_duels::{
    AppConfig, VERSION,
    network::{GameServer, SessionBroker},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Tridimensional Duels Server v{}", VERSION);

    let config = AppConfig::from_env().context("invalid configuration")?;
    let ruleset = config.load_ruleset().context("failed to load ruleset")?;
    info!(
        cards = ruleset.catalog.len(),
        deck = ruleset.rules.deck.len(),
        board = ?ruleset.rules.board,
        "Ruleset loaded"
    );

    let broker = Arc::new(SessionBroker::new(Arc::new(ruleset), config.session.clone()));
    let server = Arc::new(GameServer::new(config.server.clone(), broker));

    let running = server.clone();
    let mut serve = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = &mut serve => {
            result.context("server task panicked")??;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
            serve.await.context("server task panicked")??;
        }
    }

    info!("Server stopped");
    Ok(())
}
