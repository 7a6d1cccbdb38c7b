use anyhow::{Context, Result};
use pollrelay::RelayBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pollrelay=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut relay = RelayBuilder::new()
        .bind()
        .inspect_err(|e| error!(error = %e, "failed to get listener socket"))
        .context("failed to get listener socket")?;

    match relay.local_addr() {
        Ok(addr) => info!(%addr, "waiting for connections"),
        Err(_) => info!("waiting for connections"),
    }

    relay
        .run()
        .inspect_err(|e| error!(error = %e, "event loop stopped"))
        .context("event loop stopped")
}
