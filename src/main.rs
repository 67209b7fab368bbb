//! uwv-run - runs a dataflow described by a run configuration
//!
//! Usage: `uwv-run <config.toml|config.json>`
//!
//! Launches the configured deployments and relays, opens the replay logs,
//! wires and activates the graph, then runs until every replay has ended,
//! a component fails, or the process receives SIGINT/SIGTERM.

use anyhow::Context;
use std::path::PathBuf;
use uwv_dataflow::{
    config::RunConfig,
    logging, os_signals,
    runtime::{assemble, Catalog},
};

fn main() -> anyhow::Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: uwv-run <config.toml|config.json>")?;

    let config = RunConfig::load(&path)
        .with_context(|| format!("loading run config {}", path.display()))?;

    let _log_guard = logging::init(&config.logging);
    tracing::info!("Starting run from {}", path.display());

    let mut orchestrator = assemble(&config, Catalog::new()).context("assembling the dataflow")?;
    os_signals::install_stop_handler(orchestrator.stop_signal())
        .context("installing the signal handler")?;
    let completion = orchestrator.run().context("running the dataflow")?;
    tracing::info!("Run finished: {:?}", completion);

    for subscription in orchestrator.subscriptions() {
        tracing::info!(
            "{}: {} delivered, {} throttled",
            subscription.source,
            subscription.delivered(),
            subscription.throttled()
        );
    }

    tracing::info!("Shutting down...");
    orchestrator.shutdown();
    Ok(())
}
