//! Builds an orchestrator from a `RunConfig`.
//!
//! Order matters: deployments are launched first so their tasks announce
//! themselves while the replay logs load, then parameters, connections,
//! displays and recorders are applied against resolved components.

use crate::config::{parse_address, RunConfig};
use crate::error::{Result, ResultExt};
use crate::pipeline::nodes::{RelayNode, SharedSink, TracingSink};
use crate::runtime::catalog::Catalog;
use crate::runtime::orchestrator::Orchestrator;
use std::sync::{Arc, Mutex};

/// Deployment holding the relay tasks declared in a run config.
pub const RELAY_DEPLOYMENT: &str = "builtin_relays";

/// Add the config's relay tasks to `catalog`.
pub fn register_relays(config: &RunConfig, catalog: &mut Catalog) {
    for relay in &config.relays {
        let type_name = relay.type_name.clone();
        catalog.register(RELAY_DEPLOYMENT, &relay.name, move || {
            RelayNode::new(type_name.as_str())
        });
    }
}

/// Launch, load and wire everything `config` describes. The returned
/// orchestrator is still building; call `activate` or `run` next.
pub fn assemble(config: &RunConfig, mut catalog: Catalog) -> Result<Orchestrator> {
    register_relays(config, &mut catalog);
    let mut orch = Orchestrator::new(config.runtime.clone(), catalog);

    for deployment in &config.deployments {
        orch.launch(deployment)
            .with_context(|| format!("launching deployment '{deployment}'"))?;
    }
    if !config.relays.is_empty() {
        orch.launch(RELAY_DEPLOYMENT)?;
    }

    if let Some(replay) = config.replay.as_ref().filter(|r| !r.files.is_empty()) {
        let id = orch.open_replay(&replay.files, replay.playback)?;
        let source = orch.replay(id)?;
        for (task, channels) in &replay.require {
            let names: Vec<&str> = channels.iter().map(String::as_str).collect();
            source.require_channels(task, &names)?;
        }
    }

    for (component, params) in &config.parameters {
        let id = orch.resolve(component)?;
        for (name, value) in params {
            orch.set_parameter(id, name, value.clone())?;
        }
    }

    for conn in &config.connections {
        orch.connect_by_name(&conn.from, &conn.to, conn.policy)
            .with_context(|| format!("connecting {} -> {}", conn.from, conn.to))?;
    }

    for display in &config.displays {
        let address = parse_address(&display.port)?;
        let id = orch.resolve(&address.component)?;
        let sink: SharedSink = Arc::new(Mutex::new(TracingSink::new(display.port.as_str())));
        orch.display(id, &address.port, display.kind, sink, display.frequency)?;
    }

    if let Some(record) = &config.record {
        orch.log_all_ports(&record.dir)?;
    }

    tracing::info!(
        "Assembled run: {} components, {} connections",
        orch.registry().len(),
        orch.graph().len()
    );
    Ok(orch)
}
