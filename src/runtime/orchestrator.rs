//! Orchestrator: builds the graph, activates it and runs it to completion.
//!
//! ```text
//!   Building ──activate──▶ Active ──run──▶ (Stopped | EndOfReplay)
//!      │                     │                    │
//!      └─────────────────────┴──shutdown / Drop───┴──▶ Finished
//! ```
//!
//! All graph and lifecycle work happens on the caller's thread. Component
//! threads only run hooks and move samples. Teardown stops components in
//! reverse activation order, removes every connection and joins every
//! thread; it runs on `Drop` so a run scope always cleans up.

use crate::config::{parse_address, RuntimeSettings};
use crate::error::{DataflowError, Result};
use crate::pipeline::component::{Component, ComponentKind, ComponentState};
use crate::pipeline::graph::ConnectionGraph;
use crate::pipeline::id::{ComponentId, ConnectionId, ReplayId, SubscriptionId};
use crate::pipeline::nodes::{
    DisplayKind, RecorderSinkNode, SharedSink, SubscriptionSink, RECORDER_BUFFER, SINK_INPUT,
};
use crate::pipeline::param::ParamValue;
use crate::pipeline::plan::{GraphCompiler, GraphPlan};
use crate::pipeline::policy::ConnectionPolicy;
use crate::pipeline::port::{PortAddress, PortDescriptor, PortDirection, TypeName};
use crate::pipeline::rate_limit::RateLimiter;
use crate::pipeline::sample::Sample;
use crate::pipeline::subscription::{Subscription, SubscriptionStats};
use crate::replay::clock::PlaybackMode;
use crate::replay::source::{ReplaySource, StepOutcome};
use crate::runtime::catalog::Catalog;
use crate::runtime::process::{ComponentProcess, ProcessInit};
use crate::runtime::registry::Registry;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The stop signal was raised.
    Stopped,
    /// Every replay played its last record.
    EndOfReplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    Active,
    Finished,
}

pub struct Orchestrator {
    settings: RuntimeSettings,
    catalog: Catalog,
    registry: Registry,
    graph: ConnectionGraph,
    replays: Vec<ReplaySource>,
    subscriptions: Vec<Subscription>,
    next_subscription: u32,
    activation_order: Vec<ComponentId>,
    plan: Option<GraphPlan>,
    phase: Phase,
    stop: Arc<AtomicBool>,
    epoch: Option<Instant>,
}

impl Orchestrator {
    pub fn new(settings: RuntimeSettings, catalog: Catalog) -> Self {
        tracing::debug!("Creating orchestrator with {:?}", settings);
        Self {
            registry: Registry::new(settings.control_timeout()),
            graph: ConnectionGraph::new(settings.backpressure_timeout()),
            settings,
            catalog,
            replays: Vec::new(),
            subscriptions: Vec::new(),
            next_subscription: 0,
            activation_order: Vec::new(),
            plan: None,
            phase: Phase::Building,
            stop: Arc::new(AtomicBool::new(false)),
            epoch: None,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Raising this flag makes `run` return `Completion::Stopped`.
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    /// Plan compiled by the last `activate`.
    pub fn plan(&self) -> Option<&GraphPlan> {
        self.plan.as_ref()
    }

    /// Instant live timestamps count from, once active.
    pub fn epoch(&self) -> Option<Instant> {
        self.epoch
    }

    // ── Building ──

    /// Launch a deployment from the catalog.
    pub fn launch(&mut self, deployment: &str) -> Result<Vec<ComponentId>> {
        self.ensure_building()?;
        self.registry.launch(&self.catalog, deployment)
    }

    /// Load replay logs and expose one component per file.
    pub fn open_replay(&mut self, files: &[PathBuf], mode: PlaybackMode) -> Result<ReplayId> {
        self.ensure_building()?;
        let source = ReplaySource::open(files, mode, &mut self.registry)?;
        let id = ReplayId(self.replays.len() as u32);
        tracing::info!(
            "Opened replay {:?} with {} records from {} files",
            id,
            source.len(),
            files.len()
        );
        self.replays.push(source);
        Ok(id)
    }

    pub fn replay(&self, id: ReplayId) -> Result<&ReplaySource> {
        self.replays.get(id.index()).ok_or_else(|| Self::unknown_replay(id))
    }

    pub fn replay_mut(&mut self, id: ReplayId) -> Result<&mut ReplaySource> {
        self.replays
            .get_mut(id.index())
            .ok_or_else(|| Self::unknown_replay(id))
    }

    fn unknown_replay(id: ReplayId) -> DataflowError {
        DataflowError::NotFound {
            name: format!("replay {:?}", id),
            waited: Duration::ZERO,
        }
    }

    /// Resolve a component name within the configured wait budget.
    pub fn resolve(&mut self, name: &str) -> Result<ComponentId> {
        self.registry.resolve(name, self.settings.wait_budget())
    }

    pub fn resolve_within(&mut self, name: &str, wait: Duration) -> Result<ComponentId> {
        self.registry.resolve(name, wait)
    }

    pub fn component(&self, id: ComponentId) -> Result<&Component> {
        self.registry.component(id)
    }

    pub fn state(&self, id: ComponentId) -> Result<ComponentState> {
        self.registry.component(id).map(Component::state)
    }

    pub fn set_parameter(&mut self, id: ComponentId, name: &str, value: ParamValue) -> Result<()> {
        self.registry.component_mut(id)?.set_parameter(name, value)
    }

    pub fn parameter(&self, id: ComponentId, name: &str) -> Result<Option<&ParamValue>> {
        Ok(self.registry.component(id)?.parameter(name))
    }

    /// Wire `from.from_port` to `to.to_port`.
    pub fn connect(
        &mut self,
        from: ComponentId,
        from_port: &str,
        to: ComponentId,
        to_port: &str,
        policy: ConnectionPolicy,
    ) -> Result<ConnectionId> {
        let source = self.registry.component(from)?;
        let destination = self.registry.component(to)?;
        let id = self
            .graph
            .connect(source, from_port, destination, to_port, policy)?;
        tracing::debug!(
            "Connected {}.{} -> {}.{} as {}",
            source.name(),
            from_port,
            destination.name(),
            to_port,
            id
        );
        Ok(id)
    }

    /// Resolve two `component.port` addresses and connect them.
    pub fn connect_by_name(
        &mut self,
        from: &str,
        to: &str,
        policy: ConnectionPolicy,
    ) -> Result<ConnectionId> {
        let from = parse_address(from)?;
        let to = parse_address(to)?;
        let source = self.resolve(&from.component)?;
        let destination = self.resolve(&to.component)?;
        self.connect(source, &from.port, destination, &to.port, policy)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        self.graph.disconnect(id)
    }

    // ── Lifecycle ──

    /// Configure one component ahead of activation.
    pub fn configure(&mut self, id: ComponentId) -> Result<()> {
        self.registry.component_mut(id)?.configure()
    }

    /// Start one configured component. Its timestamps count from the run
    /// epoch, fixed by the first start.
    pub fn start(&mut self, id: ComponentId) -> Result<()> {
        let epoch = *self.epoch.get_or_insert_with(Instant::now);
        self.registry.component_mut(id)?.start(epoch)?;
        if !self.activation_order.contains(&id) {
            self.activation_order.push(id);
        }
        Ok(())
    }

    pub fn stop(&mut self, id: ComponentId) -> Result<()> {
        self.registry.component_mut(id)?.stop()
    }

    // ── Sinks ──

    /// Invoke `callback` with samples of `component.port`, at most
    /// `frequency` times per second.
    pub fn subscribe<F>(
        &mut self,
        component: ComponentId,
        port: &str,
        frequency: f64,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: FnMut(&Sample) + Send + 'static,
    {
        self.ensure_building()?;
        let (source, type_name) = self.output_type(component, port)?;
        let limiter =
            RateLimiter::new(frequency).map_err(|reason| DataflowError::InvalidConfiguration {
                component: source.to_string(),
                reason,
            })?;

        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        let stats = Arc::new(SubscriptionStats::default());
        let node = SubscriptionSink::new(type_name, limiter, Box::new(callback), Arc::clone(&stats));

        let sink = self.spawn_sink(&format!("subscription#{}:{}", id.0, source), node)?;
        let connection = self.connect(component, port, sink, SINK_INPUT, ConnectionPolicy::data())?;

        tracing::info!("Subscribed to {} at {} Hz", source, frequency);
        self.subscriptions.push(Subscription {
            id,
            source,
            frequency,
            sink,
            connection,
            stats,
        });
        Ok(id)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.id == id)
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Feed `component.port` into a visualization sink.
    pub fn display(
        &mut self,
        component: ComponentId,
        port: &str,
        kind: DisplayKind,
        sink: SharedSink,
        frequency: f64,
    ) -> Result<SubscriptionId> {
        self.subscribe(component, port, frequency, move |sample| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(kind, sample);
        })
    }

    /// Record every output port of every live component to
    /// `<dir>/<component>.log`.
    pub fn log_all_ports(&mut self, dir: impl AsRef<Path>) -> Result<Vec<ComponentId>> {
        self.ensure_building()?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let targets: Vec<(ComponentId, String, Vec<PortDescriptor>)> = self
            .registry
            .iter()
            .filter(|c| c.kind() == ComponentKind::LiveProcess)
            .map(|c| {
                let outputs: Vec<PortDescriptor> =
                    c.ports().outputs().map(|o| o.descriptor().clone()).collect();
                (c.id(), c.name().to_string(), outputs)
            })
            .filter(|(_, _, outputs)| !outputs.is_empty())
            .collect();

        let mut recorders = Vec::with_capacity(targets.len());
        for (id, name, outputs) in targets {
            let path = dir.join(format!("{name}.log"));
            let node = RecorderSinkNode::new(name.as_str(), path, &outputs);
            let recorder = self.spawn_sink(&format!("recorder:{name}"), node)?;
            for output in &outputs {
                self.connect(
                    id,
                    &output.name,
                    recorder,
                    &output.name,
                    ConnectionPolicy::buffer(RECORDER_BUFFER),
                )?;
            }
            recorders.push(recorder);
        }

        tracing::info!(
            "Recording {} components to {}",
            recorders.len(),
            dir.display()
        );
        Ok(recorders)
    }

    fn spawn_sink<P>(&mut self, name: &str, node: P) -> Result<ComponentId>
    where
        P: ComponentProcess + 'static,
    {
        let id = self.registry.spawn(
            name,
            ComponentKind::Sink,
            ProcessInit::Instance(Box::new(node)),
            None,
        )?;
        self.registry
            .await_component(id, self.settings.wait_budget())?;
        Ok(id)
    }

    fn output_type(&self, component: ComponentId, port: &str) -> Result<(PortAddress, TypeName)> {
        let c = self.registry.component(component)?;
        let output = c
            .ports()
            .output(port)
            .ok_or_else(|| DataflowError::PortNotFound {
                component: c.name().to_string(),
                port: port.to_string(),
                direction: PortDirection::Output,
            })?;
        Ok((
            PortAddress::new(c.name(), port),
            output.descriptor().type_name.clone(),
        ))
    }

    // ── Activation ──

    /// Compile the current graph without changing it.
    pub fn compile(&self) -> GraphPlan {
        let components: Vec<&Component> = self.registry.iter().collect();
        GraphCompiler::compile(&components, &self.graph)
    }

    /// Configure every component, then start every component.
    ///
    /// Nothing is started unless every component configured. Afterwards the
    /// graph is sealed.
    pub fn activate(&mut self) -> Result<()> {
        self.ensure_building()?;
        self.registry.await_all(self.settings.wait_budget())?;

        let plan = self.compile();
        if let Some(cycle) = plan.blocking_cycle.clone() {
            return Err(DataflowError::CyclicBackpressure { cycle });
        }
        for input in &plan.unconnected_inputs {
            tracing::warn!("Input {} has no connection", input);
        }
        tracing::info!(
            "Compiled graph: {} components, {} connections ({} blocking) in {}us",
            plan.stats.components,
            plan.stats.connections,
            plan.stats.blocking_connections,
            plan.stats.compile_time_us
        );
        self.plan = Some(plan);

        // Components started by hand keep running and keep their place.
        let running = std::mem::take(&mut self.activation_order);
        let pending: Vec<ComponentId> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| !running.contains(id))
            .collect();
        self.activation_order = running;

        for &id in &pending {
            self.registry.component_mut(id)?.configure()?;
        }

        let epoch = *self.epoch.get_or_insert_with(Instant::now);
        for (started, &id) in pending.iter().enumerate() {
            if let Err(e) = self.registry.component_mut(id)?.start(epoch) {
                tracing::warn!("Activation aborted: {}", e);
                self.stop_components(pending[..started].iter().rev().copied());
                return Err(e);
            }
        }

        let now = Instant::now();
        for replay in &mut self.replays {
            replay.start(now);
        }

        self.graph.seal();
        self.activation_order.extend(pending);
        self.phase = Phase::Active;
        tracing::info!("Activated {} components", self.activation_order.len());
        Ok(())
    }

    fn ensure_building(&self) -> Result<()> {
        match self.phase {
            Phase::Building => Ok(()),
            Phase::Active | Phase::Finished => Err(DataflowError::GraphSealed),
        }
    }

    // ── Running ──

    /// Release the next record of a replay.
    pub fn step_replay(&mut self, id: ReplayId) -> Result<StepOutcome> {
        self.replay_mut(id)?.step()
    }

    /// Drive real-time replays and watch component health until the stop
    /// signal, the end of every replay or, with `fail_fast`, a failed
    /// component. Step replays only advance through `step_replay`. Activates
    /// first when still building.
    pub fn run(&mut self) -> Result<Completion> {
        match self.phase {
            Phase::Building => self.activate()?,
            Phase::Active => {}
            Phase::Finished => return Err(DataflowError::GraphSealed),
        }

        let paced: Vec<usize> = self
            .replays
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r.mode(), PlaybackMode::RealTime { .. }))
            .map(|(i, _)| i)
            .collect();
        let poll = self.settings.poll_interval();
        let mut reported: HashSet<ComponentId> = HashSet::new();

        loop {
            if self.stop.load(Ordering::Acquire) {
                tracing::info!("Stop requested");
                return Ok(Completion::Stopped);
            }

            let now = Instant::now();
            for &index in &paced {
                self.replays[index].pump(now)?;
            }

            self.check_failures(&mut reported)?;

            if !self.replays.is_empty() && self.replays.iter().all(ReplaySource::is_finished) {
                tracing::info!("All replays finished");
                return Ok(Completion::EndOfReplay);
            }

            let wait = paced
                .iter()
                .filter_map(|&i| self.replays[i].next_due())
                .min()
                .map(|due| due.saturating_duration_since(Instant::now()).min(poll))
                .unwrap_or(poll);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    fn check_failures(&self, reported: &mut HashSet<ComponentId>) -> Result<()> {
        for component in self.registry.iter() {
            if component.state() != ComponentState::Failed || !reported.insert(component.id()) {
                continue;
            }
            let reason = component
                .failure()
                .unwrap_or_else(|| "unknown failure".to_string());
            tracing::warn!("Component '{}' failed: {}", component.name(), reason);
            if self.settings.fail_fast {
                return Err(DataflowError::ComponentFailed {
                    component: component.name().to_string(),
                    reason,
                });
            }
        }
        Ok(())
    }

    // ── Teardown ──

    /// Stop components in reverse activation order, remove all connections
    /// and subscriptions, join every thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::Finished {
            return;
        }
        let order = std::mem::take(&mut self.activation_order);
        self.stop_components(order.into_iter().rev());
        self.graph.clear();
        self.subscriptions.clear();
        self.registry.shutdown();
        self.phase = Phase::Finished;
        tracing::info!("Orchestrator shut down");
    }

    fn stop_components(&mut self, ids: impl Iterator<Item = ComponentId>) {
        for id in ids {
            let Some(component) = self.registry.get_mut(id) else {
                continue;
            };
            if !matches!(
                component.state(),
                ComponentState::Running | ComponentState::Configured
            ) {
                continue;
            }
            if let Err(e) = component.stop() {
                tracing::warn!("Failed to stop '{}': {}", component.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phase", &self.phase)
            .field("components", &self.registry.len())
            .field("connections", &self.graph.len())
            .field("replays", &self.replays)
            .field("subscriptions", &self.subscriptions.len())
            .field("activated", &self.activation_order.len())
            .finish()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `body` against a fresh orchestrator and tear it down afterwards,
/// whatever `body` returns.
pub fn run_scoped<T, F>(settings: RuntimeSettings, catalog: Catalog, body: F) -> Result<T>
where
    F: FnOnce(&mut Orchestrator) -> Result<T>,
{
    let mut orchestrator = Orchestrator::new(settings, catalog);
    let result = body(&mut orchestrator);
    orchestrator.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::RelayNode;
    use crate::runtime::process::{Activity, TaskContext};
    use serde_json::json;
    use std::sync::Mutex;

    const POSE: &str = "/base/samples/RigidBodyState";

    struct Ticker;

    impl ComponentProcess for Ticker {
        fn ports(&self) -> Vec<PortDescriptor> {
            vec![PortDescriptor::output("pose", POSE)]
        }

        fn activity(&self) -> Activity {
            Activity::Periodic(Duration::from_millis(5))
        }

        fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
            ctx.write("pose", json!({ "cycle": ctx.cycle() }))?;
            Ok(())
        }
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            wait_budget_ms: 2000,
            ..RuntimeSettings::default()
        }
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .register("nav", "ticker", || Ticker)
            .register("nav", "relay", || RelayNode::new(POSE));
        catalog
    }

    #[test]
    fn test_activate_then_graph_is_sealed() {
        let mut orch = Orchestrator::new(settings(), catalog());
        orch.launch("nav").unwrap();
        orch.connect_by_name("ticker.pose", "relay.in", ConnectionPolicy::data())
            .unwrap();
        orch.activate().unwrap();

        let relay = orch.resolve("relay").unwrap();
        assert_eq!(orch.state(relay).unwrap(), ComponentState::Running);
        assert!(matches!(
            orch.connect_by_name("relay.out", "relay.in", ConnectionPolicy::data()),
            Err(DataflowError::GraphSealed)
        ));
        orch.shutdown();
        orch.shutdown();
    }

    #[test]
    fn test_required_input_blocks_every_start() {
        let mut orch = Orchestrator::new(settings(), catalog());
        orch.launch("nav").unwrap();
        let err = orch.activate().unwrap_err();
        assert!(matches!(err, DataflowError::InvalidConfiguration { .. }));

        let ticker = orch.resolve("ticker").unwrap();
        assert_ne!(orch.state(ticker).unwrap(), ComponentState::Running);
    }

    #[test]
    fn test_subscription_receives_samples() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut orch = Orchestrator::new(settings(), catalog());
        orch.launch("nav").unwrap();
        let ticker = orch.resolve("ticker").unwrap();
        let relay = orch.resolve("relay").unwrap();
        orch.connect(ticker, "pose", relay, "in", ConnectionPolicy::buffer(10))
            .unwrap();
        let sub = orch
            .subscribe(relay, "out", 1000.0, move |s| {
                sink.lock().unwrap().push(s.timestamp);
            })
            .unwrap();
        orch.activate().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(seen.lock().unwrap().len() >= 3);
        assert!(orch.subscription(sub).unwrap().delivered() >= 3);
    }

    #[test]
    fn test_debug_summarizes_the_run() {
        let mut orch = Orchestrator::new(settings(), catalog());
        orch.launch("nav").unwrap();
        orch.resolve("ticker").unwrap();
        orch.resolve("relay").unwrap();
        let text = format!("{orch:?}");
        assert!(text.contains("phase: Building"), "{text}");
        assert!(text.contains("components: 2"), "{text}");
    }

    #[test]
    fn test_run_stops_on_signal() {
        let mut orch = Orchestrator::new(settings(), catalog());
        orch.launch("nav").unwrap();
        orch.connect_by_name("ticker.pose", "relay.in", ConnectionPolicy::data())
            .unwrap();
        orch.stop_signal().store(true, Ordering::Release);
        assert_eq!(orch.run().unwrap(), Completion::Stopped);
    }

    #[test]
    fn test_run_scoped_tears_down_on_error() {
        let result: Result<()> = run_scoped(settings(), catalog(), |orch| {
            orch.launch("nav")?;
            orch.connect_by_name("ticker.pose", "relay.missing", ConnectionPolicy::data())?;
            Ok(())
        });
        assert!(matches!(result, Err(DataflowError::PortNotFound { .. })));
    }
}
