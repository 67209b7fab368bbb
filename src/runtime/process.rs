//! Component processes and the thread that hosts each of them.
//!
//! Every live component (and every anonymous sink) runs on a dedicated
//! thread. The orchestrator reaches it only through a control channel;
//! data reaches it only through its input ports. The thread:
//! 1. Instantiates the process from its factory and announces its ports.
//! 2. Serves lifecycle requests (configure / start / stop) by running hooks.
//! 3. While Running, calls `update` every period or whenever an input wakes it.
//!
//! A hook that errors or panics during start or update moves the component
//! to the terminal Failed state.

use crate::error::{DataflowError, Result};
use crate::pipeline::component::{ComponentState, StateCell};
use crate::pipeline::endpoint::{InputPort, OutputPort, PortSet};
use crate::pipeline::id::ComponentId;
use crate::pipeline::param::{ParamDescriptor, Parameters};
use crate::pipeline::port::{PortDescriptor, PortDirection};
use crate::pipeline::sample::Sample;
use crate::pipeline::transport::Waker;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Idle wait of a component thread with nothing scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Creates a fresh process instance on the component's own thread.
pub type ProcessFactory = Arc<dyn Fn() -> Box<dyn ComponentProcess> + Send + Sync>;

/// How a component thread obtains its process.
pub(crate) enum ProcessInit {
    /// Built on the component thread; used for launched tasks.
    Factory(ProcessFactory),
    /// Built by the caller and moved in; used for sinks carrying callbacks.
    Instance(Box<dyn ComponentProcess>),
}

impl ProcessInit {
    fn create(self) -> Box<dyn ComponentProcess> {
        match self {
            ProcessInit::Factory(factory) => factory(),
            ProcessInit::Instance(process) => process,
        }
    }
}

/// When a running component executes its update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Every `period`, whether or not data arrived.
    Periodic(Duration),
    /// Whenever a push connection delivers to one of its inputs.
    PortDriven,
}

/// An externally implemented processing component.
///
/// Hooks return `anyhow::Result`; any error or panic raised while starting
/// or updating is fatal for the run.
pub trait ComponentProcess: Send {
    /// Ports this component exposes.
    fn ports(&self) -> Vec<PortDescriptor>;

    /// Parameters this component accepts.
    fn parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    fn activity(&self) -> Activity {
        Activity::PortDriven
    }

    /// Apply validated parameters. An error leaves the component Unconfigured.
    fn configure(&mut self, _params: &Parameters, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Process available inputs and write outputs.
    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()>;

    fn stop(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Context handed to every hook.
pub struct TaskContext {
    name: String,
    ports: PortSet,
    epoch: Option<Instant>,
    cycle: u64,
}

impl TaskContext {
    pub(crate) fn new(name: impl Into<String>, ports: PortSet) -> Self {
        Self {
            name: name.into(),
            ports,
            epoch: None,
            cycle: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn input(&self, port: &str) -> Result<&InputPort> {
        self.ports.input(port).ok_or_else(|| self.missing(port, PortDirection::Input))
    }

    pub fn output(&self, port: &str) -> Result<&OutputPort> {
        self.ports
            .output(port)
            .ok_or_else(|| self.missing(port, PortDirection::Output))
    }

    /// Next sample on `port`, if any.
    pub fn read(&self, port: &str) -> Result<Option<Sample>> {
        self.input(port)?.read()
    }

    pub fn drain(&self, port: &str) -> Result<Vec<Sample>> {
        self.input(port)?.drain()
    }

    /// Write `payload` stamped with the time since activation.
    pub fn write(&self, port: &str, payload: Value) -> Result<()> {
        self.output(port)?.write(Sample::new(self.timestamp(), payload))
    }

    /// Write a sample keeping its original timestamp.
    pub fn forward(&self, port: &str, sample: Sample) -> Result<()> {
        self.output(port)?.write(sample)
    }

    /// Time since activation; zero before `start`.
    pub fn timestamp(&self) -> Duration {
        self.epoch.map(|e| e.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Number of update calls so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    fn missing(&self, port: &str, direction: PortDirection) -> DataflowError {
        DataflowError::PortNotFound {
            component: self.name.clone(),
            port: port.to_string(),
            direction,
        }
    }
}

// ── Control channel ──

/// Lifecycle request forwarded to a component thread.
#[derive(Debug)]
pub(crate) enum ControlRequest {
    Configure(Parameters),
    Start(Instant),
    Stop,
}

impl ControlRequest {
    fn label(&self) -> &'static str {
        match self {
            ControlRequest::Configure(_) => "configure",
            ControlRequest::Start(_) => "start",
            ControlRequest::Stop => "stop",
        }
    }
}

type Reply = std::result::Result<(), String>;

pub(crate) enum ControlCommand {
    Request {
        request: ControlRequest,
        reply: Sender<Reply>,
    },
    Shutdown,
}

/// Orchestrator-side handle to a component thread.
pub(crate) struct ProcessControl {
    tx: Sender<ControlCommand>,
    state: StateCell,
    timeout: Duration,
}

impl ProcessControl {
    pub(crate) fn new(tx: Sender<ControlCommand>, state: StateCell, timeout: Duration) -> Self {
        Self { tx, state, timeout }
    }

    /// Run a lifecycle request on the component thread. The outer error is
    /// a transport failure; the inner one is the hook's own verdict.
    pub(crate) fn request(&self, component: &str, request: ControlRequest) -> Result<Reply> {
        let operation = request.label();
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .tx
            .send(ControlCommand::Request {
                request,
                reply: reply_tx,
            })
            .is_err()
        {
            return Err(self.exited(component));
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                self.state.fail(format!(
                    "no answer to {operation} within {:?}",
                    self.timeout
                ));
                tracing::error!(
                    "Component '{}' did not answer {} within {:?}",
                    component,
                    operation,
                    self.timeout
                );
                Err(DataflowError::ControlTimeout {
                    component: component.to_string(),
                    operation,
                    timeout: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.exited(component)),
        }
    }

    fn exited(&self, component: &str) -> DataflowError {
        DataflowError::ComponentFailed {
            component: component.to_string(),
            reason: self
                .state
                .failure()
                .unwrap_or_else(|| "component thread has exited".to_string()),
        }
    }
}

// ── Host thread ──

/// Message a component thread sends once its process exists.
pub(crate) enum Announcement {
    Ready {
        id: ComponentId,
        ports: PortSet,
        params: Vec<ParamDescriptor>,
    },
    Failed {
        id: ComponentId,
        reason: String,
    },
}

/// Everything a component thread needs to come up.
pub(crate) struct HostSetup {
    pub id: ComponentId,
    pub name: String,
    pub state: StateCell,
    pub init: ProcessInit,
    pub control_rx: Receiver<ControlCommand>,
    pub announce: Sender<Announcement>,
}

pub(crate) fn spawn_host(setup: HostSetup) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("task:{}", setup.name))
        .spawn(move || host_main(setup))
}

fn host_main(setup: HostSetup) {
    let HostSetup {
        id,
        name,
        state,
        init,
        control_rx,
        announce,
    } = setup;

    let fail = |reason: String| {
        tracing::error!("Component '{}' could not be created: {}", name, reason);
        state.fail(reason.clone());
        let _ = announce.send(Announcement::Failed { id, reason });
    };

    let process = match catch_unwind(AssertUnwindSafe(|| init.create())) {
        Ok(process) => process,
        Err(panic) => {
            fail(format!("factory panicked: {}", panic_message(panic)));
            return;
        }
    };

    let (waker, wake_rx) = Waker::pair();
    let ports = match PortSet::new(id, &name, &process.ports(), state.clone(), waker.clone()) {
        Ok(ports) => ports,
        Err(e) => {
            fail(e.to_string());
            return;
        }
    };

    let activity = process.activity();
    let _ = announce.send(Announcement::Ready {
        id,
        ports: ports.clone(),
        params: process.parameters(),
    });
    tracing::debug!("Component '{}' announced ({:?})", name, activity);

    let mut host = TaskHost {
        ctx: TaskContext::new(name, ports),
        state,
        process,
        activity,
        waker,
        running: false,
        next_due: None,
    };
    host.run(control_rx, wake_rx);
}

struct TaskHost {
    ctx: TaskContext,
    state: StateCell,
    process: Box<dyn ComponentProcess>,
    activity: Activity,
    waker: Waker,
    running: bool,
    next_due: Option<Instant>,
}

impl TaskHost {
    fn run(&mut self, control_rx: Receiver<ControlCommand>, wake_rx: Receiver<()>) {
        loop {
            let wait = self.wait_budget();
            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(ControlCommand::Request { request, reply }) => {
                        let result = self.handle(request);
                        let _ = reply.send(result);
                    }
                    Ok(ControlCommand::Shutdown) | Err(_) => {
                        self.shutdown();
                        return;
                    }
                },
                recv(wake_rx) -> _ => {
                    if self.running && self.activity == Activity::PortDriven {
                        self.update();
                    }
                },
                default(wait) => {}
            }

            if let (Activity::Periodic(period), Some(due)) = (self.activity, self.next_due) {
                let now = Instant::now();
                if self.running && now >= due {
                    self.update();
                    let next = due + period;
                    self.next_due = Some(if next <= now { now + period } else { next });
                }
            }
        }
    }

    fn wait_budget(&self) -> Duration {
        match (self.running, self.activity, self.next_due) {
            (true, Activity::Periodic(_), Some(due)) => due.saturating_duration_since(Instant::now()),
            _ => IDLE_WAIT,
        }
    }

    fn handle(&mut self, request: ControlRequest) -> Reply {
        match request {
            ControlRequest::Configure(params) => {
                match self.call("configure", |p, ctx| p.configure(&params, ctx)) {
                    Ok(()) => {
                        self.state.set(ComponentState::Configured);
                        Ok(())
                    }
                    Err(HookFailure::Error(reason)) => {
                        self.state.set(ComponentState::Unconfigured);
                        Err(reason)
                    }
                    Err(HookFailure::Panic(reason)) => {
                        self.state.fail(reason.clone());
                        Err(reason)
                    }
                }
            }
            ControlRequest::Start(epoch) => {
                self.ctx.epoch = Some(epoch);
                match self.call("start", |p, ctx| p.start(ctx)) {
                    Ok(()) => {
                        self.running = true;
                        self.next_due = Some(Instant::now());
                        self.state.set(ComponentState::Running);
                        // Samples may have queued while configured.
                        if self.activity == Activity::PortDriven
                            && self.ctx.ports.inputs().any(InputPort::has_queued)
                        {
                            self.waker.notify();
                        }
                        Ok(())
                    }
                    Err(failure) => {
                        let reason = failure.into_reason();
                        self.state.fail(reason.clone());
                        Err(reason)
                    }
                }
            }
            ControlRequest::Stop => {
                self.running = false;
                self.next_due = None;
                let result = self.call("stop", |p, ctx| p.stop(ctx));
                self.state.set(ComponentState::Stopped);
                result.map_err(HookFailure::into_reason)
            }
        }
    }

    fn update(&mut self) {
        self.ctx.cycle += 1;
        if let Err(failure) = self.call("update", |p, ctx| p.update(ctx)) {
            let reason = failure.into_reason();
            tracing::error!("Component '{}' failed: {}", self.ctx.name, reason);
            self.state.fail(reason);
            self.running = false;
            return;
        }
        // A wake-up may have coalesced several deliveries.
        if self.activity == Activity::PortDriven && self.ctx.ports.inputs().any(InputPort::has_queued) {
            self.waker.notify();
        }
    }

    fn shutdown(&mut self) {
        if self.running {
            self.running = false;
            if let Err(failure) = self.call("stop", |p, ctx| p.stop(ctx)) {
                tracing::warn!("{}", failure.into_reason());
            }
            self.state.set(ComponentState::Stopped);
        }
        tracing::debug!("Component thread '{}' exiting", self.ctx.name);
    }

    fn call<F>(&mut self, hook: &'static str, f: F) -> std::result::Result<(), HookFailure>
    where
        F: FnOnce(&mut dyn ComponentProcess, &mut TaskContext) -> anyhow::Result<()>,
    {
        let process = self.process.as_mut();
        let ctx = &mut self.ctx;
        match catch_unwind(AssertUnwindSafe(|| f(process, ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HookFailure::Error(format!("{hook} hook failed: {e:#}"))),
            Err(panic) => Err(HookFailure::Panic(format!(
                "{hook} hook panicked: {}",
                panic_message(panic)
            ))),
        }
    }
}

enum HookFailure {
    Error(String),
    Panic(String),
}

impl HookFailure {
    fn into_reason(self) -> String {
        match self {
            HookFailure::Error(reason) | HookFailure::Panic(reason) => reason,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
