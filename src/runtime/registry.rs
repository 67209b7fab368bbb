//! Component registry: name resolution and ownership of component threads.
//!
//! Live components become resolvable once their thread has created the
//! process and announced its ports. Replay components are registered
//! directly when a log is opened. Names are claimed by their source; two
//! claims on one name make it ambiguous.

use crate::error::{DataflowError, Result};
use crate::pipeline::component::{Component, ComponentKind, Control, StateCell};
use crate::pipeline::endpoint::PortSet;
use crate::pipeline::id::ComponentId;
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::transport::Waker;
use crate::runtime::catalog::Catalog;
use crate::runtime::process::{
    spawn_host, Announcement, ControlCommand, HostSetup, ProcessControl, ProcessInit,
};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const CONTROL_QUEUE: usize = 16;

struct PendingHost {
    name: String,
    kind: ComponentKind,
    state: StateCell,
    control: ProcessControl,
}

struct HostHandle {
    name: String,
    tx: Sender<ControlCommand>,
    join: Option<JoinHandle<()>>,
}

/// A name claim and who made it.
#[derive(Debug, Clone)]
struct Claim {
    id: ComponentId,
    origin: String,
}

pub struct Registry {
    components: Vec<Option<Component>>,
    names: Vec<String>,
    claims: HashMap<String, Vec<Claim>>,
    pending: HashMap<ComponentId, PendingHost>,
    failed: HashMap<ComponentId, String>,
    hosts: Vec<HostHandle>,
    announce_tx: Sender<Announcement>,
    announce_rx: Receiver<Announcement>,
    control_timeout: Duration,
}

impl Registry {
    pub fn new(control_timeout: Duration) -> Self {
        let (announce_tx, announce_rx) = unbounded();
        Self {
            components: Vec::new(),
            names: Vec::new(),
            claims: HashMap::new(),
            pending: HashMap::new(),
            failed: HashMap::new(),
            hosts: Vec::new(),
            announce_tx,
            announce_rx,
            control_timeout,
        }
    }

    // ── Creation ──

    /// Launch every task of `deployment`. Returns immediately; tasks become
    /// resolvable as they announce themselves.
    pub fn launch(&mut self, catalog: &Catalog, deployment: &str) -> Result<Vec<ComponentId>> {
        let tasks = catalog
            .deployment(deployment)
            .ok_or_else(|| DataflowError::Config(format!("unknown deployment '{deployment}'")))?;

        tracing::info!("Launching deployment '{}' ({} tasks)", deployment, tasks.len());
        let origin = format!("deployment '{deployment}'");
        tasks
            .iter()
            .map(|task| {
                self.spawn(
                    &task.name,
                    ComponentKind::LiveProcess,
                    ProcessInit::Factory(task.factory.clone()),
                    Some(&origin),
                )
            })
            .collect()
    }

    /// Start a component thread. Sinks pass no origin and claim no name.
    pub(crate) fn spawn(
        &mut self,
        name: &str,
        kind: ComponentKind,
        init: ProcessInit,
        origin: Option<&str>,
    ) -> Result<ComponentId> {
        let id = self.allocate(name);
        let state = StateCell::new();
        let (tx, control_rx) = bounded(CONTROL_QUEUE);

        let join = spawn_host(HostSetup {
            id,
            name: name.to_string(),
            state: state.clone(),
            init,
            control_rx,
            announce: self.announce_tx.clone(),
        })?;

        self.pending.insert(
            id,
            PendingHost {
                name: name.to_string(),
                kind,
                state: state.clone(),
                control: ProcessControl::new(tx.clone(), state, self.control_timeout),
            },
        );
        self.hosts.push(HostHandle {
            name: name.to_string(),
            tx,
            join: Some(join),
        });
        if let Some(origin) = origin {
            self.claim(name, id, origin);
        }
        Ok(id)
    }

    /// Register a hook-less component, e.g. a replayed task.
    pub(crate) fn register_local(
        &mut self,
        name: &str,
        kind: ComponentKind,
        ports: &[PortDescriptor],
        origin: &str,
    ) -> Result<ComponentId> {
        let id = ComponentId(self.components.len() as u32);
        let state = StateCell::new();
        let (waker, _) = Waker::pair();
        let ports = PortSet::new(id, name, ports, state.clone(), waker)?;
        let allocated = self.allocate(name);
        debug_assert_eq!(allocated, id);
        self.components[id.index()] = Some(Component::new(
            id,
            name,
            kind,
            ports,
            Vec::new(),
            state,
            Control::Local,
        ));
        self.claim(name, id, origin);
        Ok(id)
    }

    fn allocate(&mut self, name: &str) -> ComponentId {
        let id = ComponentId(self.components.len() as u32);
        self.components.push(None);
        self.names.push(name.to_string());
        id
    }

    fn claim(&mut self, name: &str, id: ComponentId, origin: &str) {
        self.claims.entry(name.to_string()).or_default().push(Claim {
            id,
            origin: origin.to_string(),
        });
    }

    // ── Announcements ──

    fn pump(&mut self) {
        while let Ok(announcement) = self.announce_rx.try_recv() {
            self.accept(announcement);
        }
    }

    fn accept(&mut self, announcement: Announcement) {
        match announcement {
            Announcement::Ready { id, ports, params } => {
                let Some(pending) = self.pending.remove(&id) else {
                    return;
                };
                tracing::debug!("Component '{}' is ready as {}", pending.name, id);
                self.components[id.index()] = Some(Component::new(
                    id,
                    pending.name,
                    pending.kind,
                    ports,
                    params,
                    pending.state,
                    Control::Process(pending.control),
                ));
            }
            Announcement::Failed { id, reason } => {
                self.pending.remove(&id);
                self.failed.insert(id, reason);
            }
        }
    }

    /// Wait until `deadline` for one more announcement. Returns false on
    /// timeout.
    fn wait_announcement(&mut self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match self.announce_rx.recv_timeout(remaining) {
            Ok(announcement) => {
                self.accept(announcement);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    // ── Resolution ──

    /// Resolve `name`, waiting up to `wait` for its announcement.
    pub fn resolve(&mut self, name: &str, wait: Duration) -> Result<ComponentId> {
        let deadline = Instant::now() + wait;
        loop {
            self.pump();
            if let Some(claims) = self.claims.get(name) {
                if let [first, second, ..] = claims.as_slice() {
                    return Err(DataflowError::AmbiguousBinding {
                        name: name.to_string(),
                        first: first.origin.clone(),
                        second: second.origin.clone(),
                    });
                }
                if let Some(claim) = claims.first() {
                    if self.is_ready(claim.id) {
                        return Ok(claim.id);
                    }
                    if let Some(reason) = self.failed.get(&claim.id) {
                        return Err(DataflowError::ComponentFailed {
                            component: name.to_string(),
                            reason: reason.clone(),
                        });
                    }
                }
            }
            if !self.wait_announcement(deadline) && Instant::now() >= deadline {
                tracing::warn!("Component '{}' not found within {:?}", name, wait);
                return Err(DataflowError::NotFound {
                    name: name.to_string(),
                    waited: wait,
                });
            }
        }
    }

    /// Wait for a specific component (e.g. a freshly spawned sink).
    pub(crate) fn await_component(&mut self, id: ComponentId, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        loop {
            self.pump();
            if self.is_ready(id) {
                return Ok(());
            }
            if let Some(reason) = self.failed.get(&id) {
                return Err(DataflowError::ComponentFailed {
                    component: self.name_of(id).to_string(),
                    reason: reason.clone(),
                });
            }
            if !self.wait_announcement(deadline) && Instant::now() >= deadline {
                return Err(DataflowError::NotFound {
                    name: self.name_of(id).to_string(),
                    waited: wait,
                });
            }
        }
    }

    /// Wait for every launched task to announce itself.
    pub(crate) fn await_all(&mut self, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        loop {
            self.pump();
            if let Some((&id, reason)) = self.failed.iter().min_by_key(|(id, _)| **id) {
                return Err(DataflowError::ComponentFailed {
                    component: self.name_of(id).to_string(),
                    reason: reason.clone(),
                });
            }
            let Some(&first) = self.pending.keys().min() else {
                return Ok(());
            };
            if !self.wait_announcement(deadline) && Instant::now() >= deadline {
                return Err(DataflowError::NotFound {
                    name: self.name_of(first).to_string(),
                    waited: wait,
                });
            }
        }
    }

    // ── Lookup ──

    fn is_ready(&self, id: ComponentId) -> bool {
        self.components
            .get(id.index())
            .is_some_and(Option::is_some)
    }

    fn name_of(&self, id: ComponentId) -> &str {
        self.names.get(id.index()).map(String::as_str).unwrap_or("?")
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Ready component or `NotFound`.
    pub fn component(&self, id: ComponentId) -> Result<&Component> {
        self.get(id).ok_or_else(|| DataflowError::NotFound {
            name: self.name_of(id).to_string(),
            waited: Duration::ZERO,
        })
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        let name = self.name_of(id).to_string();
        self.get_mut(id).ok_or(DataflowError::NotFound {
            name,
            waited: Duration::ZERO,
        })
    }

    /// Ready components in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().flatten()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.iter().map(Component::id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Teardown ──

    /// Ask every component thread to exit and join it.
    pub fn shutdown(&mut self) {
        for host in &self.hosts {
            let _ = host.tx.send(ControlCommand::Shutdown);
        }
        for host in &mut self.hosts {
            if let Some(join) = host.join.take() {
                if join.join().is_err() {
                    tracing::warn!("Component thread '{}' panicked during shutdown", host.name);
                }
            }
        }
        if !self.hosts.is_empty() {
            tracing::debug!("Joined {} component threads", self.hosts.len());
        }
        self.hosts.clear();
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
