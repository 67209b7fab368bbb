//! Components and their lifecycle state machine.
//!
//! ```text
//!  Unconfigured ──configure──▶ Configured ──start──▶ Running
//!        ▲                        │  ▲                  │
//!        └──configure failed──────┘  └──configure       │
//!                                 stop │                │ stop
//!                                      ▼                ▼
//!                                   Stopped ◀───────────┘
//!  any state ──hook error / panic──▶ Failed (terminal)
//! ```
//!
//! The state lives in a shared atomic cell so connection endpoints and the
//! component's own thread observe it without locking.

use crate::error::{DataflowError, Result};
use crate::pipeline::endpoint::PortSet;
use crate::pipeline::id::ComponentId;
use crate::pipeline::param::{ParamDescriptor, ParamValue, Parameters};
use crate::runtime::process::{ControlRequest, ProcessControl};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentState {
    Unconfigured = 0,
    Configured = 1,
    Running = 2,
    Stopped = 3,
    Failed = 4,
}

impl ComponentState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ComponentState::Unconfigured,
            1 => ComponentState::Configured,
            2 => ComponentState::Running,
            3 => ComponentState::Stopped,
            _ => ComponentState::Failed,
        }
    }

    /// Samples written to or from a component in this state are discarded.
    #[inline]
    pub fn is_inert(self) -> bool {
        matches!(self, ComponentState::Stopped | ComponentState::Failed)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComponentState::Unconfigured => "Unconfigured",
            ComponentState::Configured => "Configured",
            ComponentState::Running => "Running",
            ComponentState::Stopped => "Stopped",
            ComponentState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

struct StateInner {
    state: AtomicU8,
    failure: Mutex<Option<String>>,
}

/// Shared, lock-free view of a component's state plus the reason it failed.
#[derive(Clone)]
pub struct StateCell {
    inner: Arc<StateInner>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                state: AtomicU8::new(ComponentState::Unconfigured as u8),
                failure: Mutex::new(None),
            }),
        }
    }

    #[inline]
    pub fn get(&self) -> ComponentState {
        ComponentState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Move to `state` unless the component already failed.
    pub fn set(&self, state: ComponentState) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ComponentState::Failed as u8).then_some(state as u8)
            });
    }

    /// Enter the terminal Failed state. The first reason wins.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut failure = self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(reason.into());
        }
        self.inner
            .state
            .store(ComponentState::Failed as u8, Ordering::Release);
    }

    pub fn failure(&self) -> Option<String> {
        self.inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateCell({})", self.get())
    }
}

/// Where a component comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Launched from a deployment; runs on its own thread.
    LiveProcess,
    /// Synthetic component exposing a replayed log's channels.
    ReplayVirtual,
    /// Anonymous consumer backing a subscription or port recorder.
    Sink,
}

/// How lifecycle requests reach the component.
pub(crate) enum Control {
    /// Hooks run on the component's thread.
    Process(ProcessControl),
    /// No hooks; transitions only update the state cell.
    Local,
}

/// A registered component: identity, ports, parameters and lifecycle.
pub struct Component {
    pub(crate) id: ComponentId,
    pub(crate) name: String,
    pub(crate) kind: ComponentKind,
    pub(crate) ports: PortSet,
    pub(crate) param_decls: Vec<ParamDescriptor>,
    pub(crate) params: Parameters,
    pub(crate) state: StateCell,
    pub(crate) control: Control,
}

impl Component {
    pub(crate) fn new(
        id: ComponentId,
        name: impl Into<String>,
        kind: ComponentKind,
        ports: PortSet,
        param_decls: Vec<ParamDescriptor>,
        state: StateCell,
        control: Control,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            ports,
            param_decls,
            params: Parameters::new(),
            state,
            control,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn state(&self) -> ComponentState {
        self.state.get()
    }

    /// Why the component failed, once it is Failed.
    pub fn failure(&self) -> Option<String> {
        self.state.failure()
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn parameter_decls(&self) -> &[ParamDescriptor] {
        &self.param_decls
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Assign a parameter. Only declared names are accepted; the value's
    /// shape is checked at `configure()`.
    pub fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<()> {
        if !self.param_decls.iter().any(|d| d.name == name) {
            return Err(DataflowError::InvalidConfiguration {
                component: self.name.clone(),
                reason: format!("unknown parameter '{name}'"),
            });
        }
        self.params.set(name, value);
        Ok(())
    }

    // ── Lifecycle ──

    /// Validate parameters and required inputs, then run the configure hook.
    /// Allowed from Unconfigured or Configured; on failure the component is
    /// left Unconfigured.
    pub fn configure(&mut self) -> Result<()> {
        let from = self.state();
        if !matches!(
            from,
            ComponentState::Unconfigured | ComponentState::Configured
        ) {
            return Err(self.invalid_transition(from, "configure"));
        }

        let resolved = match self.validate() {
            Ok(resolved) => resolved,
            Err(reason) => {
                self.state.set(ComponentState::Unconfigured);
                tracing::warn!("Configure of '{}' rejected: {}", self.name, reason);
                return Err(DataflowError::InvalidConfiguration {
                    component: self.name.clone(),
                    reason,
                });
            }
        };

        match &self.control {
            Control::Process(control) => {
                match control.request(&self.name, ControlRequest::Configure(resolved))? {
                    Ok(()) => {}
                    Err(reason) => {
                        return Err(DataflowError::InvalidConfiguration {
                            component: self.name.clone(),
                            reason,
                        });
                    }
                }
            }
            Control::Local => self.state.set(ComponentState::Configured),
        }

        tracing::info!("Configured '{}'", self.name);
        Ok(())
    }

    /// Configured → Running. `epoch` is the instant live timestamps count from.
    pub fn start(&mut self, epoch: Instant) -> Result<()> {
        let from = self.state();
        if from != ComponentState::Configured {
            return Err(self.invalid_transition(from, "start"));
        }

        match &self.control {
            Control::Process(control) => {
                if let Err(reason) = control.request(&self.name, ControlRequest::Start(epoch))? {
                    return Err(DataflowError::ComponentFailed {
                        component: self.name.clone(),
                        reason,
                    });
                }
            }
            Control::Local => self.state.set(ComponentState::Running),
        }

        tracing::info!("Started '{}'", self.name);
        Ok(())
    }

    /// Running | Configured → Stopped. Connections survive.
    pub fn stop(&mut self) -> Result<()> {
        let from = self.state();
        if !matches!(from, ComponentState::Running | ComponentState::Configured) {
            return Err(self.invalid_transition(from, "stop"));
        }

        match &self.control {
            Control::Process(control) => {
                if let Err(reason) = control.request(&self.name, ControlRequest::Stop)? {
                    tracing::warn!("Stop hook of '{}' reported: {}", self.name, reason);
                }
            }
            Control::Local => self.state.set(ComponentState::Stopped),
        }

        tracing::info!("Stopped '{}'", self.name);
        Ok(())
    }

    fn validate(&self) -> std::result::Result<Parameters, String> {
        let resolved = Parameters::resolve(&self.param_decls, &self.params)?;
        for input in self.ports.inputs() {
            if input.descriptor().required && !input.is_connected() {
                return Err(format!(
                    "required input '{}' has no connection",
                    input.descriptor().name
                ));
            }
        }
        Ok(resolved)
    }

    fn invalid_transition(&self, from: ComponentState, operation: &'static str) -> DataflowError {
        DataflowError::InvalidTransition {
            component: self.name.clone(),
            from,
            operation,
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state.get())
            .finish()
    }
}
