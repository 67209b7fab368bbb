//! # uwv-dataflow: dataflow orchestration for underwater vehicle pipelines
//!
//! Runs sensor-fusion pipelines made of live processing components and
//! replayed sensor logs. Components expose typed ports; the orchestrator
//! wires them into a graph, configures and starts them, and drives replay
//! time until the logs end or the run is stopped.
//!
//! ## Architecture
//!
//! - **Pipeline**: ports, connections, transport policies and graph checks
//! - **Runtime**: one thread per component, name resolution, orchestration
//! - **Replay**: log reading/writing and virtual time
//! - **Communication**: Crossbeam channels for samples and lifecycle control
//!
//! ## Example
//!
//! ```ignore
//! use uwv_dataflow::{
//!     config::RuntimeSettings,
//!     pipeline::{ConnectionPolicy, ParamValue},
//!     replay::PlaybackMode,
//!     runtime::{run_scoped, Catalog},
//! };
//!
//! let mut catalog = Catalog::new();
//! catalog.register("uw_localization_test", "uw_particle_localization", ParticleFilter::new);
//!
//! run_scoped(RuntimeSettings::default(), catalog, |orch| {
//!     orch.launch("uw_localization_test")?;
//!     let replay = orch.open_replay(&["sonar.log".into()], PlaybackMode::RealTime { speed: 1.0 })?;
//!     let sonar = orch.replay(replay)?.task("sonar")?;
//!     let filter = orch.resolve("uw_particle_localization")?;
//!     orch.set_parameter(filter, "particle_number", ParamValue::Int(20))?;
//!     orch.connect(sonar, "BaseScan", filter, "laser_samples", ConnectionPolicy::buffer(100))?;
//!     orch.run()
//! })?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod os_signals;
pub mod pipeline;
pub mod replay;
pub mod runtime;

// Re-export commonly used types
pub use config::{RunConfig, RuntimeSettings};
pub use error::{DataflowError, Result, ResultExt};
pub use pipeline::{
    ComponentId, ComponentState, ConnectionId, ConnectionPolicy, ParamValue, PortDescriptor,
    Sample,
};
pub use replay::{PlaybackMode, ReplaySource, StepOutcome};
pub use runtime::{run_scoped, Catalog, ComponentProcess, Completion, Orchestrator, TaskContext};
