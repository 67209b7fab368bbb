//! Runtime: component threads, name resolution and orchestration.
//!
//! - [`process`]: the `ComponentProcess` trait and the thread hosting it
//! - [`catalog`]: deployments that can be launched
//! - [`registry`]: name resolution and thread ownership
//! - [`orchestrator`]: build, activate, run and tear down
//! - [`assembly`]: build an orchestrator from a run config

pub mod assembly;
pub mod catalog;
pub mod orchestrator;
pub mod process;
pub mod registry;

pub use assembly::{assemble, register_relays, RELAY_DEPLOYMENT};
pub use catalog::{Catalog, TaskTemplate};
pub use orchestrator::{run_scoped, Completion, Orchestrator};
pub use process::{Activity, ComponentProcess, ProcessFactory, TaskContext};
pub use registry::Registry;
