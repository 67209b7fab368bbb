//! Typed dataflow graph.
//!
//! Components expose named, typed ports. Connections carry time-stamped
//! samples from an output port to an input port under a transport policy.
//! Every component runs on its own thread; the graph itself is built and
//! sealed by the orchestrator on a single thread.
//!
//! # Architecture
//!
//! ```text
//! [replay: sonar] ──BaseScan──► [sonar_feature_estimator] ──features──► [localization]
//! [live: depth]   ──depth_samples (pull) ─────────────────────────────► [localization]
//!                                                          particles ──► [subscription sink]
//! ```
//!
//! # Design
//!
//! - **Typed handles** — names resolve once into `ComponentId` / `PortId`.
//! - **Validated at connect** — payload types and port directions are checked
//!   when wiring, never during delivery.
//! - **Bounded transport** — every push connection is a bounded channel with an
//!   explicit overflow policy.
//! - **Subscriptions are sinks** — callbacks are anonymous components wired
//!   through the same graph.

pub mod component;
pub mod endpoint;
pub mod graph;
pub mod id;
pub mod nodes;
pub mod param;
pub mod plan;
pub mod policy;
pub mod port;
pub mod rate_limit;
pub mod sample;
pub mod subscription;
pub mod transport;

pub use component::{Component, ComponentKind, ComponentState, StateCell};
pub use endpoint::{InputPort, OutputPort, PortHandle, PortSet};
pub use graph::{Connection, ConnectionGraph};
pub use id::{ComponentId, ConnectionId, PortId, ReplayId, SubscriptionId};
pub use param::{ParamDescriptor, ParamKind, ParamValue, Parameters};
pub use plan::{GraphCompiler, GraphPlan, PlanStats};
pub use policy::{Buffering, ConnectionPolicy, DeliveryMode, OverflowPolicy, MAX_FIFO_CAPACITY};
pub use port::{PortAddress, PortDescriptor, PortDirection, TypeName};
pub use rate_limit::RateLimiter;
pub use sample::Sample;
pub use subscription::{Subscription, SubscriptionStats};
pub use transport::{LinkStats, Waker};
