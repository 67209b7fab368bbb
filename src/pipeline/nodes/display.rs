//! Visualization sinks.
//!
//! Rendering lives outside the runtime. A `VisualizationSink` receives
//! throttled samples tagged with the kind of display they feed; the
//! orchestrator wires it through an ordinary subscription.

use crate::pipeline::sample::Sample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// What a display renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayKind {
    /// Vehicle pose (position + orientation).
    RigidBodyState,
    /// Particle filter state.
    ParticleSet,
    /// Accumulated path of a pose stream.
    Trajectory,
    /// Static or estimated environment map.
    LandmarkMap,
    /// Range scan (sonar or laser).
    LaserScan,
}

impl fmt::Display for DisplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// External renderer boundary.
pub trait VisualizationSink: Send {
    fn update(&mut self, kind: DisplayKind, sample: &Sample);
}

/// A sink shared by several displays. Updates to one sink never overlap.
pub type SharedSink = Arc<Mutex<dyn VisualizationSink>>;

/// Headless sink that logs every update.
#[derive(Debug, Default)]
pub struct TracingSink {
    label: String,
    updates: u64,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            updates: 0,
        }
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl VisualizationSink for TracingSink {
    fn update(&mut self, kind: DisplayKind, sample: &Sample) {
        self.updates += 1;
        tracing::info!(
            target: "uwv_dataflow::display",
            "[{}] {} @ {:.3}s: {}",
            self.label,
            kind,
            sample.timestamp.as_secs_f64(),
            sample.value()
        );
    }
}
