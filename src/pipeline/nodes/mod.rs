//! Built-in component implementations.

pub mod display;
pub mod recorder_sink;
pub mod relay;
pub mod subscription_sink;

pub use display::{DisplayKind, SharedSink, TracingSink, VisualizationSink};
pub use recorder_sink::{RecorderSinkNode, RECORDER_BUFFER};
pub use relay::{RelayNode, RELAY_INPUT, RELAY_OUTPUT};
pub use subscription_sink::{SampleCallback, SubscriptionSink, SINK_INPUT};
