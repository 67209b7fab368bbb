//! Samples — the unit of data flowing through connections.
//!
//! Payloads are opaque to the runtime. They are held behind an `Arc` so a
//! fan-out to many connections and subscriptions never copies the value.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A time-stamped payload produced on an output port.
#[derive(Clone, PartialEq)]
pub struct Sample {
    /// Producer timestamp: recorded time for replayed data, time since
    /// activation for live components.
    pub timestamp: Duration,
    pub payload: Arc<Value>,
}

impl Sample {
    pub fn new(timestamp: Duration, payload: Value) -> Self {
        Self {
            timestamp,
            payload: Arc::new(payload),
        }
    }

    /// Borrow the payload value.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.payload
    }

    /// Numeric payload shortcut, used by tests and simple relays.
    pub fn as_f64(&self) -> Option<f64> {
        self.payload.as_f64()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("timestamp", &self.timestamp)
            .field("payload", &self.payload)
            .finish()
    }
}
