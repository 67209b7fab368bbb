//! Connection transport policies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest FIFO a connection may allocate; channel slots are reserved up front.
pub const MAX_FIFO_CAPACITY: usize = 1 << 16;

/// Who initiates delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// The producer pushes each sample into the connection buffer.
    #[default]
    Push,
    /// The consumer fetches the producer's latest sample when it executes.
    Pull,
}

/// Buffering on the consumer side of a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Buffering {
    /// Single slot; unread samples are superseded.
    #[default]
    Latest,
    /// Bounded FIFO of the given capacity.
    Fifo(usize),
}

/// What a full FIFO does with a new sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
    /// Suspend the producer until space frees or the timeout elapses.
    Block,
}

/// Policy attached to a connection at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionPolicy {
    pub mode: DeliveryMode,
    pub buffer: Buffering,
    pub overflow: OverflowPolicy,
    /// Block policy only; `None` uses the runtime's backpressure timeout.
    pub block_timeout_ms: Option<u64>,
}

impl ConnectionPolicy {
    /// Push, single-slot latest value.
    pub fn data() -> Self {
        Self::default()
    }

    /// Push, bounded FIFO dropping the oldest sample on overflow.
    pub fn buffer(size: usize) -> Self {
        Self {
            buffer: Buffering::Fifo(size),
            ..Self::default()
        }
    }

    /// Push, bounded FIFO that suspends the producer when full.
    pub fn blocking(size: usize, timeout: Duration) -> Self {
        Self {
            buffer: Buffering::Fifo(size),
            overflow: OverflowPolicy::Block,
            block_timeout_ms: Some(timeout.as_millis() as u64),
            ..Self::default()
        }
    }

    /// Consumer-driven latest value.
    pub fn pull() -> Self {
        Self {
            mode: DeliveryMode::Pull,
            ..Self::default()
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Capacity of the consumer-side buffer.
    pub fn capacity(&self) -> usize {
        match self.buffer {
            Buffering::Latest => 1,
            Buffering::Fifo(n) => n,
        }
    }

    /// Overflow behaviour actually applied; a latest-value slot always
    /// supersedes.
    pub fn effective_overflow(&self) -> OverflowPolicy {
        match self.buffer {
            Buffering::Latest => OverflowPolicy::DropOldest,
            Buffering::Fifo(_) => self.overflow,
        }
    }

    /// True for the only policy that can suspend a producer.
    pub fn is_blocking(&self) -> bool {
        self.mode == DeliveryMode::Push && self.effective_overflow() == OverflowPolicy::Block
    }

    pub fn block_timeout(&self, fallback: Duration) -> Duration {
        self.block_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(fallback)
    }

    /// Reject shapes that have no meaning.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Buffering::Fifo(0) = self.buffer {
            return Err("FIFO capacity must be at least 1".to_string());
        }
        if let Buffering::Fifo(n) = self.buffer {
            if n > MAX_FIFO_CAPACITY {
                return Err(format!(
                    "FIFO capacity {n} exceeds the maximum of {MAX_FIFO_CAPACITY}"
                ));
            }
        }
        if self.mode == DeliveryMode::Pull && self.buffer != Buffering::Latest {
            return Err("pull connections only retain the latest value".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_always_supersedes() {
        let policy = ConnectionPolicy::data().with_overflow(OverflowPolicy::Block);
        assert_eq!(policy.capacity(), 1);
        assert_eq!(policy.effective_overflow(), OverflowPolicy::DropOldest);
        assert!(!policy.is_blocking());
    }

    #[test]
    fn test_blocking_policy() {
        let policy = ConnectionPolicy::blocking(4, Duration::from_millis(250));
        assert!(policy.is_blocking());
        assert_eq!(policy.block_timeout(Duration::from_secs(1)), Duration::from_millis(250));
        assert_eq!(ConnectionPolicy::buffer(4).block_timeout(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionPolicy::buffer(0).validate().is_err());
        let pull_fifo = ConnectionPolicy {
            buffer: Buffering::Fifo(10),
            ..ConnectionPolicy::pull()
        };
        assert!(pull_fifo.validate().is_err());
        assert!(ConnectionPolicy::pull().validate().is_ok());
    }

    #[test]
    fn test_validate_caps_fifo_capacity() {
        assert!(ConnectionPolicy::buffer(MAX_FIFO_CAPACITY).validate().is_ok());
        let err = ConnectionPolicy::buffer(MAX_FIFO_CAPACITY + 1)
            .validate()
            .unwrap_err();
        assert!(err.contains("exceeds"), "{err}");
    }

    #[test]
    fn test_deserialize_from_toml() {
        let policy: ConnectionPolicy =
            toml::from_str("buffer = { fifo = 100 }\noverflow = \"drop_newest\"").unwrap();
        assert_eq!(policy.buffer, Buffering::Fifo(100));
        assert_eq!(policy.overflow, OverflowPolicy::DropNewest);
        assert_eq!(policy.mode, DeliveryMode::Push);

        let pull: ConnectionPolicy = toml::from_str("mode = \"pull\"").unwrap();
        assert_eq!(pull, ConnectionPolicy::pull());
    }
}
