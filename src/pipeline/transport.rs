//! Connection transport: the buffer that sits between one output port and
//! one input port.
//!
//! Push connections own a bounded crossbeam channel sized by the policy.
//! Pull connections share the producer's latest-value slot and remember the
//! sequence number they last delivered, so a sample reaches each reader at
//! most once and samples older than the connection are never seen.

use crate::error::{DataflowError, Result};
use crate::pipeline::component::StateCell;
use crate::pipeline::id::ConnectionId;
use crate::pipeline::policy::{ConnectionPolicy, DeliveryMode, OverflowPolicy};
use crate::pipeline::sample::Sample;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Slice a blocked producer waits before re-checking its consumer.
const BLOCK_SLICE: Duration = Duration::from_millis(10);

/// Wake-up signal for a port-driven component thread. At most one wake-up
/// is pending at a time.
#[derive(Clone, Debug)]
pub struct Waker {
    tx: Sender<()>,
}

impl Waker {
    pub fn pair() -> (Waker, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (Waker { tx }, rx)
    }

    #[inline]
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Single-value store of an output port's most recent sample.
#[derive(Debug, Default)]
pub struct LatestSlot {
    value: Mutex<Option<(u64, Sample)>>,
    seq: AtomicU64,
}

impl LatestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, sample: Sample) {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        *value = Some((seq, sample));
    }

    /// Sequence number of the last published sample, 0 when none.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Option<(u64, Sample)> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

enum Transport {
    Push {
        tx: Sender<Sample>,
        rx: Receiver<Sample>,
    },
    Pull {
        slot: Arc<LatestSlot>,
        seen: AtomicU64,
    },
}

/// Delivery statistics of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Runtime side of a connection.
pub struct Link {
    id: ConnectionId,
    label: String,
    policy: ConnectionPolicy,
    block_timeout: Duration,
    transport: Transport,
    source_name: String,
    source_state: StateCell,
    dest_state: StateCell,
    dest_waker: Waker,
    closed: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Both ends of a connection, as seen by the transport.
pub(crate) struct LinkEnds {
    pub source_name: String,
    pub source_state: StateCell,
    pub source_slot: Arc<LatestSlot>,
    pub dest_state: StateCell,
    pub dest_waker: Waker,
}

impl Link {
    pub(crate) fn new(
        id: ConnectionId,
        label: String,
        policy: ConnectionPolicy,
        block_timeout: Duration,
        ends: LinkEnds,
    ) -> Self {
        let transport = match policy.mode {
            DeliveryMode::Push => {
                let (tx, rx) = bounded(policy.capacity());
                Transport::Push { tx, rx }
            }
            DeliveryMode::Pull => Transport::Pull {
                seen: AtomicU64::new(ends.source_slot.sequence()),
                slot: ends.source_slot,
            },
        };
        Self {
            id,
            label,
            policy,
            block_timeout,
            transport,
            source_name: ends.source_name,
            source_state: ends.source_state,
            dest_state: ends.dest_state,
            dest_waker: ends.dest_waker,
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub fn is_push(&self) -> bool {
        matches!(self.transport, Transport::Push { .. })
    }

    pub(crate) fn source_name(&self) -> &str {
        &self.source_name
    }

    pub(crate) fn source_failed(&self) -> bool {
        self.source_state.get() == crate::pipeline::component::ComponentState::Failed
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Number of samples waiting in a push buffer.
    pub fn queued(&self) -> usize {
        match &self.transport {
            Transport::Push { rx, .. } => rx.len(),
            Transport::Pull { .. } => 0,
        }
    }

    /// Producer side. Pull connections need no work here: the producer's
    /// latest slot is already updated by the output port.
    pub(crate) fn push(&self, sample: &Sample) -> Result<()> {
        let Transport::Push { tx, rx } = &self.transport else {
            return Ok(());
        };
        if self.is_closed() || self.dest_state.get().is_inert() {
            return Ok(());
        }

        match self.policy.effective_overflow() {
            OverflowPolicy::DropOldest => {
                let mut pending = sample.clone();
                loop {
                    match tx.try_send(pending) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => {
                            if rx.try_recv().is_ok() {
                                self.dropped.fetch_add(1, Ordering::Relaxed);
                                tracing::trace!("{}: dropped oldest sample", self.label);
                            }
                            pending = back;
                        }
                        Err(TrySendError::Disconnected(_)) => return Ok(()),
                    }
                }
            }
            OverflowPolicy::DropNewest => {
                if let Err(TrySendError::Full(_)) = tx.try_send(sample.clone()) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("{}: dropped newest sample", self.label);
                    return Ok(());
                }
            }
            OverflowPolicy::Block => self.push_blocking(tx, sample)?,
        }

        self.dest_waker.notify();
        Ok(())
    }

    fn push_blocking(&self, tx: &Sender<Sample>, sample: &Sample) -> Result<()> {
        let deadline = Instant::now() + self.block_timeout;
        let mut pending = sample.clone();
        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "Backpressure timeout after {:?} on {}",
                    self.block_timeout,
                    self.label
                );
                return Err(DataflowError::BackpressureTimeout {
                    connection: self.label.clone(),
                    timeout: self.block_timeout,
                });
            }
            let slice = (deadline - now).min(BLOCK_SLICE);
            match tx.send_timeout(pending, slice) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    // The consumer may have stopped while we waited.
                    if self.is_closed() || self.dest_state.get().is_inert() {
                        return Ok(());
                    }
                    self.dest_waker.notify();
                    pending = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Ok(()),
            }
        }
    }

    /// Consumer side: next sample for this connection, if any.
    pub(crate) fn take(&self) -> Option<Sample> {
        if self.is_closed() {
            return None;
        }
        let sample = match &self.transport {
            Transport::Push { rx, .. } => rx.try_recv().ok(),
            Transport::Pull { slot, seen } => {
                let (seq, sample) = slot.latest()?;
                if seq <= seen.load(Ordering::Acquire) {
                    return None;
                }
                seen.store(seq, Ordering::Release);
                Some(sample)
            }
        };
        if sample.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        sample
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::component::ComponentState;
    use serde_json::json;

    fn link(policy: ConnectionPolicy) -> (Link, Arc<LatestSlot>, StateCell) {
        let slot = Arc::new(LatestSlot::new());
        let dest = StateCell::new();
        let (waker, _rx) = Waker::pair();
        let link = Link::new(
            ConnectionId(0),
            "a.out -> b.in".into(),
            policy,
            Duration::from_millis(30),
            LinkEnds {
                source_name: "a".into(),
                source_state: StateCell::new(),
                source_slot: slot.clone(),
                dest_state: dest.clone(),
                dest_waker: waker,
            },
        );
        (link, slot, dest)
    }

    fn sample(v: i64) -> Sample {
        Sample::new(Duration::from_millis(v as u64), json!(v))
    }

    fn drain(link: &Link) -> Vec<i64> {
        std::iter::from_fn(|| link.take())
            .map(|s| s.value().as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_latest_value_keeps_newest() {
        let (link, _, _) = link(ConnectionPolicy::data());
        for v in 1..=5 {
            link.push(&sample(v)).unwrap();
        }
        assert_eq!(drain(&link), vec![5]);
        assert_eq!(link.stats().dropped, 4);
    }

    #[test]
    fn test_fifo_drop_oldest() {
        let (link, _, _) = link(ConnectionPolicy::buffer(3));
        for v in 1..=5 {
            link.push(&sample(v)).unwrap();
        }
        assert_eq!(drain(&link), vec![3, 4, 5]);
    }

    #[test]
    fn test_fifo_drop_newest() {
        let (link, _, _) =
            link(ConnectionPolicy::buffer(3).with_overflow(OverflowPolicy::DropNewest));
        for v in 1..=5 {
            link.push(&sample(v)).unwrap();
        }
        assert_eq!(drain(&link), vec![1, 2, 3]);
    }

    #[test]
    fn test_block_times_out() {
        let (link, _, _) = link(ConnectionPolicy::blocking(1, Duration::from_millis(30)));
        link.push(&sample(1)).unwrap();
        let err = link.push(&sample(2)).unwrap_err();
        assert!(matches!(err, DataflowError::BackpressureTimeout { .. }));
    }

    #[test]
    fn test_push_to_stopped_destination_is_noop() {
        let (link, _, dest) = link(ConnectionPolicy::buffer(2));
        dest.set(ComponentState::Stopped);
        link.push(&sample(1)).unwrap();
        assert!(link.take().is_none());
    }

    #[test]
    fn test_pull_delivers_at_most_once_and_skips_history() {
        let slot = Arc::new(LatestSlot::new());
        slot.publish(sample(1));
        let (waker, _rx) = Waker::pair();
        let link = Link::new(
            ConnectionId(1),
            "a.out -> b.in".into(),
            ConnectionPolicy::pull(),
            Duration::from_millis(30),
            LinkEnds {
                source_name: "a".into(),
                source_state: StateCell::new(),
                source_slot: slot.clone(),
                dest_state: StateCell::new(),
                dest_waker: waker,
            },
        );
        assert!(link.take().is_none());
        slot.publish(sample(2));
        slot.publish(sample(3));
        assert_eq!(drain(&link), vec![3]);
        assert!(link.take().is_none());
    }

    #[test]
    fn test_closed_link_delivers_nothing() {
        let (link, _, _) = link(ConnectionPolicy::buffer(2));
        link.push(&sample(1)).unwrap();
        link.close();
        assert!(link.take().is_none());
    }
}
