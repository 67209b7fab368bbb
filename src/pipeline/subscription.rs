//! Subscriptions: rate-capped callbacks on an output port.
//!
//! A subscription is an anonymous sink component connected through the
//! ordinary graph, so it obeys the same type checks and lifecycle as any
//! other consumer. It never affects other connections on the same port.

use crate::pipeline::id::{ComponentId, ConnectionId, SubscriptionId};
use crate::pipeline::port::PortAddress;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between a subscription handle and its sink thread.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    delivered: AtomicU64,
    throttled: AtomicU64,
}

impl SubscriptionStats {
    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Callback invocations so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Samples dropped by the rate cap.
    pub fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}

/// Bookkeeping for one active subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub source: PortAddress,
    pub frequency: f64,
    pub sink: ComponentId,
    pub connection: ConnectionId,
    pub stats: Arc<SubscriptionStats>,
}

impl Subscription {
    pub fn delivered(&self) -> u64 {
        self.stats.delivered()
    }

    pub fn throttled(&self) -> u64 {
        self.stats.throttled()
    }
}
