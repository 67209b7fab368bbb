//! SubscriptionSink — anonymous consumer that throttles samples into a
//! user callback.

use crate::pipeline::port::{PortDescriptor, TypeName};
use crate::pipeline::rate_limit::RateLimiter;
use crate::pipeline::sample::Sample;
use crate::pipeline::subscription::SubscriptionStats;
use crate::runtime::process::{Activity, ComponentProcess, TaskContext};
use std::sync::Arc;
use std::time::Instant;

pub const SINK_INPUT: &str = "in";

/// Type-erased subscriber callback.
pub type SampleCallback = Box<dyn FnMut(&Sample) + Send>;

pub struct SubscriptionSink {
    type_name: TypeName,
    limiter: RateLimiter,
    callback: SampleCallback,
    stats: Arc<SubscriptionStats>,
}

impl SubscriptionSink {
    pub fn new(
        type_name: TypeName,
        limiter: RateLimiter,
        callback: SampleCallback,
        stats: Arc<SubscriptionStats>,
    ) -> Self {
        Self {
            type_name,
            limiter,
            callback,
            stats,
        }
    }
}

impl ComponentProcess for SubscriptionSink {
    fn ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::input(SINK_INPUT, self.type_name.clone())]
    }

    fn activity(&self) -> Activity {
        Activity::PortDriven
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        while let Some(sample) = ctx.read(SINK_INPUT)? {
            if self.limiter.admit(Instant::now()) {
                (self.callback)(&sample);
                self.stats.record_delivered();
            } else {
                self.stats.record_throttled();
            }
        }
        Ok(())
    }
}
