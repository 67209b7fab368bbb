//! Per-subscription delivery throttle.

use std::time::{Duration, Instant};

/// Admits a sample only when strictly more than `1 / frequency` has elapsed
/// since the last admitted one. Rejected samples are dropped, never queued.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
    admitted: u64,
    rejected: u64,
}

impl RateLimiter {
    /// `frequency` in Hz; must be finite and positive.
    pub fn new(frequency: f64) -> std::result::Result<Self, String> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(format!("rate cap must be a positive frequency, got {frequency}"));
        }
        Ok(Self {
            min_interval: Duration::from_secs_f64(1.0 / frequency),
            last: None,
            admitted: 0,
            rejected: 0,
        })
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.min_interval,
        };
        if due {
            self.last = Some(now);
            self.admitted += 1;
        } else {
            self.rejected += 1;
        }
        due
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
