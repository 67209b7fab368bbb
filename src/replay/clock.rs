//! Virtual time for replay.
//!
//! In real-time mode the clock maps wall-clock time to log time, scaled by
//! the playback speed. Pausing freezes the log position; changing speed
//! re-anchors it so the position never jumps.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;

/// How replayed records are released.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Paced by the wall clock.
    RealTime { speed: f64 },
    /// One record per explicit step.
    Step,
}

impl PlaybackMode {
    /// Reject speeds the clock cannot scale time by.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match *self {
            PlaybackMode::RealTime { speed } if !(speed.is_finite() && speed > 0.0) => {
                Err(format!("playback speed must be a positive number, got {speed}"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for PlaybackMode {
    fn default() -> Self {
        PlaybackMode::RealTime { speed: 1.0 }
    }
}

/// Current state of a replay clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// Not started yet
    Idle,
    /// Advancing with the wall clock
    Playing,
    /// Frozen at the current position
    Paused,
}

/// Maps wall-clock time to a position in the log.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    state: ClockState,
    /// Playback speed multiplier (1.0 = real-time)
    speed: f64,
    /// Log time of the first record
    origin: Duration,
    /// When playback (re)started in real time
    playback_start: Option<Instant>,
    /// Position relative to `origin` when playback (re)started
    playback_offset: Duration,
}

impl VirtualClock {
    pub fn new(origin: Duration, speed: f64) -> Self {
        Self {
            state: ClockState::Idle,
            speed: clamp_speed(speed),
            origin,
            playback_start: None,
            playback_offset: Duration::ZERO,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Start or resume at `now`.
    pub fn play(&mut self, now: Instant) {
        if self.state != ClockState::Playing {
            self.playback_start = Some(now);
            self.state = ClockState::Playing;
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.state == ClockState::Playing {
            self.playback_offset = self.elapsed_at(now);
            self.playback_start = None;
            self.state = ClockState::Paused;
        }
    }

    /// Change speed without moving the current position.
    pub fn set_speed(&mut self, speed: f64, now: Instant) {
        if self.state == ClockState::Playing {
            self.playback_offset = self.elapsed_at(now);
            self.playback_start = Some(now);
        }
        self.speed = clamp_speed(speed);
    }

    /// Log time reached at `now`.
    pub fn position(&self, now: Instant) -> Duration {
        self.origin + self.elapsed_at(now)
    }

    /// Wall-clock instant at which log time `t` is reached, if playing.
    pub fn wall_time_of(&self, t: Duration) -> Option<Instant> {
        let start = self.playback_start?;
        let ahead = t.saturating_sub(self.origin).saturating_sub(self.playback_offset);
        Some(start + ahead.div_f64(self.speed))
    }

    fn elapsed_at(&self, now: Instant) -> Duration {
        match self.playback_start {
            Some(start) => {
                self.playback_offset + now.saturating_duration_since(start).mul_f64(self.speed)
            }
            None => self.playback_offset,
        }
    }
}

/// NaN falls back to real time; everything else is clamped into range.
fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        1.0
    } else {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_is_clamped() {
        assert_eq!(VirtualClock::new(Duration::ZERO, 100.0).speed(), MAX_SPEED);
        assert_eq!(VirtualClock::new(Duration::ZERO, 0.0).speed(), MIN_SPEED);
    }

    #[test]
    fn test_nan_speed_keeps_the_clock_usable() {
        let start = Instant::now();
        let mut clock = VirtualClock::new(Duration::ZERO, f64::NAN);
        assert_eq!(clock.speed(), 1.0);
        clock.play(start);
        clock.set_speed(f64::NAN, start + Duration::from_millis(10));
        assert_eq!(clock.speed(), 1.0);
        assert!(clock.wall_time_of(Duration::from_secs(1)).is_some());
        assert!(clock.position(start + Duration::from_millis(20)) >= Duration::from_millis(20));
    }

    #[test]
    fn test_playback_mode_rejects_unusable_speeds() {
        assert!(PlaybackMode::RealTime { speed: 2.0 }.validate().is_ok());
        assert!(PlaybackMode::Step.validate().is_ok());
        for speed in [f64::NAN, f64::INFINITY, 0.0, -1.0] {
            assert!(PlaybackMode::RealTime { speed }.validate().is_err(), "{speed}");
        }
    }

    #[test]
    fn test_position_scales_with_speed() {
        let origin = Duration::from_secs(100);
        let mut clock = VirtualClock::new(origin, 2.0);
        let t0 = Instant::now();
        assert_eq!(clock.position(t0), origin);
        clock.play(t0);
        assert_eq!(
            clock.position(t0 + Duration::from_millis(500)),
            origin + Duration::from_secs(1)
        );
        assert_eq!(
            clock.wall_time_of(origin + Duration::from_secs(1)),
            Some(t0 + Duration::from_millis(500))
        );
    }

    #[test]
    fn test_pause_freezes_position() {
        let mut clock = VirtualClock::new(Duration::ZERO, 1.0);
        let t0 = Instant::now();
        clock.play(t0);
        clock.pause(t0 + Duration::from_secs(1));
        assert_eq!(clock.state(), ClockState::Paused);
        assert_eq!(clock.position(t0 + Duration::from_secs(5)), Duration::from_secs(1));
        assert!(clock.wall_time_of(Duration::from_secs(2)).is_none());

        clock.play(t0 + Duration::from_secs(5));
        assert_eq!(clock.position(t0 + Duration::from_secs(6)), Duration::from_secs(2));
    }

    #[test]
    fn test_speed_change_keeps_position() {
        let mut clock = VirtualClock::new(Duration::ZERO, 1.0);
        let t0 = Instant::now();
        clock.play(t0);
        clock.set_speed(4.0, t0 + Duration::from_secs(1));
        assert_eq!(clock.position(t0 + Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(clock.position(t0 + Duration::from_secs(2)), Duration::from_secs(5));
    }

    #[test]
    fn test_playback_mode_serde() {
        let mode: PlaybackMode = toml::from_str("mode = \"real_time\"\nspeed = 2.0").unwrap();
        assert_eq!(mode, PlaybackMode::RealTime { speed: 2.0 });
        let step: PlaybackMode = toml::from_str("mode = \"step\"").unwrap();
        assert_eq!(step, PlaybackMode::Step);
    }
}
