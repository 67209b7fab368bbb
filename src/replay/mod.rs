//! Log replay.
//!
//! Recorded logs are JSON Lines files: a header naming the task and its
//! channels, then one record per sample. A [`ReplaySource`] exposes each
//! file as a component whose output ports re-emit the records, paced by a
//! [`VirtualClock`] or stepped one record at a time.

pub mod clock;
pub mod log;
pub mod source;

pub use clock::{ClockState, PlaybackMode, VirtualClock, MAX_SPEED, MIN_SPEED};
pub use log::{read_log, ChannelDecl, LogFile, LogHeader, LogRecord, LogWriter};
pub use source::{ReplaySource, StepOutcome};
