//! Replay source: turns recorded logs into components whose output ports
//! emit the recorded samples.
//!
//! Every file is one channel group and yields one `ReplayVirtual` component
//! named after the header's task. Records of all files are merged into a
//! single timeline ordered by (timestamp, file order, record order) and
//! released either against the wall clock or one record per step.

use crate::error::{DataflowError, Result};
use crate::pipeline::component::ComponentKind;
use crate::pipeline::endpoint::OutputPort;
use crate::pipeline::id::ComponentId;
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::sample::Sample;
use crate::replay::clock::{ClockState, PlaybackMode, VirtualClock};
use crate::replay::log::{read_log, ChannelDecl};
use crate::runtime::registry::Registry;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Result of advancing a replay by one record.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Emitted {
        component: ComponentId,
        channel: String,
        timestamp: Duration,
    },
    /// Every channel of every file has been played.
    EndOfReplay,
}

struct ReplayGroup {
    task: String,
    path: PathBuf,
    component: ComponentId,
    channels: Vec<ChannelDecl>,
    outputs: Vec<OutputPort>,
}

struct Entry {
    t: Duration,
    file: usize,
    record: usize,
    channel: usize,
    payload: Value,
}

pub struct ReplaySource {
    groups: Vec<ReplayGroup>,
    entries: Vec<Entry>,
    cursor: usize,
    mode: PlaybackMode,
    clock: Option<VirtualClock>,
}

impl ReplaySource {
    /// Read every file, then register one component per file. Nothing is
    /// registered when any file fails to load.
    pub fn open(files: &[PathBuf], mode: PlaybackMode, registry: &mut Registry) -> Result<Self> {
        mode.validate()
            .map_err(|reason| DataflowError::InvalidConfiguration {
                component: "replay".to_string(),
                reason,
            })?;
        let logs = files
            .iter()
            .map(|path| read_log(path))
            .collect::<Result<Vec<_>>>()?;

        let mut groups = Vec::with_capacity(logs.len());
        let mut entries = Vec::new();

        for (file, log) in logs.into_iter().enumerate() {
            let ports: Vec<PortDescriptor> = log
                .header
                .channels
                .iter()
                .map(|c| PortDescriptor::output(c.name.clone(), c.type_name.clone()))
                .collect();
            let component = registry.register_local(
                &log.header.task,
                ComponentKind::ReplayVirtual,
                &ports,
                &format!("replay log '{}'", log.path.display()),
            )?;
            let handles = registry.component(component)?.ports();
            let outputs = log
                .header
                .channels
                .iter()
                .filter_map(|c| handles.output(&c.name).cloned())
                .collect();

            for (record, rec) in log.records.into_iter().enumerate() {
                let Some(channel) = log.header.channels.iter().position(|c| c.name == rec.channel)
                else {
                    continue;
                };
                entries.push(Entry {
                    t: Duration::from_micros(rec.t_us),
                    file,
                    record,
                    channel,
                    payload: rec.payload,
                });
            }

            tracing::info!(
                "Replaying task '{}' from {} ({} channels)",
                log.header.task,
                log.path.display(),
                log.header.channels.len()
            );
            groups.push(ReplayGroup {
                task: log.header.task,
                path: log.path,
                component,
                channels: log.header.channels,
                outputs,
            });
        }

        entries.sort_by_key(|e| (e.t, e.file, e.record));

        let clock = match mode {
            PlaybackMode::RealTime { speed } => {
                let origin = entries.first().map(|e| e.t).unwrap_or(Duration::ZERO);
                Some(VirtualClock::new(origin, speed))
            }
            PlaybackMode::Step => None,
        };

        Ok(Self {
            groups,
            entries,
            cursor: 0,
            mode,
            clock,
        })
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Synthetic component of channel group `task`.
    pub fn task(&self, task: &str) -> Result<ComponentId> {
        self.group(task).map(|g| g.component)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.task.as_str())
    }

    pub fn components(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.groups.iter().map(|g| g.component)
    }

    pub fn channels(&self, task: &str) -> Result<&[ChannelDecl]> {
        self.group(task).map(|g| g.channels.as_slice())
    }

    /// Fail with `SchemaMismatch` unless `task` provides every channel in
    /// `expected`.
    pub fn require_channels(&self, task: &str, expected: &[&str]) -> Result<()> {
        let group = self.group(task)?;
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|name| !group.channels.iter().any(|c| c.name == *name))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(DataflowError::schema(
            group.path.display().to_string(),
            format!("task '{}' lacks channels: {}", task, missing.join(", ")),
        ))
    }

    fn group(&self, task: &str) -> Result<&ReplayGroup> {
        self.groups
            .iter()
            .find(|g| g.task == task)
            .ok_or_else(|| DataflowError::NotFound {
                name: task.to_string(),
                waited: Duration::ZERO,
            })
    }

    pub fn path_of(&self, task: &str) -> Option<&Path> {
        self.group(task).ok().map(|g| g.path.as_path())
    }

    // ── Playback ──

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.entries.len()
    }

    /// Release the next record regardless of mode.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some(entry) = self.entries.get_mut(self.cursor) else {
            return Ok(StepOutcome::EndOfReplay);
        };
        self.cursor += 1;

        let group = &self.groups[entry.file];
        let sample = Sample::new(entry.t, std::mem::take(&mut entry.payload));
        let outcome = StepOutcome::Emitted {
            component: group.component,
            channel: group.channels[entry.channel].name.clone(),
            timestamp: entry.t,
        };
        group.outputs[entry.channel].write(sample)?;
        Ok(outcome)
    }

    /// Start the real-time clock. No-op in step mode.
    pub fn start(&mut self, now: Instant) {
        if let Some(clock) = &mut self.clock {
            clock.play(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(clock) = &mut self.clock {
            clock.pause(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(clock) = &mut self.clock {
            if clock.state() == ClockState::Paused {
                clock.play(now);
            }
        }
    }

    pub fn set_speed(&mut self, speed: f64, now: Instant) {
        if let Some(clock) = &mut self.clock {
            clock.set_speed(speed, now);
            self.mode = PlaybackMode::RealTime {
                speed: clock.speed(),
            };
        }
    }

    pub fn is_paused(&self) -> bool {
        self.clock
            .as_ref()
            .is_some_and(|c| c.state() == ClockState::Paused)
    }

    /// Release every record whose log time has been reached at `now`.
    /// Returns how many were emitted; always 0 in step mode.
    pub fn pump(&mut self, now: Instant) -> Result<usize> {
        let Some(position) = self
            .clock
            .as_ref()
            .filter(|c| c.state() == ClockState::Playing)
            .map(|c| c.position(now))
        else {
            return Ok(0);
        };

        let mut emitted = 0;
        while self
            .entries
            .get(self.cursor)
            .is_some_and(|e| e.t <= position)
        {
            self.step()?;
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Wall-clock instant of the next record, when playing in real time.
    pub fn next_due(&self) -> Option<Instant> {
        let entry = self.entries.get(self.cursor)?;
        self.clock.as_ref()?.wall_time_of(entry.t)
    }
}

impl std::fmt::Debug for ReplaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySource")
            .field("tasks", &self.tasks().collect::<Vec<_>>())
            .field("records", &self.entries.len())
            .field("cursor", &self.cursor)
            .field("mode", &self.mode)
            .finish()
    }
}
