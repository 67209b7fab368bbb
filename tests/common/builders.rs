//! Test data builders: replay log fixtures and small component processes

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uwv_dataflow::pipeline::{ParamDescriptor, ParamKind, Parameters, PortDescriptor, Sample};
use uwv_dataflow::replay::{ChannelDecl, LogHeader, LogWriter};
use uwv_dataflow::runtime::{Activity, ComponentProcess, TaskContext};

// ── Logs ──

/// Builder for replay log files
pub struct LogBuilder {
    task: String,
    channels: Vec<ChannelDecl>,
    records: Vec<(String, u64, Value)>,
}

impl LogBuilder {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            channels: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn channel(mut self, name: &str, type_name: &str) -> Self {
        self.channels.push(ChannelDecl::new(name, type_name));
        self
    }

    pub fn record(mut self, channel: &str, t_us: u64, payload: Value) -> Self {
        self.records.push((channel.to_string(), t_us, payload));
        self
    }

    /// `count` records on `channel`, `period_us` apart, payload = index + 1
    pub fn series(mut self, channel: &str, start_us: u64, period_us: u64, count: u64) -> Self {
        for i in 0..count {
            self.records
                .push((channel.to_string(), start_us + i * period_us, json!(i + 1)));
        }
        self
    }

    /// Write `<dir>/<task>.log` and return its path
    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}.log", self.task));
        let mut writer =
            LogWriter::create(&path, LogHeader::new(self.task.clone(), self.channels.clone()))
                .unwrap();
        for (channel, t_us, payload) in &self.records {
            writer
                .write(channel, Duration::from_micros(*t_us), payload)
                .unwrap();
        }
        writer.flush().unwrap();
        path
    }
}

// ── Processes ──

/// Writes an increasing counter to `out` on every cycle
pub struct Emitter {
    type_name: &'static str,
    period: Duration,
}

impl Emitter {
    pub fn new(type_name: &'static str, period: Duration) -> Self {
        Self { type_name, period }
    }
}

impl ComponentProcess for Emitter {
    fn ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::output("out", self.type_name)]
    }

    fn activity(&self) -> Activity {
        Activity::Periodic(self.period)
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        ctx.write("out", json!(ctx.cycle()))?;
        Ok(())
    }
}

/// Shared record of what a `Collector` received
#[derive(Clone, Default)]
pub struct Collected {
    samples: Arc<Mutex<Vec<Sample>>>,
    gate: Arc<AtomicBool>,
}

impl Collected {
    pub fn values(&self) -> Vec<Value> {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Let a gated collector start reading
    pub fn open(&self) {
        self.gate.store(true, Ordering::Release);
    }
}

/// Reads `in` and keeps every sample. A gated collector polls
/// periodically and only reads once its gate is opened.
pub struct Collector {
    type_name: &'static str,
    gated: bool,
    collected: Collected,
}

impl Collector {
    pub fn new(type_name: &'static str, collected: Collected) -> Self {
        Self {
            type_name,
            gated: false,
            collected,
        }
    }

    pub fn gated(type_name: &'static str, collected: Collected) -> Self {
        Self {
            type_name,
            gated: true,
            collected,
        }
    }
}

impl ComponentProcess for Collector {
    fn ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::input("in", self.type_name)]
    }

    fn activity(&self) -> Activity {
        if self.gated {
            Activity::Periodic(Duration::from_millis(2))
        } else {
            Activity::PortDriven
        }
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        if self.gated && !self.collected.gate.load(Ordering::Acquire) {
            return Ok(());
        }
        let samples = ctx.drain("in")?;
        self.collected.samples.lock().unwrap().extend(samples);
        Ok(())
    }
}

/// Requires a positive `particle_number`, like a particle filter would
pub struct ParticleFilter {
    pub particles: i64,
}

impl ParticleFilter {
    pub fn new() -> Self {
        Self { particles: 0 }
    }
}

impl ComponentProcess for ParticleFilter {
    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::input("pose_samples", super::POSE),
            PortDescriptor::output("pose", super::POSE),
        ]
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        vec![ParamDescriptor::required("particle_number", ParamKind::Int)]
    }

    fn configure(&mut self, params: &Parameters, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        let particles = params.int("particle_number").unwrap_or(0);
        anyhow::ensure!(particles > 0, "particle_number must be positive");
        self.particles = particles;
        Ok(())
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        while let Some(sample) = ctx.read("pose_samples")? {
            ctx.forward("pose", sample)?;
        }
        Ok(())
    }
}

/// Fails its update hook after `after` cycles
pub struct Faulty {
    after: u64,
}

impl Faulty {
    pub fn new(after: u64) -> Self {
        Self { after }
    }
}

impl ComponentProcess for Faulty {
    fn ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::output("out", super::POSE)]
    }

    fn activity(&self) -> Activity {
        Activity::Periodic(Duration::from_millis(2))
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        anyhow::ensure!(ctx.cycle() < self.after, "sensor disconnected");
        ctx.write("out", json!(ctx.cycle()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uwv_dataflow::replay::read_log;

    #[test]
    fn test_log_builder() {
        let dir = TempDir::new().unwrap();
        let path = LogBuilder::new("depth_reader")
            .channel("depth_samples", super::super::POSE)
            .series("depth_samples", 0, 100, 3)
            .write_to(dir.path());

        let log = read_log(&path).unwrap();
        assert_eq!(log.header.task, "depth_reader");
        assert_eq!(log.records.len(), 3);
        assert_eq!(log.records[2].payload, json!(3));
    }
}
