//! RecorderSink — writes every output port of one component to a log file
//! in the replay format, so a live run can be replayed later.

use crate::pipeline::port::PortDescriptor;
use crate::replay::log::{ChannelDecl, LogHeader, LogWriter};
use crate::runtime::process::{Activity, ComponentProcess, TaskContext};
use std::fs::File;
use std::path::PathBuf;

/// Buffer of each recorder connection.
pub const RECORDER_BUFFER: usize = 100;

pub struct RecorderSinkNode {
    task: String,
    path: PathBuf,
    /// One input per recorded output port, same name and type.
    inputs: Vec<PortDescriptor>,
    writer: Option<LogWriter<File>>,
    skipped: u64,
}

impl RecorderSinkNode {
    pub fn new(task: impl Into<String>, path: PathBuf, recorded: &[PortDescriptor]) -> Self {
        let inputs = recorded
            .iter()
            .map(|p| PortDescriptor::input(p.name.clone(), p.type_name.clone()))
            .collect();
        Self {
            task: task.into(),
            path,
            inputs,
            writer: None,
            skipped: 0,
        }
    }

    fn record(&mut self, ctx: &TaskContext) -> anyhow::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for port in &self.inputs {
            while let Some(sample) = ctx.read(&port.name)? {
                if let Err(e) = writer.write(&port.name, sample.timestamp, sample.value()) {
                    // Out-of-order samples are dropped rather than stopping the recording.
                    self.skipped += 1;
                    tracing::debug!("{}: {}", self.task, e);
                }
            }
        }
        Ok(())
    }
}

impl ComponentProcess for RecorderSinkNode {
    fn ports(&self) -> Vec<PortDescriptor> {
        self.inputs.clone()
    }

    fn activity(&self) -> Activity {
        Activity::PortDriven
    }

    fn start(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
        let channels = self
            .inputs
            .iter()
            .map(|p| ChannelDecl::new(p.name.clone(), p.type_name.clone()))
            .collect();
        let writer = LogWriter::create(&self.path, LogHeader::new(self.task.clone(), channels))?;
        tracing::info!("Recording '{}' to {}", self.task, self.path.display());
        self.writer = Some(writer);
        Ok(())
    }

    fn update(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        self.record(ctx)
    }

    fn stop(&mut self, ctx: &mut TaskContext) -> anyhow::Result<()> {
        self.record(ctx)?;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            tracing::info!(
                "Recorded {} samples of '{}' ({} skipped)",
                writer.records_written(),
                self.task,
                self.skipped
            );
        }
        Ok(())
    }
}
