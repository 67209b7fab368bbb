//! Replay log format.
//!
//! A log is a JSON Lines file. The first line is a header naming the task
//! and declaring its channels; every following line is one record:
//!
//! ```text
//! {"format":"uwv-log","version":1,"task":"sonar","recorded_at":"2026-03-02T10:00:00Z","channels":[{"name":"BaseScan","type":"/base/samples/SonarBeam"}]}
//! {"channel":"BaseScan","t_us":1000,"payload":{"bearing":0.1,"beam":[0,3,9]}}
//! ```
//!
//! Timestamps are microseconds and must not decrease within a channel.

use crate::error::{DataflowError, Result};
use crate::pipeline::port::TypeName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOG_FORMAT: &str = "uwv-log";
pub const LOG_VERSION: u32 = 1;

/// One channel of a logged task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: TypeName,
}

impl ChannelDecl {
    pub fn new(name: impl Into<String>, type_name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// First line of a log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogHeader {
    pub format: String,
    pub version: u32,
    /// Channel group; becomes the replayed component's name.
    pub task: String,
    pub recorded_at: DateTime<Utc>,
    pub channels: Vec<ChannelDecl>,
}

impl LogHeader {
    pub fn new(task: impl Into<String>, channels: Vec<ChannelDecl>) -> Self {
        Self {
            format: LOG_FORMAT.to_string(),
            version: LOG_VERSION,
            task: task.into(),
            recorded_at: Utc::now(),
            channels,
        }
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelDecl> {
        self.channels.iter().find(|c| c.name == name)
    }

    fn validate(&self, origin: &str) -> Result<()> {
        if self.format != LOG_FORMAT {
            return Err(DataflowError::schema(
                origin,
                format!("unexpected format '{}'", self.format),
            ));
        }
        if self.version != LOG_VERSION {
            return Err(DataflowError::schema(
                origin,
                format!("unsupported version {}", self.version),
            ));
        }
        if self.task.is_empty() {
            return Err(DataflowError::schema(origin, "header has an empty task name"));
        }
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.name.as_str()) {
                return Err(DataflowError::schema(
                    origin,
                    format!("channel '{}' declared twice", channel.name),
                ));
            }
        }
        Ok(())
    }
}

/// One logged sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub channel: String,
    pub t_us: u64,
    pub payload: Value,
}

impl LogRecord {
    pub fn timestamp(&self) -> Duration {
        Duration::from_micros(self.t_us)
    }
}

/// A fully read and validated log.
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    pub header: LogHeader,
    pub records: Vec<LogRecord>,
}

/// Read and validate the log at `path`.
/// Undecodable bytes are a format problem, not an I/O failure.
fn text_line(origin: &str, index: usize, line: std::io::Result<String>) -> Result<String> {
    line.map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => {
            DataflowError::schema(origin, format!("line {}: not UTF-8", index + 1))
        }
        _ => e.into(),
    })
}

pub fn read_log(path: &Path) -> Result<LogFile> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DataflowError::LogNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let origin = path.display().to_string();
    let mut lines = BufReader::new(file).lines().enumerate();

    let header: LogHeader = loop {
        match lines.next() {
            None => return Err(DataflowError::schema(&origin, "log is empty")),
            Some((index, line)) => {
                let line = text_line(&origin, index, line)?;
                if line.trim().is_empty() {
                    continue;
                }
                break serde_json::from_str(&line).map_err(|e| {
                    DataflowError::schema(&origin, format!("malformed header: {e}"))
                })?;
            }
        }
    };
    header.validate(&origin)?;

    let mut last_seen: HashMap<&str, u64> = header
        .channels
        .iter()
        .map(|c| (c.name.as_str(), 0))
        .collect();
    let mut records = Vec::new();

    for (index, line) in lines {
        let line = text_line(&origin, index, line)?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;
        let record: LogRecord = serde_json::from_str(&line).map_err(|e| {
            DataflowError::schema(&origin, format!("line {line_no}: malformed record: {e}"))
        })?;
        let Some(last) = last_seen.get_mut(record.channel.as_str()) else {
            return Err(DataflowError::schema(
                &origin,
                format!("line {line_no}: undeclared channel '{}'", record.channel),
            ));
        };
        if record.t_us < *last {
            return Err(DataflowError::schema(
                &origin,
                format!(
                    "line {line_no}: timestamp of channel '{}' goes back from {} to {} us",
                    record.channel, last, record.t_us
                ),
            ));
        }
        *last = record.t_us;
        records.push(record);
    }

    tracing::debug!(
        "Read {} records on {} channels from {}",
        records.len(),
        header.channels.len(),
        origin
    );
    Ok(LogFile {
        path: path.to_path_buf(),
        header,
        records,
    })
}

/// Writes a log one record at a time.
pub struct LogWriter<W: Write> {
    out: BufWriter<W>,
    header: LogHeader,
    last_seen: HashMap<String, u64>,
    records: u64,
}

impl LogWriter<File> {
    /// Create (or truncate) a log file at `path`.
    pub fn create(path: &Path, header: LogHeader) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::new(File::create(path)?, header)
    }
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W, header: LogHeader) -> Result<Self> {
        header.validate(&header.task)?;
        let mut out = BufWriter::new(writer);
        serde_json::to_writer(&mut out, &header)
            .map_err(|e| DataflowError::Config(format!("Failed to serialize log header: {}", e)))?;
        out.write_all(b"\n")?;
        let last_seen = header
            .channels
            .iter()
            .map(|c| (c.name.clone(), 0))
            .collect();
        Ok(Self {
            out,
            header,
            last_seen,
            records: 0,
        })
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn write(&mut self, channel: &str, timestamp: Duration, payload: &Value) -> Result<()> {
        let t_us = timestamp.as_micros() as u64;
        let Some(last) = self.last_seen.get_mut(channel) else {
            return Err(DataflowError::schema(
                &self.header.task,
                format!("undeclared channel '{channel}'"),
            ));
        };
        if t_us < *last {
            return Err(DataflowError::schema(
                &self.header.task,
                format!("timestamp of channel '{channel}' goes back from {last} to {t_us} us"),
            ));
        }
        *last = t_us;

        #[derive(Serialize)]
        struct RecordRef<'a> {
            channel: &'a str,
            t_us: u64,
            payload: &'a Value,
        }
        serde_json::to_writer(
            &mut self.out,
            &RecordRef {
                channel,
                t_us,
                payload,
            },
        )
        .map_err(|e| DataflowError::Config(format!("Failed to serialize log record: {}", e)))?;
        self.out.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
