//! Run configuration for uwv-dataflow
//!
//! A run configuration describes one orchestrated run:
//! - Deployments to launch and built-in relay tasks to create
//! - Logs to replay and how to pace them
//! - Parameter assignments per component
//! - Connections, displays and port recording
//! - Runtime timeouts and logging
//!
//! Files are TOML (`.toml`) or JSON (`.json`), chosen by extension.
//!
//! # Example
//!
//! ```toml
//! deployments = ["uw_localization_test"]
//!
//! [runtime]
//! wait_budget_ms = 5000
//!
//! [replay]
//! files = ["logs/depth_reader.log", "logs/sonar.log"]
//! playback = { mode = "real_time", speed = 2.0 }
//!
//! [parameters.uw_particle_localization]
//! particle_number = 20
//! init_position = [0.0, -4.0, 0.0]
//!
//! [[connections]]
//! from = "depth_reader.depth_samples"
//! to = "uw_particle_localization.depth_samples"
//! policy = { buffer = { fifo = 100 } }
//!
//! [[displays]]
//! port = "uw_particle_localization.particles"
//! kind = "ParticleSet"
//! frequency = 5.0
//! ```

use crate::error::{DataflowError, Result};
use crate::pipeline::nodes::DisplayKind;
use crate::pipeline::param::ParamValue;
use crate::pipeline::policy::ConnectionPolicy;
use crate::pipeline::port::PortAddress;
use crate::replay::clock::PlaybackMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long `resolve` waits for a component to appear, in milliseconds
pub const DEFAULT_WAIT_BUDGET_MS: u64 = 5000;

/// How long a component thread may take to answer a lifecycle request
pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 2000;

/// How long a blocking write waits for buffer space
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 1000;

/// Run loop polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default tracing filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,uwv_dataflow=debug";

// ==================== Runtime Settings ====================

/// Timeouts and failure handling of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Bounded wait when resolving a component by name
    pub wait_budget_ms: u64,

    /// Bounded wait for a component thread to answer configure/start/stop
    pub control_timeout_ms: u64,

    /// Default timeout of Block connections
    pub backpressure_timeout_ms: u64,

    /// Run loop polling interval
    pub poll_interval_ms: u64,

    /// Stop the run when any component fails
    pub fail_fast: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            wait_budget_ms: DEFAULT_WAIT_BUDGET_MS,
            control_timeout_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            fail_fast: true,
        }
    }
}

impl RuntimeSettings {
    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.wait_budget_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ==================== Logging ====================

/// Tracing output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub filter: Option<String>,

    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

// ==================== Graph Description ====================

/// Built-in pass-through task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Component name
    pub name: String,

    /// Payload type of both ports
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Logs to replay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub files: Vec<PathBuf>,

    pub playback: PlaybackMode,

    /// Channels each replayed task must provide
    pub require: BTreeMap<String, Vec<String>>,
}

/// One connection, written as `component.port` addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub policy: ConnectionPolicy,
}

/// A throttled display of one output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub port: String,
    pub kind: DisplayKind,
    #[serde(default = "default_display_frequency")]
    pub frequency: f64,
}

fn default_display_frequency() -> f64 {
    10.0
}

/// Record all output ports of live components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordConfig {
    pub dir: PathBuf,
}

// ==================== Run Config ====================

/// Complete description of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub runtime: RuntimeSettings,
    pub logging: LoggingConfig,
    pub deployments: Vec<String>,
    pub relays: Vec<RelayConfig>,
    pub replay: Option<ReplayConfig>,
    /// component → parameter → value
    pub parameters: BTreeMap<String, BTreeMap<String, ParamValue>>,
    pub connections: Vec<ConnectionConfig>,
    pub displays: Vec<DisplayConfig>,
    pub record: Option<RecordConfig>,
}

impl RunConfig {
    /// Load a run configuration, picking the format from the extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataflowError::Config(format!("Failed to read run config {:?}: {}", path, e))
        })?;

        let config: RunConfig = match Format::of(path)? {
            Format::Toml => toml::from_str(&content).map_err(|e| {
                DataflowError::Config(format!("Failed to parse run config {:?}: {}", path, e))
            })?,
            Format::Json => serde_json::from_str(&content).map_err(|e| {
                DataflowError::Config(format!("Failed to parse run config {:?}: {}", path, e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save the run configuration in the format matching the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DataflowError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match Format::of(path)? {
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| DataflowError::Config(format!("Failed to serialize run config: {}", e)))?,
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| DataflowError::Config(format!("Failed to serialize run config: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            DataflowError::Config(format!("Failed to write run config {:?}: {}", path, e))
        })
    }

    /// Check addresses and numbers that serde cannot
    pub fn validate(&self) -> Result<()> {
        if let Some(replay) = &self.replay {
            replay
                .playback
                .validate()
                .map_err(|reason| DataflowError::Config(format!("Replay: {reason}")))?;
        }
        for conn in &self.connections {
            parse_address(&conn.from)?;
            parse_address(&conn.to)?;
        }
        for display in &self.displays {
            parse_address(&display.port)?;
            if !(display.frequency.is_finite() && display.frequency > 0.0) {
                return Err(DataflowError::Config(format!(
                    "Display of '{}' needs a positive frequency, got {}",
                    display.port, display.frequency
                )));
            }
        }
        for relay in &self.relays {
            if relay.name.is_empty() || relay.type_name.is_empty() {
                return Err(DataflowError::Config(
                    "Relay tasks need a name and a type".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Parse a `component.port` address from configuration
pub fn parse_address(text: &str) -> Result<PortAddress> {
    PortAddress::parse(text).ok_or_else(|| {
        DataflowError::Config(format!("'{}' is not a component.port address", text))
    })
}

enum Format {
    Toml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            _ => Err(DataflowError::Config(format!(
                "Unsupported config format {:?} (expected .toml or .json)",
                path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::policy::Buffering;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        deployments = ["uw_localization_test"]

        [[relays]]
        name = "depth_relay"
        type = "/base/samples/RigidBodyState"

        [runtime]
        wait_budget_ms = 250

        [replay]
        files = ["depth_reader.log"]
        playback = { mode = "step" }
        require = { depth_reader = ["depth_samples"] }

        [parameters.uw_particle_localization]
        particle_number = 20
        init_position = [0.0, -4.0, 0.0]

        [[connections]]
        from = "depth_reader.depth_samples"
        to = "depth_relay.in"
        policy = { buffer = { fifo = 100 } }

        [[displays]]
        port = "depth_relay.out"
        kind = "RigidBodyState"
    "#;

    #[test]
    fn test_parse_toml() {
        let config: RunConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.runtime.wait_budget(), Duration::from_millis(250));
        assert_eq!(config.runtime.control_timeout_ms, DEFAULT_CONTROL_TIMEOUT_MS);
        assert_eq!(config.replay.as_ref().unwrap().playback, PlaybackMode::Step);
        assert_eq!(config.connections[0].policy.buffer, Buffering::Fifo(100));
        assert_eq!(config.displays[0].frequency, 10.0);
        assert_eq!(
            config.parameters["uw_particle_localization"]["particle_number"],
            ParamValue::Int(20)
        );
        assert_eq!(config.logging.filter(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let config: RunConfig = toml::from_str(SAMPLE).unwrap();
        config.save(&path).unwrap();
        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_bad_address_and_extension() {
        let mut config = RunConfig::default();
        config.connections.push(ConnectionConfig {
            from: "no_port".into(),
            to: "b.in".into(),
            policy: ConnectionPolicy::default(),
        });
        assert!(matches!(config.validate(), Err(DataflowError::Config(_))));

        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("run.yml");
        std::fs::write(&yaml, "").unwrap();
        assert!(RunConfig::load(&yaml).is_err());
    }

    #[test]
    fn test_rejects_nan_playback_speed() {
        let config: RunConfig = toml::from_str(
            r#"
            [replay]
            files = ["depth_reader.log"]
            playback = { mode = "real_time", speed = nan }
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DataflowError::Config(_)));
        assert!(err.to_string().contains("speed"), "{err}");
    }
}
