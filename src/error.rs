//! Error handling for the dataflow runtime
//!
//! One taxonomy covers the whole orchestration core: resolution, graph
//! construction, lifecycle, runtime delivery and replay. Graph-construction
//! errors are always raised before activation, never during delivery.

use crate::pipeline::component::ComponentState;
use crate::pipeline::port::{PortDirection, TypeName};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for orchestration operations
#[derive(Error, Debug)]
pub enum DataflowError {
    /// No live process or replay source answered to the name in time
    #[error("Component '{name}' not found (waited {waited:?})")]
    NotFound { name: String, waited: Duration },

    /// Two sources claim the same component name
    #[error("Component name '{name}' is claimed by both {first} and {second}")]
    AmbiguousBinding {
        name: String,
        first: String,
        second: String,
    },

    /// The named port does not exist with the requested direction
    #[error("No {direction} port '{port}' on component '{component}'")]
    PortNotFound {
        component: String,
        port: String,
        direction: PortDirection,
    },

    /// Source and destination payload types differ
    #[error("Type mismatch connecting {from} ({from_type}) to {to} ({to_type})")]
    TypeMismatch {
        from: String,
        to: String,
        from_type: TypeName,
        to_type: TypeName,
    },

    /// The port pair is already wired with a different policy
    #[error("Connection {from} -> {to} already exists with a different policy")]
    DuplicateConnection { from: String, to: String },

    /// Blocking connections form a cycle that could deadlock
    #[error("Blocking connections form a cycle: {}", cycle.join(" -> "))]
    CyclicBackpressure { cycle: Vec<String> },

    /// Parameters or required connections are missing or incompatible
    #[error("Invalid configuration for '{component}': {reason}")]
    InvalidConfiguration { component: String, reason: String },

    /// Lifecycle operation not allowed from the current state
    #[error("Cannot {operation} '{component}' while {from}")]
    InvalidTransition {
        component: String,
        from: ComponentState,
        operation: &'static str,
    },

    /// A blocking write did not find space before its deadline
    #[error("Backpressure timeout after {timeout:?} on {connection}")]
    BackpressureTimeout {
        connection: String,
        timeout: Duration,
    },

    /// An input has no data left and its producer has failed
    #[error("Upstream '{upstream}' of {component}.{port} has failed")]
    UpstreamFailed {
        component: String,
        port: String,
        upstream: String,
    },

    /// A component entered the Failed state while running
    #[error("Component '{component}' failed: {reason}")]
    ComponentFailed { component: String, reason: String },

    /// A component thread did not answer a lifecycle request in time
    #[error("Component '{component}' did not answer {operation} within {timeout:?}")]
    ControlTimeout {
        component: String,
        operation: &'static str,
        timeout: Duration,
    },

    /// The graph can no longer be changed
    #[error("Graph is sealed; connections must be made before activation")]
    GraphSealed,

    /// A replay log file is missing
    #[error("Log file not found: {path:?}")]
    LogNotFound { path: PathBuf },

    /// A replay log is malformed or lacks an expected channel
    #[error("Schema mismatch in {origin}: {message}")]
    SchemaMismatch { origin: String, message: String },

    /// Errors related to configuration loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DataflowError>,
    },
}

impl DataflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DataflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any context wrappers
    pub fn root(&self) -> &DataflowError {
        match self {
            DataflowError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self.root() {
            DataflowError::NotFound { .. } => "not_found",
            DataflowError::AmbiguousBinding { .. } => "ambiguous_binding",
            DataflowError::PortNotFound { .. } => "port_not_found",
            DataflowError::TypeMismatch { .. } => "type_mismatch",
            DataflowError::DuplicateConnection { .. } => "duplicate_connection",
            DataflowError::CyclicBackpressure { .. } => "cyclic_backpressure",
            DataflowError::InvalidConfiguration { .. } => "invalid_configuration",
            DataflowError::InvalidTransition { .. } => "invalid_transition",
            DataflowError::BackpressureTimeout { .. } => "backpressure_timeout",
            DataflowError::UpstreamFailed { .. } => "upstream_failed",
            DataflowError::ComponentFailed { .. } => "component_failed",
            DataflowError::ControlTimeout { .. } => "control_timeout",
            DataflowError::GraphSealed => "graph_sealed",
            DataflowError::LogNotFound { .. } => "log_not_found",
            DataflowError::SchemaMismatch { .. } => "schema_mismatch",
            DataflowError::Config(_) => "config",
            DataflowError::Io(_) => "io",
            DataflowError::WithContext { .. } => "with_context",
        }
    }

    pub(crate) fn schema(origin: impl Into<String>, message: impl Into<String>) -> Self {
        DataflowError::SchemaMismatch {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for dataflow operations
pub type Result<T> = std::result::Result<T, DataflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DataflowError::InvalidConfiguration {
            component: "uw_particle_localization".to_string(),
            reason: "parameter 'particle_number' is not set".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for 'uw_particle_localization': parameter 'particle_number' is not set"
        );
    }

    #[test]
    fn test_error_with_context_keeps_root() {
        let err = DataflowError::GraphSealed.with_context("connecting sonar");
        assert!(err.to_string().contains("connecting sonar"));
        assert!(matches!(err.root(), DataflowError::GraphSealed));
        assert_eq!(err.as_label(), "graph_sealed");
    }

    #[test]
    fn test_cycle_display() {
        let err = DataflowError::CyclicBackpressure {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.to_string().ends_with("a -> b -> a"));
    }

    #[test]
    fn test_transition_display() {
        let err = DataflowError::InvalidTransition {
            component: "mm".into(),
            from: ComponentState::Running,
            operation: "configure",
        };
        assert_eq!(err.to_string(), "Cannot configure 'mm' while Running");
    }
}
