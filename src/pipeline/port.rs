//! Port descriptors for components.
//!
//! Each component declares its ports (inputs/outputs) as a list of
//! `PortDescriptor`s. The graph uses these to validate connections: payload
//! types are opaque schema identifiers compared by equality only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque payload schema identifier, e.g. `/base/samples/RigidBodyState`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(Arc<str>);

impl TypeName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeName({})", self.0)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Descriptor for a component's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub type_name: TypeName,
    /// Inputs only: `configure()` fails unless at least one connection feeds it.
    pub required: bool,
}

impl PortDescriptor {
    pub fn input(name: impl Into<String>, type_name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            type_name: type_name.into(),
            required: false,
        }
    }

    pub fn output(name: impl Into<String>, type_name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            type_name: type_name.into(),
            required: false,
        }
    }

    /// Mark an input as mandatory for configuration.
    pub fn required(mut self) -> Self {
        self.required = self.direction == PortDirection::Input;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// `component.port` address used by configuration files and name-based wiring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortAddress {
    pub component: String,
    pub port: String,
}

impl PortAddress {
    pub fn new(component: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            port: port.into(),
        }
    }

    /// Parse `component.port`. The component part may itself contain dots
    /// (deployment-prefixed names); the last dot separates the port.
    pub fn parse(text: &str) -> Option<Self> {
        let (component, port) = text.rsplit_once('.')?;
        if component.is_empty() || port.is_empty() {
            return None;
        }
        Some(Self::new(component, port))
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.port)
    }
}
