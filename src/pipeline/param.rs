//! Component parameters.
//!
//! Values are opaque, component-defined blobs: the runtime checks that an
//! assigned value has the declared shape and never interprets the numbers.
//! A "covariance" may be a flat 3x3 matrix for one component and a scalar for
//! another.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector(Vec<f64>),
    Matrix {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, and integers widened to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Vector elements, or the row-major data of a matrix.
    pub fn as_slice(&self) -> Option<&[f64]> {
        match self {
            ParamValue::Vector(v) => Some(v),
            ParamValue::Matrix { data, .. } => Some(data),
            _ => None,
        }
    }

    fn shape(&self) -> String {
        match self {
            ParamValue::Bool(_) => "bool".to_string(),
            ParamValue::Int(_) => "int".to_string(),
            ParamValue::Float(_) => "float".to_string(),
            ParamValue::String(_) => "string".to_string(),
            ParamValue::Vector(v) => format!("vector[{}]", v.len()),
            ParamValue::Matrix { rows, cols, .. } => format!("matrix[{rows}x{cols}]"),
        }
    }
}

/// Declared shape of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    String,
    /// Fixed-size vector when `len` is set.
    Vector { len: Option<usize> },
    /// Flat row-major matrix; a vector of `rows * cols` elements is accepted too.
    Matrix { rows: usize, cols: usize },
}

impl ParamKind {
    pub fn accepts(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamKind::Bool, ParamValue::Bool(_)) => true,
            (ParamKind::Int, ParamValue::Int(_)) => true,
            (ParamKind::Float, ParamValue::Float(_) | ParamValue::Int(_)) => true,
            (ParamKind::String, ParamValue::String(_)) => true,
            (ParamKind::Vector { len }, ParamValue::Vector(v)) => len.map_or(true, |n| v.len() == n),
            (ParamKind::Matrix { rows, cols }, ParamValue::Matrix { rows: r, cols: c, data }) => {
                r == rows && c == cols && data.len() == rows * cols
            }
            (ParamKind::Matrix { rows, cols }, ParamValue::Vector(v)) => v.len() == rows * cols,
            _ => false,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Bool => write!(f, "bool"),
            ParamKind::Int => write!(f, "int"),
            ParamKind::Float => write!(f, "float"),
            ParamKind::String => write!(f, "string"),
            ParamKind::Vector { len: Some(n) } => write!(f, "vector[{n}]"),
            ParamKind::Vector { len: None } => write!(f, "vector"),
            ParamKind::Matrix { rows, cols } => write!(f, "matrix[{rows}x{cols}]"),
        }
    }
}

/// Declaration of a parameter on a component.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<ParamValue>,
}

impl ParamDescriptor {
    /// A parameter that must be assigned before `configure()`.
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    /// An optional parameter without a default.
    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    /// An optional parameter that falls back to `default`.
    pub fn with_default(name: impl Into<String>, kind: ParamKind, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// Resolved parameter set handed to a component's configure hook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_float)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn slice(&self, name: &str) -> Option<&[f64]> {
        self.get(name).and_then(ParamValue::as_slice)
    }

    /// Merge assigned values over declared defaults and check every
    /// declaration. Returns the first problem found as a readable reason.
    pub fn resolve(
        declared: &[ParamDescriptor],
        assigned: &Parameters,
    ) -> std::result::Result<Parameters, String> {
        let mut resolved = Parameters::new();
        for decl in declared {
            let value = assigned.get(&decl.name).or(decl.default.as_ref());
            match value {
                Some(value) if decl.kind.accepts(value) => {
                    resolved.set(decl.name.clone(), value.clone());
                }
                Some(value) => {
                    return Err(format!(
                        "parameter '{}' expects {}, got {}",
                        decl.name,
                        decl.kind,
                        value.shape()
                    ));
                }
                None if decl.required => {
                    return Err(format!("parameter '{}' is not set", decl.name));
                }
                None => {}
            }
        }
        Ok(resolved)
    }
}

impl FromIterator<(String, ParamValue)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localization_params() -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::required("particle_number", ParamKind::Int),
            ParamDescriptor::required("init_position", ParamKind::Vector { len: Some(3) }),
            ParamDescriptor::with_default(
                "static_motion_covariance",
                ParamKind::Matrix { rows: 3, cols: 3 },
                ParamValue::Vector(vec![0.0; 9]),
            ),
            ParamDescriptor::optional("sonar_covariance", ParamKind::Float),
        ]
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let mut assigned = Parameters::new();
        assigned.set("particle_number", ParamValue::Int(20));
        assigned.set("init_position", ParamValue::Vector(vec![0.0, -4.0, 0.0]));

        let resolved = Parameters::resolve(&localization_params(), &assigned).unwrap();
        assert_eq!(resolved.int("particle_number"), Some(20));
        assert_eq!(resolved.slice("static_motion_covariance").unwrap().len(), 9);
        assert!(!resolved.contains("sonar_covariance"));
    }

    #[test]
    fn test_resolve_reports_missing_required() {
        let mut assigned = Parameters::new();
        assigned.set("init_position", ParamValue::Vector(vec![0.0, 0.0, 0.0]));
        let err = Parameters::resolve(&localization_params(), &assigned).unwrap_err();
        assert_eq!(err, "parameter 'particle_number' is not set");
    }

    #[test]
    fn test_resolve_reports_shape_mismatch() {
        let mut assigned = Parameters::new();
        assigned.set("particle_number", ParamValue::Int(100));
        assigned.set("init_position", ParamValue::Vector(vec![0.0, 0.0]));
        let err = Parameters::resolve(&localization_params(), &assigned).unwrap_err();
        assert!(err.contains("vector[3]"));
        assert!(err.contains("vector[2]"));
    }

    #[test]
    fn test_float_accepts_int_and_matrix_accepts_flat_vector() {
        assert!(ParamKind::Float.accepts(&ParamValue::Int(2)));
        assert!(!ParamKind::Int.accepts(&ParamValue::Float(2.0)));
        let kind = ParamKind::Matrix { rows: 3, cols: 3 };
        assert!(kind.accepts(&ParamValue::Vector(vec![4.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 0.0])));
        assert!(!kind.accepts(&ParamValue::Float(2.0)));
    }

    #[test]
    fn test_untagged_deserialization() {
        let values: BTreeMap<String, ParamValue> = toml::from_str(
            r#"
            pure_random_motion = true
            particle_number = 20
            minimum_depth = 0.0
            yaml_map = "maps/nurc.yml"
            init_variance = [10, 10, 0]
            covariance = { rows = 2, cols = 2, data = [1.0, 0.0, 0.0, 1.0] }
            "#,
        )
        .unwrap();
        assert_eq!(values["pure_random_motion"], ParamValue::Bool(true));
        assert_eq!(values["particle_number"], ParamValue::Int(20));
        assert_eq!(values["minimum_depth"], ParamValue::Float(0.0));
        assert_eq!(values["yaml_map"].as_str(), Some("maps/nurc.yml"));
        assert_eq!(values["init_variance"], ParamValue::Vector(vec![10.0, 10.0, 0.0]));
        assert!(matches!(values["covariance"], ParamValue::Matrix { rows: 2, cols: 2, .. }));
    }
}
