//! Typed pass configuration.
//!
//! Every pass type declares a [`ConfigSchema`]. A [`ConfigRecord`] supplied at
//! creation time is validated against it: unknown keys, mistyped values and
//! out-of-range values are rejected, and missing keys take the schema default.
//!
//! ```
//! use passgraph::config::{ConfigRecord, ConfigSchema};
//!
//! let schema = ConfigSchema::new()
//!     .int_range("samplesPerPixel", 1, 1, 64)
//!     .bool("useImportanceSampling", true);
//!
//! let record = ConfigRecord::new().with("samplesPerPixel", 4);
//! let validated = schema.validate(&record).unwrap();
//!
//! assert_eq!(validated.get_int("samplesPerPixel"), Some(4));
//! assert_eq!(validated.get_bool("useImportanceSampling"), Some(true));
//! ```

use std::fmt;

use crate::types::ResourceFormat;

/// A single typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A variant name of an enumerated option.
    Enum(String),
    Format(ResourceFormat),
}

impl ConfigValue {
    /// Name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Enum(_) => "enum",
            Self::Format(_) => "format",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float value. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String contents of a `String` or `Enum` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Enum(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_format(&self) -> Option<ResourceFormat> {
        match self {
            Self::Format(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Enum(v) => write!(f, "{v}"),
            Self::Format(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for ConfigValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for ConfigValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ResourceFormat> for ConfigValue {
    fn from(v: ResourceFormat) -> Self {
        Self::Format(v)
    }
}

/// An ordered set of named option values.
///
/// Keys keep their insertion order. Setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRecord {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ConfigValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ConfigValue::as_float)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::as_str)
    }

    pub fn get_format(&self, key: &str) -> Option<ResourceFormat> {
        self.get(key).and_then(ConfigValue::as_format)
    }

    /// Return a copy of `self` with every entry of `overrides` applied on top.
    pub fn merged(&self, overrides: &ConfigRecord) -> ConfigRecord {
        let mut merged = self.clone();
        for (key, value) in &overrides.entries {
            merged.set(key.clone(), value.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for ConfigRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = ConfigRecord::new();
        for (key, value) in iter {
            record.set(key, value);
        }
        record
    }
}

/// The accepted kind of a declared option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionKind {
    Bool,
    Int { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    String,
    /// One of the listed variant names. Plain strings are accepted too.
    Enum(Vec<String>),
    Format,
}

impl OptionKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int { .. } => "int",
            Self::Float { .. } => "float",
            Self::String => "string",
            Self::Enum(_) => "enum",
            Self::Format => "format",
        }
    }
}

/// A declared option: its kind and default value.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDecl {
    pub name: String,
    pub kind: OptionKind,
    pub default: ConfigValue,
}

/// Errors produced while validating a configuration record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option '{option}' expects {expected}, got {found}")]
    TypeMismatch {
        option: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("option '{option}' value {value} is out of range")]
    OutOfRange { option: String, value: String },

    #[error("option '{option}' has no variant '{variant}' (expected one of {allowed:?})")]
    UnknownVariant {
        option: String,
        variant: String,
        allowed: Vec<String>,
    },

    /// The pass factory rejected an otherwise well-typed record.
    #[error("{0}")]
    Rejected(String),
}

impl ConfigError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

/// Declared options of a pass type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
    options: Vec<OptionDecl>,
}

impl ConfigSchema {
    /// Create a schema with no options.
    pub fn new() -> Self {
        Self::default()
    }

    fn declare(mut self, name: &str, kind: OptionKind, default: ConfigValue) -> Self {
        self.options.retain(|o| o.name != name);
        self.options.push(OptionDecl {
            name: name.to_string(),
            kind,
            default,
        });
        self
    }

    pub fn bool(self, name: &str, default: bool) -> Self {
        self.declare(name, OptionKind::Bool, ConfigValue::Bool(default))
    }

    pub fn int(self, name: &str, default: i64) -> Self {
        self.declare(
            name,
            OptionKind::Int {
                min: None,
                max: None,
            },
            ConfigValue::Int(default),
        )
    }

    /// An integer option limited to `min..=max`.
    pub fn int_range(self, name: &str, default: i64, min: i64, max: i64) -> Self {
        self.declare(
            name,
            OptionKind::Int {
                min: Some(min),
                max: Some(max),
            },
            ConfigValue::Int(default),
        )
    }

    pub fn float(self, name: &str, default: f64) -> Self {
        self.declare(
            name,
            OptionKind::Float {
                min: None,
                max: None,
            },
            ConfigValue::Float(default),
        )
    }

    /// A float option limited to `min..=max`.
    pub fn float_range(self, name: &str, default: f64, min: f64, max: f64) -> Self {
        self.declare(
            name,
            OptionKind::Float {
                min: Some(min),
                max: Some(max),
            },
            ConfigValue::Float(default),
        )
    }

    pub fn string(self, name: &str, default: &str) -> Self {
        self.declare(
            name,
            OptionKind::String,
            ConfigValue::String(default.to_string()),
        )
    }

    /// An enumerated option. `default` should be one of `variants`.
    pub fn enumeration(self, name: &str, default: &str, variants: &[&str]) -> Self {
        self.declare(
            name,
            OptionKind::Enum(variants.iter().map(|v| v.to_string()).collect()),
            ConfigValue::Enum(default.to_string()),
        )
    }

    pub fn format(self, name: &str, default: ResourceFormat) -> Self {
        self.declare(name, OptionKind::Format, ConfigValue::Format(default))
    }

    pub fn option(&self, name: &str) -> Option<&OptionDecl> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn options(&self) -> &[OptionDecl] {
        &self.options
    }

    /// Validate `record` and return the complete record.
    ///
    /// The result holds every declared option in declaration order, with
    /// defaults for the keys `record` does not set. Values are normalized:
    /// integers given for float options become floats, strings given for enum
    /// options become enum values, and format names given as strings are parsed.
    pub fn validate(&self, record: &ConfigRecord) -> Result<ConfigRecord, ConfigError> {
        for (key, _) in record.iter() {
            if self.option(key).is_none() {
                return Err(ConfigError::UnknownOption(key.to_string()));
            }
        }

        let mut validated = ConfigRecord::new();
        for decl in &self.options {
            let value = match record.get(&decl.name) {
                Some(value) => check_value(decl, value)?,
                None => decl.default.clone(),
            };
            validated.set(decl.name.clone(), value);
        }
        Ok(validated)
    }
}

fn check_value(decl: &OptionDecl, value: &ConfigValue) -> Result<ConfigValue, ConfigError> {
    let mismatch = || ConfigError::TypeMismatch {
        option: decl.name.clone(),
        expected: decl.kind.name(),
        found: value.kind_name(),
    };
    let out_of_range = || ConfigError::OutOfRange {
        option: decl.name.clone(),
        value: value.to_string(),
    };

    match (&decl.kind, value) {
        (OptionKind::Bool, ConfigValue::Bool(_)) => Ok(value.clone()),
        (OptionKind::Int { min, max }, ConfigValue::Int(v)) => {
            if min.is_some_and(|min| *v < min) || max.is_some_and(|max| *v > max) {
                return Err(out_of_range());
            }
            Ok(value.clone())
        }
        (OptionKind::Float { min, max }, ConfigValue::Float(_) | ConfigValue::Int(_)) => {
            let v = value.as_float().ok_or_else(mismatch)?;
            if !v.is_finite() || min.is_some_and(|min| v < min) || max.is_some_and(|max| v > max)
            {
                return Err(out_of_range());
            }
            Ok(ConfigValue::Float(v))
        }
        (OptionKind::String, ConfigValue::String(_)) => Ok(value.clone()),
        (OptionKind::Enum(variants), ConfigValue::Enum(v) | ConfigValue::String(v)) => {
            if variants.iter().any(|variant| variant == v) {
                Ok(ConfigValue::Enum(v.clone()))
            } else {
                Err(ConfigError::UnknownVariant {
                    option: decl.name.clone(),
                    variant: v.clone(),
                    allowed: variants.clone(),
                })
            }
        }
        (OptionKind::Format, ConfigValue::Format(_)) => Ok(value.clone()),
        (OptionKind::Format, ConfigValue::String(name)) => name
            .parse::<ResourceFormat>()
            .map(ConfigValue::Format)
            .map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}
