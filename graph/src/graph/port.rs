//! Port references and edges.

use std::fmt;
use std::str::FromStr;

/// A `(pass, port)` pair.
///
/// Displays and parses as `pass.port`. The pass name is split at the first
/// `.`, so port names may themselves contain dots but pass names may not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub pass: String,
    pub port: String,
}

impl PortRef {
    pub fn new(pass: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            pass: pass.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pass, self.port)
    }
}

/// Error returned when a string is not of the form `pass.port`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid port reference '{0}', expected 'pass.port'")]
pub struct InvalidPortRef(pub String);

impl FromStr for PortRef {
    type Err = InvalidPortRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((pass, port)) if !pass.is_empty() && !port.is_empty() => {
                Ok(PortRef::new(pass, port))
            }
            _ => Err(InvalidPortRef(s.to_string())),
        }
    }
}

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Producing output port.
    pub src: PortRef,
    /// Consuming input port.
    pub dst: PortRef,
}

impl Edge {
    pub fn new(src: PortRef, dst: PortRef) -> Self {
        Self { src, dst }
    }

    /// Check whether either endpoint belongs to `pass`.
    pub fn touches(&self, pass: &str) -> bool {
        self.src.pass == pass || self.dst.pass == pass
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}
