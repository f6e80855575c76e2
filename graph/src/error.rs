//! Error types for the render graph.

use std::fmt;

use crate::config::ConfigError;
use crate::graph::{Edge, InvalidPortRef, PortRef};
use crate::pass::PassError;
use crate::provider::ProviderError;
use crate::session::GraphId;
use crate::types::ResourceFormat;

/// Result alias used throughout the crate.
pub type GraphResult<T> = Result<T, GraphError>;

/// Family an error belongs to, which tells the caller what state it left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised by a registry or builder call. The call had no effect.
    Definition,
    /// Raised while compiling. The graph is unchanged and any cached
    /// compilation stays invalid.
    Compilation,
    /// Raised while allocating or executing a frame.
    Runtime,
    /// Raised by session bookkeeping.
    Session,
}

/// Errors produced by the render graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    // Registry
    #[error("pass type '{0}' is already registered")]
    DuplicateType(String),

    #[error("unknown pass type '{0}'")]
    UnknownType(String),

    #[error("invalid configuration for pass '{pass}' of type '{type_name}'")]
    InvalidConfig {
        pass: String,
        type_name: String,
        #[source]
        source: ConfigError,
    },

    // Builder
    #[error("a pass named '{0}' already exists")]
    DuplicateName(String),

    #[error("invalid pass name '{0}': names must be non-empty and contain no '.'")]
    InvalidPassName(String),

    #[error("unknown pass '{0}'")]
    UnknownPass(String),

    #[error("unknown port '{0}'")]
    UnknownPort(PortRef),

    #[error("pass '{pass}' declares port '{port}' more than once")]
    DuplicatePort { pass: String, port: String },

    #[error(transparent)]
    InvalidPortRef(#[from] InvalidPortRef),

    #[error("input '{port}' is already connected to '{existing}'")]
    PortAlreadyConnected { port: PortRef, existing: PortRef },

    #[error("edge '{0}' not found")]
    EdgeNotFound(Edge),

    #[error("edge '{0}' connects a pass to itself")]
    SelfLoop(Edge),

    // Compilation
    #[error("graph contains a cycle through edge '{edge}'")]
    CyclicGraph { edge: Edge },

    #[error("port '{0}' could not be resolved")]
    UnresolvedPort(PortRef),

    #[error(
        "output '{producer}' has conflicting format requirements: \
         '{first}' requires {first_format}, '{second}' requires {second_format}"
    )]
    FormatConflict {
        producer: PortRef,
        first: PortRef,
        first_format: ResourceFormat,
        second: PortRef,
        second_format: ResourceFormat,
    },

    #[error("input '{consumer}' is incompatible with '{producer}': {detail}")]
    IncompatiblePorts {
        producer: PortRef,
        consumer: PortRef,
        detail: String,
    },

    #[error("graph output '{0}' is missing or unresolved")]
    UnresolvedOutput(PortRef),

    #[error("pass '{pass}' failed to compile")]
    PassCompileFailed {
        pass: String,
        #[source]
        source: PassError,
    },

    // Runtime
    #[error("compiled graph '{graph}' is out of date")]
    StaleCompilation { graph: String },

    #[error("failed to allocate resource for '{port}'")]
    AllocationFailed {
        port: PortRef,
        #[source]
        source: ProviderError,
    },

    #[error("pass '{pass}' failed to execute")]
    PassExecutionFailed {
        pass: String,
        #[source]
        source: PassError,
    },

    // Session
    #[error("unknown graph {0}")]
    UnknownGraph(GraphId),

    #[error("session has no active graph")]
    NoActiveGraph,
}

impl GraphError {
    /// Family of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateType(_)
            | Self::UnknownType(_)
            | Self::InvalidConfig { .. }
            | Self::DuplicateName(_)
            | Self::InvalidPassName(_)
            | Self::UnknownPass(_)
            | Self::UnknownPort(_)
            | Self::DuplicatePort { .. }
            | Self::InvalidPortRef(_)
            | Self::PortAlreadyConnected { .. }
            | Self::EdgeNotFound(_)
            | Self::SelfLoop(_) => ErrorKind::Definition,
            Self::CyclicGraph { .. }
            | Self::UnresolvedPort(_)
            | Self::FormatConflict { .. }
            | Self::IncompatiblePorts { .. }
            | Self::UnresolvedOutput(_)
            | Self::PassCompileFailed { .. } => ErrorKind::Compilation,
            Self::StaleCompilation { .. }
            | Self::AllocationFailed { .. }
            | Self::PassExecutionFailed { .. } => ErrorKind::Runtime,
            Self::UnknownGraph(_) | Self::NoActiveGraph => ErrorKind::Session,
        }
    }
}

/// Non-fatal diagnostics returned by builder operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    /// A configuration update removed ports that were in use.
    PortsRemoved {
        pass: String,
        /// Names of the removed ports.
        ports: Vec<String>,
        /// Edges dropped because an endpoint was removed.
        dropped_edges: Vec<Edge>,
        /// Graph outputs unmarked because their port was removed.
        unmarked_outputs: Vec<PortRef>,
    },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortsRemoved {
                pass,
                ports,
                dropped_edges,
                unmarked_outputs,
            } => write!(
                f,
                "pass '{}' removed ports [{}], dropping {} edge(s) and {} output(s)",
                pass,
                ports.join(", "),
                dropped_edges.len(),
                unmarked_outputs.len()
            ),
        }
    }
}
