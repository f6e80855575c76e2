//! Render graph builder.
//!
//! [`RenderGraph`] is the mutable description of a graph: named pass
//! instances, edges from output ports to input ports, and the set of outputs
//! surfaced to the caller. Every builder call either applies fully or returns
//! an error and leaves the graph untouched.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new("MinimalPathTracer");
//! graph.add_pass("PathTracer", registry.create("PathTracer", "PathTracer", &config)?)?;
//! graph.add_pass("ToneMapper", registry.create("ToneMapper", "ToneMapper", &config)?)?;
//! graph.add_edge_str("PathTracer.color", "ToneMapper.src")?;
//! graph.mark_output_str("ToneMapper.dst")?;
//! ```
//!
//! Each successful mutation bumps [`RenderGraph::revision`], which is how the
//! [`CompilationCache`](crate::cache::CompilationCache) notices edits.

mod port;

pub use port::{Edge, InvalidPortRef, PortRef};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ConfigRecord;
use crate::error::{GraphError, GraphResult, GraphWarning};
use crate::pass::{PassReflection, RenderPass};
use crate::registry::{PassInstance, PassType};

fn next_instance_id() -> u64 {
    static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

/// A pass stored in a graph.
pub(crate) struct PassNode {
    pub(crate) name: String,
    /// Process-unique id of this pass object, renewed whenever the pass is
    /// recreated.
    pub(crate) instance: u64,
    pub(crate) pass_type: Arc<PassType>,
    pub(crate) config: ConfigRecord,
    pub(crate) pass: Box<dyn RenderPass>,
    pub(crate) reflection: PassReflection,
}

impl PassNode {
    fn from_instance(name: String, instance: PassInstance) -> GraphResult<Self> {
        let reflection = instance.pass.reflect();
        if let Some(port) = reflection.duplicate_port() {
            return Err(GraphError::DuplicatePort {
                pass: name,
                port: port.to_string(),
            });
        }
        Ok(Self {
            name,
            instance: next_instance_id(),
            pass_type: instance.pass_type,
            config: instance.config,
            pass: instance.pass,
            reflection,
        })
    }

    fn into_instance(self) -> PassInstance {
        PassInstance {
            name: self.name,
            pass_type: self.pass_type,
            config: self.config,
            pass: self.pass,
        }
    }
}

/// Mutable description of a render graph.
pub struct RenderGraph {
    uid: u64,
    name: String,
    /// Passes in insertion order.
    passes: Vec<PassNode>,
    edges: Vec<Edge>,
    outputs: Vec<PortRef>,
    revision: u64,
}

impl RenderGraph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        static NEXT_UID: AtomicU64 = AtomicU64::new(1);
        Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            passes: Vec::new(),
            edges: Vec::new(),
            outputs: Vec::new(),
            revision: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique identifier of this graph.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Counter bumped by every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // ------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------

    /// Add a pass under `name`.
    ///
    /// The instance is renamed to `name`. Fails with
    /// [`GraphError::InvalidPassName`] if `name` is empty or contains a `.`,
    /// since `"pass.port"` references could not address it,
    /// [`GraphError::DuplicateName`] if the name is taken and
    /// [`GraphError::DuplicatePort`] if the pass declares a port name twice.
    pub fn add_pass(&mut self, name: impl Into<String>, instance: PassInstance) -> GraphResult<()> {
        let name = name.into();
        if name.is_empty() || name.contains('.') {
            return Err(GraphError::InvalidPassName(name));
        }
        if self.contains_pass(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        let node = PassNode::from_instance(name, instance)?;
        log::debug!(
            "Graph '{}': added pass '{}' ({})",
            self.name,
            node.name,
            node.pass_type.name()
        );
        self.passes.push(node);
        self.touch();
        Ok(())
    }

    /// Add a pass under the name it was created with.
    pub fn add_instance(&mut self, instance: PassInstance) -> GraphResult<()> {
        let name = instance.name.clone();
        self.add_pass(name, instance)
    }

    /// Remove a pass together with every edge and output that refers to it.
    pub fn remove_pass(&mut self, name: &str) -> GraphResult<PassInstance> {
        let index = self.require_pass(name)?;
        let node = self.passes.remove(index);

        let before = self.edges.len();
        self.edges.retain(|edge| !edge.touches(name));
        self.outputs.retain(|output| output.pass != name);
        log::debug!(
            "Graph '{}': removed pass '{}' and {} edge(s)",
            self.name,
            name,
            before - self.edges.len()
        );

        self.touch();
        Ok(node.into_instance())
    }

    pub fn contains_pass(&self, name: &str) -> bool {
        self.pass_index(name).is_some()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Pass names in insertion order.
    pub fn pass_names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|node| node.name.as_str())
    }

    pub fn pass(&self, name: &str) -> Option<&dyn RenderPass> {
        self.node(name).map(|node| node.pass.as_ref())
    }

    /// Mutable access to a pass.
    ///
    /// Changes that alter the pass's ports must be followed by
    /// [`request_recompile`](Self::request_recompile).
    pub fn pass_mut(&mut self, name: &str) -> Option<&mut dyn RenderPass> {
        self.node_mut(name).map(|node| node.pass.as_mut())
    }

    /// Downcast a pass to its concrete type.
    pub fn pass_as<T: RenderPass>(&self, name: &str) -> Option<&T> {
        self.pass(name)?.as_any().downcast_ref::<T>()
    }

    /// Mutably downcast a pass to its concrete type.
    pub fn pass_as_mut<T: RenderPass>(&mut self, name: &str) -> Option<&mut T> {
        self.pass_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    /// Type name of a pass.
    pub fn pass_type(&self, name: &str) -> Option<&str> {
        self.node(name).map(|node| node.pass_type.name())
    }

    /// Current configuration of a pass.
    pub fn config(&self, name: &str) -> Option<&ConfigRecord> {
        self.node(name).map(|node| &node.config)
    }

    /// Ports declared by a pass, as of its last reflection.
    pub fn reflection(&self, name: &str) -> Option<&PassReflection> {
        self.node(name).map(|node| &node.reflection)
    }

    /// Merge `partial` into a pass's configuration and recreate the pass.
    ///
    /// The pass is rebuilt by its type's factory from the merged record. Edges
    /// and outputs on ports that no longer exist are dropped and reported as a
    /// [`GraphWarning::PortsRemoved`]. On error nothing changes.
    pub fn update_pass_config(
        &mut self,
        name: &str,
        partial: &ConfigRecord,
    ) -> GraphResult<Vec<GraphWarning>> {
        let index = self.require_pass(name)?;
        let node = &self.passes[index];
        let merged = node.config.merged(partial);
        let (pass, config) =
            node.pass_type
                .instantiate(&merged)
                .map_err(|source| GraphError::InvalidConfig {
                    pass: name.to_string(),
                    type_name: node.pass_type.name().to_string(),
                    source,
                })?;
        let reflection = pass.reflect();
        if let Some(port) = reflection.duplicate_port() {
            return Err(GraphError::DuplicatePort {
                pass: name.to_string(),
                port: port.to_string(),
            });
        }

        let node = &mut self.passes[index];
        node.pass = pass;
        node.instance = next_instance_id();
        node.config = config;
        let warnings = self.apply_reflection(index, reflection);
        log::debug!("Graph '{}': updated config of pass '{}'", self.name, name);
        self.touch();
        Ok(warnings)
    }

    /// Re-query every pass's ports and invalidate any cached compilation.
    ///
    /// Edges and outputs on ports that disappeared are dropped and reported.
    pub fn request_recompile(&mut self) -> GraphResult<Vec<GraphWarning>> {
        let reflections = self
            .passes
            .iter()
            .map(|node| {
                let reflection = node.pass.reflect();
                match reflection.duplicate_port() {
                    Some(port) => Err(GraphError::DuplicatePort {
                        pass: node.name.clone(),
                        port: port.to_string(),
                    }),
                    None => Ok(reflection),
                }
            })
            .collect::<GraphResult<Vec<_>>>()?;

        let mut warnings = Vec::new();
        for (index, reflection) in reflections.into_iter().enumerate() {
            warnings.extend(self.apply_reflection(index, reflection));
        }
        log::debug!("Graph '{}': recompile requested", self.name);
        self.touch();
        Ok(warnings)
    }

    /// Install a new reflection on a pass and prune what it invalidates.
    fn apply_reflection(&mut self, index: usize, reflection: PassReflection) -> Vec<GraphWarning> {
        let node = &mut self.passes[index];
        let old = std::mem::replace(&mut node.reflection, reflection);
        let new = &node.reflection;
        let pass = node.name.clone();

        let removed: Vec<String> = old
            .inputs()
            .iter()
            .filter(|p| new.find_input(p.name()).is_none())
            .chain(
                old.outputs()
                    .iter()
                    .filter(|p| new.find_output(p.name()).is_none()),
            )
            .map(|p| p.name().to_string())
            .collect();

        if removed.is_empty() {
            return Vec::new();
        }

        let mut dropped_edges = Vec::new();
        self.edges.retain(|edge| {
            let src_gone = edge.src.pass == pass && new.find_output(&edge.src.port).is_none();
            let dst_gone = edge.dst.pass == pass && new.find_input(&edge.dst.port).is_none();
            let keep = !(src_gone || dst_gone);
            if !keep {
                dropped_edges.push(edge.clone());
            }
            keep
        });

        let mut unmarked_outputs = Vec::new();
        self.outputs.retain(|output| {
            let keep = output.pass != pass || new.find_output(&output.port).is_some();
            if !keep {
                unmarked_outputs.push(output.clone());
            }
            keep
        });

        let warning = GraphWarning::PortsRemoved {
            pass,
            ports: removed,
            dropped_edges,
            unmarked_outputs,
        };
        log::warn!("Graph '{}': {}", self.name, warning);
        vec![warning]
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Connect `producer.out_port` to `consumer.in_port`.
    ///
    /// Fails if either endpoint is unknown, the input already has an incoming
    /// edge, the edge is a self loop, or the edge would close a cycle. The
    /// edge set is unchanged on failure.
    pub fn add_edge(
        &mut self,
        producer: &str,
        out_port: &str,
        consumer: &str,
        in_port: &str,
    ) -> GraphResult<()> {
        self.connect(Edge::new(
            PortRef::new(producer, out_port),
            PortRef::new(consumer, in_port),
        ))
    }

    /// Connect two ports given as `"pass.port"` strings.
    pub fn add_edge_str(&mut self, src: &str, dst: &str) -> GraphResult<()> {
        self.connect(Edge::new(src.parse()?, dst.parse()?))
    }

    /// Add an edge.
    pub fn connect(&mut self, edge: Edge) -> GraphResult<()> {
        self.require_output(&edge.src)?;
        self.require_input(&edge.dst)?;

        if edge.src.pass == edge.dst.pass {
            return Err(GraphError::SelfLoop(edge));
        }
        if let Some(existing) = self.incoming_edge(&edge.dst) {
            return Err(GraphError::PortAlreadyConnected {
                port: edge.dst.clone(),
                existing: existing.src.clone(),
            });
        }
        if self.reaches(&edge.dst.pass, &edge.src.pass) {
            return Err(GraphError::CyclicGraph { edge });
        }

        log::debug!("Graph '{}': added edge {}", self.name, edge);
        self.edges.push(edge);
        self.touch();
        Ok(())
    }

    /// Remove the edge `producer.out_port -> consumer.in_port`.
    pub fn remove_edge(
        &mut self,
        producer: &str,
        out_port: &str,
        consumer: &str,
        in_port: &str,
    ) -> GraphResult<()> {
        self.disconnect(&Edge::new(
            PortRef::new(producer, out_port),
            PortRef::new(consumer, in_port),
        ))
    }

    /// Remove an edge given as `"pass.port"` strings.
    pub fn remove_edge_str(&mut self, src: &str, dst: &str) -> GraphResult<()> {
        self.disconnect(&Edge::new(src.parse()?, dst.parse()?))
    }

    /// Remove an edge.
    pub fn disconnect(&mut self, edge: &Edge) -> GraphResult<()> {
        let index = self
            .edges
            .iter()
            .position(|e| e == edge)
            .ok_or_else(|| GraphError::EdgeNotFound(edge.clone()))?;
        self.edges.remove(index);
        log::debug!("Graph '{}': removed edge {}", self.name, edge);
        self.touch();
        Ok(())
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The edge feeding an input port, if any.
    pub fn incoming_edge(&self, input: &PortRef) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.dst == *input)
    }

    /// Edges leaving an output port, in insertion order.
    pub fn outgoing_edges<'a>(&'a self, output: &'a PortRef) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |edge| edge.src == *output)
    }

    /// Check whether `to` is reachable from `from` along edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited = vec![from];
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            for edge in self.edges.iter().filter(|e| e.src.pass == current) {
                let next = edge.dst.pass.as_str();
                if !visited.contains(&next) {
                    visited.push(next);
                    queue.push_back(next);
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    /// Mark an output port as a graph output. Marking twice has no effect.
    pub fn mark_output(&mut self, pass: &str, port: &str) -> GraphResult<()> {
        let output = PortRef::new(pass, port);
        self.require_output(&output)?;
        if self.outputs.contains(&output) {
            return Ok(());
        }
        log::debug!("Graph '{}': marked output {}", self.name, output);
        self.outputs.push(output);
        self.touch();
        Ok(())
    }

    /// Mark an output given as a `"pass.port"` string.
    pub fn mark_output_str(&mut self, output: &str) -> GraphResult<()> {
        let output: PortRef = output.parse()?;
        self.mark_output(&output.pass, &output.port)
    }

    /// Unmark a graph output. Unmarking an unmarked port has no effect.
    pub fn unmark_output(&mut self, pass: &str, port: &str) -> GraphResult<()> {
        let output = PortRef::new(pass, port);
        self.require_output(&output)?;
        let before = self.outputs.len();
        self.outputs.retain(|o| *o != output);
        if self.outputs.len() != before {
            log::debug!("Graph '{}': unmarked output {}", self.name, output);
            self.touch();
        }
        Ok(())
    }

    /// Marked outputs in marking order.
    pub fn outputs(&self) -> &[PortRef] {
        &self.outputs
    }

    pub fn is_output(&self, port: &PortRef) -> bool {
        self.outputs.contains(port)
    }

    // ------------------------------------------------------------------
    // Internal access
    // ------------------------------------------------------------------

    pub(crate) fn pass_index(&self, name: &str) -> Option<usize> {
        self.passes.iter().position(|node| node.name == name)
    }

    pub(crate) fn nodes(&self) -> &[PassNode] {
        &self.passes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [PassNode] {
        &mut self.passes
    }

    fn node(&self, name: &str) -> Option<&PassNode> {
        self.passes.iter().find(|node| node.name == name)
    }

    fn node_mut(&mut self, name: &str) -> Option<&mut PassNode> {
        self.passes.iter_mut().find(|node| node.name == name)
    }

    fn require_pass(&self, name: &str) -> GraphResult<usize> {
        self.pass_index(name)
            .ok_or_else(|| GraphError::UnknownPass(name.to_string()))
    }

    fn require_output(&self, port: &PortRef) -> GraphResult<()> {
        let index = self.require_pass(&port.pass)?;
        match self.passes[index].reflection.find_output(&port.port) {
            Some(_) => Ok(()),
            None => Err(GraphError::UnknownPort(port.clone())),
        }
    }

    fn require_input(&self, port: &PortRef) -> GraphResult<()> {
        let index = self.require_pass(&port.pass)?;
        match self.passes[index].reflection.find_input(&port.port) {
            Some(_) => Ok(()),
            None => Err(GraphError::UnknownPort(port.clone())),
        }
    }
}

impl fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderGraph")
            .field("name", &self.name)
            .field("passes", &self.pass_names().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("outputs", &self.outputs)
            .field("revision", &self.revision)
            .finish()
    }
}
