//! Dependency resolution.
//!
//! This module turns a [`RenderGraph`] into a [`ResolvedGraph`]: a pass
//! execution order plus a fully resolved [`ResourceDesc`] for every port that
//! can be resolved.
//!
//! # Algorithm
//!
//! 1. **Cycle Detection** - Depth-first search over the pass graph. A back
//!    edge is reported as [`GraphError::CyclicGraph`].
//! 2. **Topological Sort** - Kahn's algorithm. Among ready passes the one
//!    added to the graph first runs first, so the order only depends on the
//!    builder state.
//! 3. **Descriptor Propagation** - Passes are visited in execution order.
//!    Inputs take the descriptor of their producer; outputs with an inherited
//!    format take the format their consumers require. Usage flags are the
//!    union of the producer's and all consumers' declared usages.
//! 4. **Output Validation** - Every marked output must be resolved.
//!
//! Weakly connected components are computed last. The executor may dispatch
//! them concurrently.

use std::collections::{BTreeSet, HashMap};

use passgraph_core::profile_function;

use crate::error::{GraphError, GraphResult};
use crate::graph::{Edge, PortRef, RenderGraph};
use crate::pass::ResolvedPorts;
use crate::types::{Extent3d, PortDesc, ResourceDesc, ResourceFormat, ResourceUsage};

/// Settings that affect compilation.
///
/// A change of options invalidates a cached compilation just like an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    /// Extent for [`IoSize::Default`](crate::types::IoSize) and the base of
    /// scaled sizes. Usually the frame size.
    pub default_extent: Extent3d,
    /// Format for [`FormatSpec::Default`](crate::types::FormatSpec).
    pub default_format: ResourceFormat,
    /// Keep weakly connected components from sharing resources so that they
    /// can execute concurrently.
    pub isolate_components: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            default_extent: Extent3d::new_2d(1920, 1080),
            default_format: ResourceFormat::Rgba32Float,
            isolate_components: false,
        }
    }
}

/// Where an input port gets its resource from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Connected to a producer output.
    Edge(PortRef),
    /// Not connected. An explicitly described unconnected input gets a
    /// resource of its own.
    Unconnected,
}

/// A resolved input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub port: String,
    pub source: InputSource,
    /// `None` if the port is optional and could not be resolved.
    pub desc: Option<ResourceDesc>,
    pub persistent: bool,
}

/// A resolved output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub port: String,
    /// `None` if nothing supplied a format for the port.
    pub desc: Option<ResourceDesc>,
    /// Connected input ports in edge insertion order.
    pub consumers: Vec<PortRef>,
    pub persistent: bool,
    /// Marked as a graph output.
    pub marked: bool,
}

/// A pass with its resolved ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPass {
    pub name: String,
    /// Instance id of the pass object; persistent resources follow it.
    pub instance: u64,
    /// Index of the pass in the graph's insertion order.
    pub graph_index: usize,
    /// Weakly connected component the pass belongs to.
    pub component: usize,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<ResolvedOutput>,
}

impl ResolvedPass {
    pub fn input(&self, port: &str) -> Option<&ResolvedInput> {
        self.inputs.iter().find(|i| i.port == port)
    }

    pub fn output(&self, port: &str) -> Option<&ResolvedOutput> {
        self.outputs.iter().find(|o| o.port == port)
    }

    /// Resolved descriptors in the form handed to [`RenderPass::compile`](crate::pass::RenderPass::compile).
    pub fn ports(&self) -> ResolvedPorts {
        ResolvedPorts {
            inputs: self
                .inputs
                .iter()
                .map(|i| (i.port.clone(), i.desc))
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|o| (o.port.clone(), o.desc))
                .collect(),
        }
    }
}

/// Result of dependency resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedGraph {
    passes: Vec<ResolvedPass>,
    outputs: Vec<PortRef>,
    component_count: usize,
}

impl ResolvedGraph {
    /// Passes in execution order.
    pub fn passes(&self) -> &[ResolvedPass] {
        &self.passes
    }

    /// Pass names in execution order.
    pub fn pass_order(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|p| p.name.as_str())
    }

    /// Position of a pass in the execution order.
    pub fn position(&self, pass: &str) -> Option<usize> {
        self.passes.iter().position(|p| p.name == pass)
    }

    pub fn pass(&self, name: &str) -> Option<&ResolvedPass> {
        self.passes.iter().find(|p| p.name == name)
    }

    /// Resolved descriptor of an input or output port.
    pub fn descriptor(&self, port: &PortRef) -> Option<&ResourceDesc> {
        let pass = self.pass(&port.pass)?;
        match pass.output(&port.port) {
            Some(output) => output.desc.as_ref(),
            None => pass.input(&port.port)?.desc.as_ref(),
        }
    }

    /// Marked outputs in marking order.
    pub fn outputs(&self) -> &[PortRef] {
        &self.outputs
    }

    /// Number of weakly connected components.
    pub fn component_count(&self) -> usize {
        self.component_count
    }
}

/// Resolve a graph.
///
/// # Errors
///
/// * [`GraphError::CyclicGraph`] - the edges contain a cycle
/// * [`GraphError::FormatConflict`] - two consumers of one output require different formats
/// * [`GraphError::IncompatiblePorts`] - a consumer contradicts its producer's descriptor
/// * [`GraphError::UnresolvedPort`] - a required input could not be resolved
/// * [`GraphError::UnresolvedOutput`] - a marked output is missing or unresolved
pub fn resolve(graph: &RenderGraph, options: &CompileOptions) -> GraphResult<ResolvedGraph> {
    profile_function!();

    let nodes = graph.nodes();
    let indices: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.name.as_str(), i))
        .collect();

    let mut links = Vec::with_capacity(graph.edges().len());
    for edge in graph.edges() {
        let src = *indices
            .get(edge.src.pass.as_str())
            .ok_or_else(|| GraphError::UnknownPass(edge.src.pass.clone()))?;
        let dst = *indices
            .get(edge.dst.pass.as_str())
            .ok_or_else(|| GraphError::UnknownPass(edge.dst.pass.clone()))?;
        links.push((src, dst, edge));
    }

    detect_cycle(nodes.len(), &links)?;
    let order = topological_order(nodes.len(), &links);
    let components = components(nodes.len(), &links, &order);

    let mut resolver = Resolver {
        graph,
        options,
        outputs: HashMap::new(),
    };
    let mut passes = Vec::with_capacity(order.len());
    for &index in &order {
        passes.push(resolver.resolve_pass(index, components[index])?);
    }

    for output in graph.outputs() {
        let resolved = resolver
            .outputs
            .get(output)
            .and_then(|desc| desc.as_ref());
        if resolved.is_none() {
            return Err(GraphError::UnresolvedOutput(output.clone()));
        }
    }

    let component_count = components.iter().copied().max().map_or(0, |max| max + 1);
    log::debug!(
        "Resolved graph '{}': {} passes, {} component(s)",
        graph.name(),
        passes.len(),
        component_count
    );

    Ok(ResolvedGraph {
        passes,
        outputs: graph.outputs().to_vec(),
        component_count,
    })
}

/// Find a back edge with an iterative depth-first search.
fn detect_cycle(n: usize, links: &[(usize, usize, &Edge)]) -> GraphResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut adjacency: Vec<Vec<(usize, &Edge)>> = vec![Vec::new(); n];
    for &(src, dst, edge) in links {
        adjacency[src].push((dst, edge));
    }

    let mut marks = vec![Mark::Unvisited; n];
    for root in 0..n {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next adjacency index)
        let mut stack = vec![(root, 0usize)];
        marks[root] = Mark::OnStack;
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&(succ, edge)) = adjacency[node].get(top.1) {
                top.1 += 1;
                match marks[succ] {
                    Mark::OnStack => {
                        return Err(GraphError::CyclicGraph { edge: edge.clone() });
                    }
                    Mark::Unvisited => {
                        marks[succ] = Mark::OnStack;
                        stack.push((succ, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm with insertion order as the tie breaker.
///
/// The graph must be acyclic.
fn topological_order(n: usize, links: &[(usize, usize, &Edge)]) -> Vec<usize> {
    let mut in_degree = vec![0u32; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(src, dst, _) in links {
        in_degree[dst] += 1;
        successors[src].push(dst);
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(index) = ready.pop_first() {
        order.push(index);
        for &succ in &successors[index] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }
    order
}

/// Label weakly connected components, numbered by first appearance in `order`.
fn components(n: usize, links: &[(usize, usize, &Edge)], order: &[usize]) -> Vec<usize> {
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut parent: Vec<usize> = (0..n).collect();
    for &(src, dst, _) in links {
        let (a, b) = (find(&mut parent, src), find(&mut parent, dst));
        if a != b {
            parent[a.max(b)] = a.min(b);
        }
    }

    let mut labels: HashMap<usize, usize> = HashMap::new();
    let mut component = vec![0; n];
    for &index in order {
        let root = find(&mut parent, index);
        let next = labels.len();
        component[index] = *labels.entry(root).or_insert(next);
    }
    component
}

struct Resolver<'a> {
    graph: &'a RenderGraph,
    options: &'a CompileOptions,
    /// Resolved outputs of the passes visited so far.
    outputs: HashMap<PortRef, Option<ResourceDesc>>,
}

impl Resolver<'_> {
    fn defaults(&self) -> (ResourceFormat, Extent3d) {
        (self.options.default_format, self.options.default_extent)
    }

    fn resolve_pass(&mut self, index: usize, component: usize) -> GraphResult<ResolvedPass> {
        let graph = self.graph;
        let node = &graph.nodes()[index];
        let reflection = &node.reflection;

        let mut inputs = Vec::with_capacity(reflection.inputs().len());
        for port in reflection.inputs() {
            inputs.push(self.resolve_input(&node.name, port)?);
        }

        let mut outputs = Vec::with_capacity(reflection.outputs().len());
        for port in reflection.outputs() {
            let output = self.resolve_output(&node.name, port)?;
            self.outputs
                .insert(PortRef::new(node.name.as_str(), output.port.as_str()), output.desc);
            outputs.push(output);
        }

        Ok(ResolvedPass {
            name: node.name.clone(),
            instance: node.instance,
            graph_index: index,
            component,
            inputs,
            outputs,
        })
    }

    fn resolve_input(&self, pass: &str, port: &PortDesc) -> GraphResult<ResolvedInput> {
        let port_ref = PortRef::new(pass, port.name());

        let (source, desc) = match self.graph.incoming_edge(&port_ref) {
            Some(edge) => {
                let produced = self.outputs.get(&edge.src).copied().flatten();
                if let Some(produced) = &produced {
                    self.check_compatible(&edge.src, &port_ref, port, produced)?;
                }
                (InputSource::Edge(edge.src.clone()), produced)
            }
            None => {
                let desc = port
                    .explicit_format(self.options.default_format)
                    .map(|format| ResourceDesc {
                        format,
                        extent: self.extent_for(port),
                        usage: port.usage_flags(),
                    });
                (InputSource::Unconnected, desc)
            }
        };

        if desc.is_none() && !port.is_optional() {
            return Err(GraphError::UnresolvedPort(port_ref));
        }

        Ok(ResolvedInput {
            port: port.name().to_string(),
            source,
            desc,
            persistent: port.is_persistent(),
        })
    }

    fn resolve_output(&self, pass: &str, port: &PortDesc) -> GraphResult<ResolvedOutput> {
        let port_ref = PortRef::new(pass, port.name());

        let mut consumers = Vec::new();
        let mut required: Option<(PortRef, ResourceFormat)> = None;
        let mut usage = port.usage_flags();
        for edge in self.graph.outgoing_edges(&port_ref) {
            let consumer = self.input_desc(&edge.dst)?;
            usage |= consumer.usage_flags();
            if let Some(format) = consumer.explicit_format(self.options.default_format) {
                match &required {
                    Some((first, first_format)) if *first_format != format => {
                        return Err(GraphError::FormatConflict {
                            producer: port_ref.clone(),
                            first: first.clone(),
                            first_format: *first_format,
                            second: edge.dst.clone(),
                            second_format: format,
                        });
                    }
                    Some(_) => {}
                    None => required = Some((edge.dst.clone(), format)),
                }
            }
            consumers.push(edge.dst.clone());
        }

        let format = port
            .explicit_format(self.options.default_format)
            .or(required.map(|(_, format)| format));
        let desc = format.map(|format| ResourceDesc {
            format,
            extent: self.extent_for(port),
            usage: usage | default_usage(format),
        });

        Ok(ResolvedOutput {
            port: port.name().to_string(),
            desc,
            consumers,
            persistent: port.is_persistent(),
            marked: self.graph.is_output(&port_ref),
        })
    }

    /// Extent of an output or unconnected input. Inherited sizes fall back to
    /// the default extent.
    fn extent_for(&self, port: &PortDesc) -> Extent3d {
        port.size_request()
            .resolve(self.options.default_extent)
            .unwrap_or(self.options.default_extent)
    }

    fn input_desc(&self, port: &PortRef) -> GraphResult<&PortDesc> {
        self.graph
            .reflection(&port.pass)
            .and_then(|reflection| reflection.find_input(&port.port))
            .ok_or_else(|| GraphError::UnknownPort(port.clone()))
    }

    fn check_compatible(
        &self,
        producer: &PortRef,
        consumer: &PortRef,
        port: &PortDesc,
        produced: &ResourceDesc,
    ) -> GraphResult<()> {
        if produced.satisfies(port, self.defaults()) {
            return Ok(());
        }

        let detail = match port.explicit_format(self.options.default_format) {
            Some(format) if format != produced.format => {
                format!("requires {}, producer writes {}", format, produced.format)
            }
            _ => match port.size_request().resolve(self.options.default_extent) {
                Some(extent) => format!("requires {}, producer writes {}", extent, produced.extent),
                None => format!("cannot use {}", produced),
            },
        };
        Err(GraphError::IncompatiblePorts {
            producer: producer.clone(),
            consumer: consumer.clone(),
            detail,
        })
    }
}

/// Usage implied by the format itself.
fn default_usage(format: ResourceFormat) -> ResourceUsage {
    if format.is_depth_stencil() {
        ResourceUsage::DEPTH_STENCIL
    } else {
        ResourceUsage::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{graph_with, reflect};
    use crate::types::IoSize;

    fn edge(src: &str, dst: &str) -> Edge {
        Edge::new(PortRef::new(src, "out"), PortRef::new(dst, "in"))
    }

    #[test]
    fn test_topological_order_ties_by_insertion() {
        // 0 -> 2, 1 -> 2, 3 alone
        let e = edge("a", "b");
        let links = [(0, 2, &e), (1, 2, &e)];
        assert_eq!(topological_order(4, &links), vec![0, 1, 2, 3]);

        // 2 -> 0: 1 is ready before 0 but 2 has to run first
        let links = [(2, 0, &e)];
        assert_eq!(topological_order(3, &links), vec![1, 2, 0]);
    }

    #[test]
    fn test_detect_cycle_names_edge() {
        let ab = edge("A", "B");
        let bc = edge("B", "C");
        let ca = edge("C", "A");
        let links = [(0, 1, &ab), (1, 2, &bc), (2, 0, &ca)];
        match detect_cycle(3, &links) {
            Err(GraphError::CyclicGraph { edge }) => assert_eq!(edge, ca),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_detect_cycle_accepts_dag() {
        let e = edge("a", "b");
        let links = [(0, 1, &e), (0, 2, &e), (1, 3, &e), (2, 3, &e)];
        assert!(detect_cycle(4, &links).is_ok());
    }

    #[test]
    fn test_components_numbered_in_order() {
        let e = edge("a", "b");
        let links = [(0, 2, &e), (1, 3, &e)];
        let order = [0, 1, 2, 3];
        assert_eq!(components(4, &links, &order), vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_input_inherits_producer_descriptor() {
        let graph = graph_with(
            &[
                (
                    "Producer",
                    reflect(&[], &[PortDesc::new("P").format(ResourceFormat::Rgba16Float)]),
                ),
                ("Consumer", reflect(&[PortDesc::new("Q")], &[])),
            ],
            &[("Producer.P", "Consumer.Q")],
        );

        let resolved = resolve(&graph, &CompileOptions::default()).unwrap();
        let p = resolved.descriptor(&PortRef::new("Producer", "P")).unwrap();
        let q = resolved.descriptor(&PortRef::new("Consumer", "Q")).unwrap();
        assert_eq!(p, q);
        assert_eq!(p.format, ResourceFormat::Rgba16Float);
        assert_eq!(p.extent, Extent3d::new_2d(1920, 1080));
    }

    #[test]
    fn test_output_format_inferred_from_consumers() {
        let graph = graph_with(
            &[
                ("A", reflect(&[], &[PortDesc::new("X")])),
                (
                    "B",
                    reflect(&[PortDesc::new("Y").format(ResourceFormat::R32Float)], &[]),
                ),
                ("C", reflect(&[PortDesc::new("Z")], &[])),
            ],
            &[("A.X", "B.Y"), ("A.X", "C.Z")],
        );

        let resolved = resolve(&graph, &CompileOptions::default()).unwrap();
        let z = resolved.descriptor(&PortRef::new("C", "Z")).unwrap();
        assert_eq!(z.format, ResourceFormat::R32Float);
    }

    #[test]
    fn test_format_conflict_names_consumers() {
        let graph = graph_with(
            &[
                ("A", reflect(&[], &[PortDesc::new("X")])),
                (
                    "B",
                    reflect(&[PortDesc::new("Y").format(ResourceFormat::R32Float)], &[]),
                ),
                (
                    "C",
                    reflect(&[PortDesc::new("Z").format(ResourceFormat::Rgba8Unorm)], &[]),
                ),
            ],
            &[("A.X", "B.Y"), ("A.X", "C.Z")],
        );

        match resolve(&graph, &CompileOptions::default()) {
            Err(GraphError::FormatConflict { first, second, .. }) => {
                assert_eq!(first, PortRef::new("B", "Y"));
                assert_eq!(second, PortRef::new("C", "Z"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_incompatible_extent() {
        let graph = graph_with(
            &[
                (
                    "A",
                    reflect(&[], &[PortDesc::new("X").format(ResourceFormat::R8Unorm)]),
                ),
                ("B", reflect(&[PortDesc::new("Y").size(IoSize::HALF)], &[])),
            ],
            &[("A.X", "B.Y")],
        );
        assert!(matches!(
            resolve(&graph, &CompileOptions::default()),
            Err(GraphError::IncompatiblePorts { .. })
        ));
    }

    #[test]
    fn test_unresolved_required_input() {
        let graph = graph_with(&[("A", reflect(&[PortDesc::new("in")], &[]))], &[]);
        assert!(matches!(
            resolve(&graph, &CompileOptions::default()),
            Err(GraphError::UnresolvedPort(port)) if port == PortRef::new("A", "in")
        ));
    }

    #[test]
    fn test_optional_input_stays_unbound() {
        let graph = graph_with(
            &[("A", reflect(&[PortDesc::new("in").optional()], &[]))],
            &[],
        );
        let resolved = resolve(&graph, &CompileOptions::default()).unwrap();
        let input = resolved.pass("A").unwrap().input("in").unwrap();
        assert_eq!(input.source, InputSource::Unconnected);
        assert_eq!(input.desc, None);
    }

    #[test]
    fn test_unconnected_explicit_input_resolves() {
        let graph = graph_with(
            &[(
                "A",
                reflect(
                    &[PortDesc::new("history")
                        .format(ResourceFormat::Rgba32Float)
                        .size(IoSize::HALF)],
                    &[],
                ),
            )],
            &[],
        );
        let resolved = resolve(&graph, &CompileOptions::default()).unwrap();
        let desc = resolved.descriptor(&PortRef::new("A", "history")).unwrap();
        assert_eq!(desc.extent, Extent3d::new_2d(960, 540));
    }

    #[test]
    fn test_unresolved_marked_output() {
        let mut graph = graph_with(&[("A", reflect(&[], &[PortDesc::new("X")]))], &[]);
        // Unmarked, the unresolved output is fine
        assert!(resolve(&graph, &CompileOptions::default()).is_ok());

        graph.mark_output("A", "X").unwrap();
        assert!(matches!(
            resolve(&graph, &CompileOptions::default()),
            Err(GraphError::UnresolvedOutput(port)) if port == PortRef::new("A", "X")
        ));
    }

    #[test]
    fn test_usage_is_union() {
        let graph = graph_with(
            &[
                (
                    "A",
                    reflect(
                        &[],
                        &[PortDesc::new("X")
                            .format(ResourceFormat::Rgba8Unorm)
                            .usage(ResourceUsage::RENDER_TARGET)],
                    ),
                ),
                (
                    "B",
                    reflect(&[PortDesc::new("Y").usage(ResourceUsage::SHADER_READ)], &[]),
                ),
                (
                    "C",
                    reflect(&[PortDesc::new("Z").usage(ResourceUsage::COPY_SRC)], &[]),
                ),
            ],
            &[("A.X", "B.Y"), ("A.X", "C.Z")],
        );
        let resolved = resolve(&graph, &CompileOptions::default()).unwrap();
        let desc = resolved.descriptor(&PortRef::new("A", "X")).unwrap();
        assert_eq!(
            desc.usage,
            ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_READ | ResourceUsage::COPY_SRC
        );
    }

    #[test]
    fn test_default_format_option() {
        let graph = graph_with(
            &[(
                "A",
                reflect(
                    &[],
                    &[PortDesc::new("X").format_spec(crate::types::FormatSpec::Default)],
                ),
            )],
            &[],
        );
        let options = CompileOptions {
            default_format: ResourceFormat::Rgba16Float,
            default_extent: Extent3d::new_2d(64, 32),
            ..Default::default()
        };
        let resolved = resolve(&graph, &options).unwrap();
        let desc = resolved.descriptor(&PortRef::new("A", "X")).unwrap();
        assert_eq!(desc.format, ResourceFormat::Rgba16Float);
        assert_eq!(desc.extent, Extent3d::new_2d(64, 32));
    }
}
