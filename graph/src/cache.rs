//! Compilation cache.
//!
//! [`CompilationCache::ensure_compiled`] runs the resolver, the pass compile
//! hooks and the allocator only when the graph changed since the last
//! successful compilation. Changes are detected through
//! [`RenderGraph::revision`] and the [`CompileOptions`], so no builder call has
//! to notify the cache explicitly.

use passgraph_core::profile_scope;

use crate::allocator::{Lifetime, ResourceAllocator, ResourcePlan};
use crate::compiler::{self, CompileOptions, ResolvedGraph};
use crate::error::{GraphError, GraphResult};
use crate::graph::{PortRef, RenderGraph};
use crate::provider::{ResourceHandle, ResourceProvider};
use crate::types::ResourceDesc;

/// A graph ready for execution: pass order, resolved descriptors and
/// assigned resources.
#[derive(Debug)]
pub struct CompiledGraph {
    graph_uid: u64,
    revision: u64,
    options: CompileOptions,
    resolved: ResolvedGraph,
    plan: ResourcePlan,
}

impl CompiledGraph {
    /// Pass names in execution order.
    pub fn pass_order(&self) -> Vec<&str> {
        self.resolved.pass_order().collect()
    }

    pub fn pass_count(&self) -> usize {
        self.resolved.passes().len()
    }

    /// Resolved descriptor of a port.
    pub fn resolved(&self, port: &PortRef) -> Option<&ResourceDesc> {
        self.resolved.descriptor(port)
    }

    /// Backing resource assigned to a port.
    pub fn resource(&self, port: &PortRef) -> Option<ResourceHandle> {
        self.plan.handle(port)
    }

    /// Virtual resource bound to a port.
    pub fn binding(&self, port: &PortRef) -> Option<&crate::allocator::VirtualResource> {
        self.plan.binding(port)
    }

    /// Lifetime of the resource bound to a port.
    pub fn lifetime(&self, port: &PortRef) -> Option<Lifetime> {
        self.plan.binding(port).map(|vr| vr.lifetime)
    }

    /// Marked outputs in marking order.
    pub fn outputs(&self) -> &[PortRef] {
        self.resolved.outputs()
    }

    /// Number of distinct backing resources.
    pub fn resource_count(&self) -> usize {
        self.plan.slot_count()
    }

    /// Number of weakly connected components.
    pub fn component_count(&self) -> usize {
        self.resolved.component_count()
    }

    pub fn resolved_graph(&self) -> &ResolvedGraph {
        &self.resolved
    }

    pub fn plan(&self) -> &ResourcePlan {
        &self.plan
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Revision of the graph this was compiled from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Check whether this compilation still describes `graph` under `options`.
    pub fn is_current(&self, graph: &RenderGraph, options: &CompileOptions) -> bool {
        self.graph_uid == graph.uid()
            && self.revision == graph.revision()
            && self.options == *options
    }

    pub(crate) fn into_plan(self) -> ResourcePlan {
        self.plan
    }
}

/// Memoizes the compilation of one graph.
///
/// After a failed compilation the previous result stays cached but is no
/// longer current, so it can neither be executed nor leak its resources.
#[derive(Debug, Default)]
pub struct CompilationCache {
    compiled: Option<CompiledGraph>,
    invalidated: bool,
    compile_count: u64,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compilation of `graph`, compiling it first if needed.
    pub fn ensure_compiled<P: ResourceProvider + ?Sized>(
        &mut self,
        graph: &mut RenderGraph,
        allocator: &mut ResourceAllocator,
        provider: &mut P,
        options: &CompileOptions,
    ) -> GraphResult<&CompiledGraph> {
        if !self.is_current(graph, options) {
            self.compile(graph, allocator, provider, options)?;
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| GraphError::StaleCompilation {
                graph: graph.name().to_string(),
            })
    }

    fn compile<P: ResourceProvider + ?Sized>(
        &mut self,
        graph: &mut RenderGraph,
        allocator: &mut ResourceAllocator,
        provider: &mut P,
        options: &CompileOptions,
    ) -> GraphResult<()> {
        profile_scope!("compile_graph");
        log::debug!(
            "Compiling graph '{}' (revision {})",
            graph.name(),
            graph.revision()
        );

        let resolved = compiler::resolve(graph, options)?;

        let nodes = graph.nodes_mut();
        for pass in resolved.passes() {
            nodes[pass.graph_index]
                .pass
                .compile(&pass.ports())
                .map_err(|source| GraphError::PassCompileFailed {
                    pass: pass.name.clone(),
                    source,
                })?;
        }

        let previous = self.compiled.take().map(CompiledGraph::into_plan);
        let plan = allocator.allocate(&resolved, previous, provider, options)?;

        log::info!(
            "Compiled graph '{}': {} pass(es), {} resource(s)",
            graph.name(),
            resolved.passes().len(),
            plan.slot_count()
        );

        self.compiled = Some(CompiledGraph {
            graph_uid: graph.uid(),
            revision: graph.revision(),
            options: *options,
            resolved,
            plan,
        });
        self.invalidated = false;
        self.compile_count += 1;
        Ok(())
    }

    /// Check whether the cached compilation can be used for `graph`.
    pub fn is_current(&self, graph: &RenderGraph, options: &CompileOptions) -> bool {
        !self.invalidated
            && self
                .compiled
                .as_ref()
                .is_some_and(|compiled| compiled.is_current(graph, options))
    }

    /// Force the next [`ensure_compiled`](Self::ensure_compiled) to recompile.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// The cached compilation, if it is current for `graph`.
    pub fn get(&self, graph: &RenderGraph, options: &CompileOptions) -> Option<&CompiledGraph> {
        if self.is_current(graph, options) {
            self.compiled.as_ref()
        } else {
            None
        }
    }

    /// Remove the cached compilation, current or not.
    pub fn take(&mut self) -> Option<CompiledGraph> {
        self.compiled.take()
    }

    /// Number of successful compilations.
    pub fn compile_count(&self) -> u64 {
        self.compile_count
    }
}
