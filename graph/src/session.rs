//! Sessions.
//!
//! A [`Session`] owns everything needed to render: the shared pass registry,
//! a resource provider, the allocator pool and any number of named graphs,
//! one of which is active. It is passed explicitly to whoever builds or
//! renders graphs; there is no global session.
//!
//! ```ignore
//! let mut session = Session::new(registry, DummyProvider::new(), SessionConfig::default());
//! let id = session.add_graph(build_graph(&session)?);
//! for _ in 0..4 {
//!     let outputs = session.render_frame()?;
//!     log::info!("frame {}: {} outputs", outputs.frame_index(), outputs.len());
//! }
//! let spp = ConfigRecord::new().with("samplesPerPixel", 4);
//! session.graph_mut(id)?.update_pass_config("PathTracer", &spp)?;
//! session.render_frame()?; // recompiles
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use passgraph_core::{frame_mark, profile_plot, profile_scope};

use crate::allocator::ResourceAllocator;
use crate::cache::{CompilationCache, CompiledGraph};
use crate::compiler::CompileOptions;
use crate::config::ConfigRecord;
use crate::error::{GraphError, GraphResult};
use crate::executor::{ExecutionMode, Executor, FrameOutputs};
use crate::graph::RenderGraph;
use crate::pass::FrameContext;
use crate::provider::ResourceProvider;
use crate::registry::{PassInstance, PassRegistry};
use crate::types::{Extent3d, ResourceFormat};

/// Identifier of a graph within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// Session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Frame size. Resolves default and scaled port sizes.
    pub default_extent: Extent3d,
    /// Format for ports that ask for the default format.
    pub default_format: ResourceFormat,
    pub mode: ExecutionMode,
    /// Run independent components concurrently when the provider allows it.
    pub parallel_dispatch: bool,
    /// Fixed time advance per frame in seconds, for batch rendering.
    /// Wall-clock time is used when `None`.
    pub time_step: Option<f64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_extent: Extent3d::new_2d(1920, 1080),
            default_format: ResourceFormat::Rgba32Float,
            mode: ExecutionMode::FailFast,
            parallel_dispatch: false,
            time_step: None,
        }
    }
}

struct GraphEntry {
    id: GraphId,
    graph: RenderGraph,
    cache: CompilationCache,
}

/// Owner of graphs, resources and frame timing.
pub struct Session<P: ResourceProvider> {
    registry: Arc<PassRegistry>,
    provider: P,
    config: SessionConfig,
    allocator: ResourceAllocator,
    graphs: Vec<GraphEntry>,
    active: Option<GraphId>,
    next_id: u64,
    frame_index: u64,
    time: f64,
    last_frame: Option<Instant>,
}

impl<P: ResourceProvider> Session<P> {
    pub fn new(registry: Arc<PassRegistry>, provider: P, config: SessionConfig) -> Self {
        log::debug!(
            "Created session with {} pass type(s), frame size {}",
            registry.len(),
            config.default_extent
        );
        Self {
            registry,
            provider,
            config,
            allocator: ResourceAllocator::new(),
            graphs: Vec::new(),
            active: None,
            next_id: 1,
            frame_index: 0,
            time: 0.0,
            last_frame: None,
        }
    }

    pub fn registry(&self) -> &Arc<PassRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Index of the next frame to render.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Number of idle resources in the allocator pool.
    pub fn pool_size(&self) -> usize {
        self.allocator.pool_size()
    }

    /// Create a pass through the session's registry.
    pub fn create_pass(
        &self,
        type_name: &str,
        name: impl Into<String>,
        config: &ConfigRecord,
    ) -> GraphResult<PassInstance> {
        self.registry.create(type_name, name, config)
    }

    // ------------------------------------------------------------------
    // Graphs
    // ------------------------------------------------------------------

    /// Add a graph. The first graph added becomes active.
    pub fn add_graph(&mut self, graph: RenderGraph) -> GraphId {
        let id = GraphId(self.next_id);
        self.next_id += 1;
        log::debug!("Session: added graph '{}' as {}", graph.name(), id);
        self.graphs.push(GraphEntry {
            id,
            graph,
            cache: CompilationCache::new(),
        });
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    /// Remove a graph and release its resources.
    pub fn remove_graph(&mut self, id: GraphId) -> GraphResult<RenderGraph> {
        let index = self
            .graphs
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(GraphError::UnknownGraph(id))?;
        let mut entry = self.graphs.remove(index);
        if let Some(compiled) = entry.cache.take() {
            self.allocator.recycle(compiled.into_plan());
        }
        self.allocator.trim(&mut self.provider);
        if self.active == Some(id) {
            self.active = None;
        }
        log::debug!("Session: removed graph '{}'", entry.graph.name());
        Ok(entry.graph)
    }

    pub fn graph(&self, id: GraphId) -> GraphResult<&RenderGraph> {
        self.entry(id).map(|entry| &entry.graph)
    }

    pub fn graph_mut(&mut self, id: GraphId) -> GraphResult<&mut RenderGraph> {
        self.entry_mut(id).map(|entry| &mut entry.graph)
    }

    /// Graph ids in insertion order.
    pub fn graph_ids(&self) -> impl Iterator<Item = GraphId> + '_ {
        self.graphs.iter().map(|entry| entry.id)
    }

    /// Find a graph by name.
    pub fn find_graph(&self, name: &str) -> Option<GraphId> {
        self.graphs
            .iter()
            .find(|entry| entry.graph.name() == name)
            .map(|entry| entry.id)
    }

    pub fn set_active_graph(&mut self, id: GraphId) -> GraphResult<()> {
        self.entry(id)?;
        self.active = Some(id);
        Ok(())
    }

    pub fn active_graph_id(&self) -> Option<GraphId> {
        self.active
    }

    pub fn active_graph(&self) -> GraphResult<&RenderGraph> {
        let id = self.active.ok_or(GraphError::NoActiveGraph)?;
        self.graph(id)
    }

    pub fn active_graph_mut(&mut self) -> GraphResult<&mut RenderGraph> {
        let id = self.active.ok_or(GraphError::NoActiveGraph)?;
        self.graph_mut(id)
    }

    /// The current compilation of a graph, if it has one.
    pub fn compiled(&self, id: GraphId) -> GraphResult<Option<&CompiledGraph>> {
        let options = self.compile_options();
        self.entry(id)
            .map(|entry| entry.cache.get(&entry.graph, &options))
    }

    /// Compile a graph now instead of before its next frame.
    pub fn compile(&mut self, id: GraphId) -> GraphResult<&CompiledGraph> {
        let options = self.compile_options();
        let index = self.index_of(id)?;
        let entry = &mut self.graphs[index];
        entry.cache.ensure_compiled(
            &mut entry.graph,
            &mut self.allocator,
            &mut self.provider,
            &options,
        )
    }

    /// Number of compilations a graph went through.
    pub fn compile_count(&self, id: GraphId) -> GraphResult<u64> {
        self.entry(id).map(|entry| entry.cache.compile_count())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Change the frame size. Graphs recompile before their next frame.
    pub fn resize(&mut self, extent: Extent3d) {
        if self.config.default_extent != extent {
            log::debug!("Session: resized to {}", extent);
            self.config.default_extent = extent;
        }
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.config.mode = mode;
    }

    /// Release idle pooled resources to the provider.
    pub fn trim(&mut self) -> usize {
        self.allocator.trim(&mut self.provider)
    }

    fn parallel(&self) -> bool {
        self.config.parallel_dispatch && self.provider.supports_concurrent_submission()
    }

    /// Options the session compiles with.
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            default_extent: self.config.default_extent,
            default_format: self.config.default_format,
            isolate_components: self.parallel(),
        }
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Render one frame of the active graph.
    pub fn render_frame(&mut self) -> GraphResult<FrameOutputs> {
        self.render_frame_with_scene(None)
    }

    /// Render one frame of the active graph with external scene state.
    ///
    /// Compiles the graph first if it changed. A pass that requests
    /// recompilation gets it before the next frame. The frame counter only
    /// advances when the frame succeeds.
    pub fn render_frame_with_scene(
        &mut self,
        scene: Option<&(dyn Any + Sync)>,
    ) -> GraphResult<FrameOutputs> {
        profile_scope!("render_frame");

        let id = self.active.ok_or(GraphError::NoActiveGraph)?;
        let options = self.compile_options();
        let executor = Executor::new(self.config.mode).with_parallel(self.parallel());
        let now = Instant::now();
        let (time, delta_time) = self.frame_time(now);
        let frame = FrameContext {
            frame_index: self.frame_index,
            time,
            delta_time,
            scene,
        };

        let index = self.index_of(id)?;
        let entry = &mut self.graphs[index];
        let compiled = entry.cache.ensure_compiled(
            &mut entry.graph,
            &mut self.allocator,
            &mut self.provider,
            &options,
        )?;
        let outputs = executor.execute(&mut entry.graph, compiled, &frame)?;

        if outputs.recompile_requested() {
            for warning in entry.graph.request_recompile()? {
                log::debug!("Recompile request: {}", warning);
            }
        }

        self.frame_index += 1;
        self.time = time;
        self.last_frame = Some(now);
        frame_mark!();
        profile_plot!("pooled_resources", self.allocator.pool_size());
        Ok(outputs)
    }

    /// Render `count` frames of the active graph, stopping at the first error.
    pub fn render_frames(&mut self, count: usize) -> GraphResult<Vec<FrameOutputs>> {
        (0..count).map(|_| self.render_frame()).collect()
    }

    /// Time and delta of a frame starting at `now`, measured from the last
    /// frame that completed.
    fn frame_time(&self, now: Instant) -> (f64, f64) {
        match self.config.time_step {
            Some(step) if self.frame_index == 0 => (0.0, step),
            Some(step) => (self.time + step, step),
            None => {
                let delta = self
                    .last_frame
                    .map_or(0.0, |last| now.duration_since(last).as_secs_f64());
                (self.time + delta, delta)
            }
        }
    }

    fn index_of(&self, id: GraphId) -> GraphResult<usize> {
        self.graphs
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(GraphError::UnknownGraph(id))
    }

    fn entry(&self, id: GraphId) -> GraphResult<&GraphEntry> {
        self.index_of(id).map(|index| &self.graphs[index])
    }

    fn entry_mut(&mut self, id: GraphId) -> GraphResult<&mut GraphEntry> {
        let index = self.index_of(id)?;
        Ok(&mut self.graphs[index])
    }
}

impl<P: ResourceProvider> Drop for Session<P> {
    fn drop(&mut self) {
        for entry in &mut self.graphs {
            if let Some(compiled) = entry.cache.take() {
                self.allocator.recycle(compiled.into_plan());
            }
        }
        let released = self.allocator.trim(&mut self.provider);
        log::debug!("Session dropped, released {} resource(s)", released);
    }
}

impl<P: ResourceProvider> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("graphs", &self.graphs.len())
            .field("active", &self.active)
            .field("frame_index", &self.frame_index)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Attach `graph` to `session` if there is one.
///
/// Returns the graph back when no session is attached, so callers can decide
/// what to do with it instead of relying on a global.
pub fn attach_graph<P: ResourceProvider>(
    session: Option<&mut Session<P>>,
    graph: RenderGraph,
) -> Result<GraphId, RenderGraph> {
    match session {
        Some(session) => Ok(session.add_graph(graph)),
        None => Err(graph),
    }
}
