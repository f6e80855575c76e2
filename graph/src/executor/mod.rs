//! Frame execution.
//!
//! The [`Executor`] walks a [`CompiledGraph`] in execution order, binds each
//! pass's resources and calls [`RenderPass::execute`](crate::pass::RenderPass::execute).
//!
//! # Failure policy
//!
//! | Mode | On pass failure |
//! |------|-----------------|
//! | [`ExecutionMode::FailFast`] | The frame stops and [`GraphError::PassExecutionFailed`] is returned |
//! | [`ExecutionMode::Lenient`] | The failure is logged, the pass's outputs become [`ResourceState::Undefined`], and dependents still run |
//!
//! Undefined contents propagate: a pass that reads an undefined input
//! produces undefined outputs.
//!
//! # Concurrency
//!
//! Passes with a data dependency always run in order. When parallel dispatch
//! is enabled and the graph was compiled with
//! [`CompileOptions::isolate_components`](crate::compiler::CompileOptions),
//! each weakly connected component runs on its own scoped thread. In
//! fail-fast mode a failure in one component stops the others before their
//! next pass; a pass already running is never interrupted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use passgraph_core::{profile_scope, set_thread_name};

use crate::cache::CompiledGraph;
use crate::compiler::ResolvedPass;
use crate::error::{GraphError, GraphResult};
use crate::graph::{PassNode, PortRef, RenderGraph};
use crate::pass::{BoundResource, FrameContext, RenderData, ResourceState};

/// What to do when a pass fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// Abort the frame on the first failure.
    #[default]
    FailFast,
    /// Skip the failed pass and mark its outputs undefined.
    Lenient,
}

/// A pass failure recorded in lenient mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassFailure {
    pub pass: String,
    pub message: String,
}

impl fmt::Display for PassFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass '{}' failed: {}", self.pass, self.message)
    }
}

/// Result of one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOutputs {
    frame_index: u64,
    outputs: Vec<(PortRef, BoundResource)>,
    failed: Vec<PassFailure>,
    executed: Vec<String>,
    recompile_requested: bool,
}

impl FrameOutputs {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Resource of a marked output.
    pub fn get(&self, port: &PortRef) -> Option<&BoundResource> {
        self.outputs
            .iter()
            .find_map(|(p, resource)| (p == port).then_some(resource))
    }

    /// Resource of a marked output given as `"pass.port"`.
    pub fn get_str(&self, port: &str) -> Option<&BoundResource> {
        let port: PortRef = port.parse().ok()?;
        self.get(&port)
    }

    /// Marked outputs in marking order.
    pub fn iter(&self) -> impl Iterator<Item = (&PortRef, &BoundResource)> {
        self.outputs.iter().map(|(p, r)| (p, r))
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Passes that failed this frame (lenient mode only).
    pub fn failed_passes(&self) -> &[PassFailure] {
        &self.failed
    }

    /// Passes that ran successfully, in execution order per component.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Whether a pass asked for the graph to be recompiled.
    pub fn recompile_requested(&self) -> bool {
        self.recompile_requested
    }
}

/// Drives compiled graphs, one frame per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    mode: ExecutionMode,
    parallel: bool,
}

impl Executor {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            parallel: false,
        }
    }

    /// Allow independent components to run concurrently.
    ///
    /// Only enable this when the resource provider supports concurrent
    /// submission.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Execute one frame of `graph`.
    ///
    /// Fails with [`GraphError::StaleCompilation`] if `compiled` does not
    /// match the graph's current revision.
    pub fn execute(
        &self,
        graph: &mut RenderGraph,
        compiled: &CompiledGraph,
        frame: &FrameContext<'_>,
    ) -> GraphResult<FrameOutputs> {
        self.execute_until(graph, compiled, frame, &AtomicBool::new(false))
    }

    /// Execute one frame, stopping every component once `abort` is raised.
    fn execute_until(
        &self,
        graph: &mut RenderGraph,
        compiled: &CompiledGraph,
        frame: &FrameContext<'_>,
        abort: &AtomicBool,
    ) -> GraphResult<FrameOutputs> {
        profile_scope!("execute_graph");

        if !compiled.is_current(graph, compiled.options()) {
            return Err(GraphError::StaleCompilation {
                graph: graph.name().to_string(),
            });
        }

        let resolved = compiled.resolved_graph();
        let parallel = self.parallel
            && compiled.options().isolate_components
            && resolved.component_count() > 1;

        let group_count = if parallel {
            resolved.component_count()
        } else {
            1
        };
        let mut nodes: Vec<Option<&mut PassNode>> =
            graph.nodes_mut().iter_mut().map(Some).collect();
        let mut groups: Vec<Vec<(&ResolvedPass, &mut PassNode)>> =
            (0..group_count).map(|_| Vec::new()).collect();
        for pass in resolved.passes() {
            let node = nodes
                .get_mut(pass.graph_index)
                .and_then(Option::take)
                .ok_or_else(|| GraphError::UnknownPass(pass.name.clone()))?;
            let group = if parallel { pass.component } else { 0 };
            groups[group].push((pass, node));
        }

        let mode = self.mode;
        let runs: Vec<Run> = if parallel {
            log::trace!("Dispatching {} components concurrently", group_count);
            std::thread::scope(|scope| {
                let handles: Vec<_> = groups
                    .into_iter()
                    .map(|group| {
                        scope.spawn(move || {
                            set_thread_name!("passgraph component");
                            Run::new(compiled, mode, abort).run(group, frame)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                    })
                    .collect()
            })
        } else {
            groups
                .into_iter()
                .map(|group| Run::new(compiled, mode, abort).run(group, frame))
                .collect()
        };

        let mut result = FrameOutputs {
            frame_index: frame.frame_index,
            ..Default::default()
        };
        let mut states = HashMap::new();
        let mut error = None;
        for run in runs {
            states.extend(run.states);
            result.failed.extend(run.failed);
            result.executed.extend(run.executed);
            result.recompile_requested |= run.recompile_requested;
            if error.is_none() {
                error = run.error;
            }
        }
        if let Some(error) = error {
            return Err(error);
        }

        let plan = compiled.plan();
        for output in compiled.outputs() {
            if let Some(index) = plan.resource_index(output) {
                let slot = plan.slot_of(index);
                result.outputs.push((
                    output.clone(),
                    BoundResource {
                        handle: slot.handle,
                        desc: slot.desc,
                        state: states.get(&index).copied().unwrap_or_default(),
                    },
                ));
            }
        }
        Ok(result)
    }
}

/// Execution state of one group of passes.
struct Run<'a> {
    compiled: &'a CompiledGraph,
    mode: ExecutionMode,
    /// Raised by the first run that fails; shared by all components.
    abort: &'a AtomicBool,
    /// Contents state per virtual resource. Missing entries are valid.
    states: HashMap<usize, ResourceState>,
    failed: Vec<PassFailure>,
    executed: Vec<String>,
    recompile_requested: bool,
    error: Option<GraphError>,
}

impl<'a> Run<'a> {
    fn new(compiled: &'a CompiledGraph, mode: ExecutionMode, abort: &'a AtomicBool) -> Self {
        Self {
            compiled,
            mode,
            abort,
            states: HashMap::new(),
            failed: Vec::new(),
            executed: Vec::new(),
            recompile_requested: false,
            error: None,
        }
    }

    fn run(mut self, group: Vec<(&ResolvedPass, &mut PassNode)>, frame: &FrameContext<'_>) -> Self {
        for (pass, node) in group {
            if self.abort.load(Ordering::Acquire) {
                log::debug!("Skipping '{}' and the rest of its component", pass.name);
                break;
            }
            if let Err(error) = self.run_pass(pass, node, frame) {
                self.abort.store(true, Ordering::Release);
                self.error = Some(error);
                break;
            }
        }
        self
    }

    fn bind(&self, pass: &str, port: &str) -> Option<(usize, BoundResource)> {
        let plan = self.compiled.plan();
        let index = plan.resource_index(&PortRef::new(pass, port))?;
        let slot = plan.slot_of(index);
        Some((
            index,
            BoundResource {
                handle: slot.handle,
                desc: slot.desc,
                state: self.states.get(&index).copied().unwrap_or_default(),
            },
        ))
    }

    fn run_pass(
        &mut self,
        pass: &ResolvedPass,
        node: &mut PassNode,
        frame: &FrameContext<'_>,
    ) -> GraphResult<()> {
        profile_scope!("execute_pass");
        log::trace!("Executing pass '{}'", pass.name);

        let mut tainted = false;
        let mut inputs = Vec::with_capacity(pass.inputs.len());
        for input in &pass.inputs {
            let bound = self.bind(&pass.name, &input.port).map(|(_, bound)| bound);
            tainted |= bound.is_some_and(|b| !b.is_valid());
            inputs.push((input.port.clone(), bound));
        }

        let mut produced = Vec::with_capacity(pass.outputs.len());
        let mut outputs = Vec::with_capacity(pass.outputs.len());
        for output in &pass.outputs {
            let bound = self.bind(&pass.name, &output.port).map(|(index, bound)| {
                produced.push(index);
                BoundResource {
                    state: ResourceState::Valid,
                    ..bound
                }
            });
            outputs.push((output.port.clone(), bound));
        }

        let mut data = RenderData::new(pass.name.as_str(), inputs, outputs);
        let result = node.pass.execute(frame, &mut data);
        self.recompile_requested |= data.recompile_requested();

        let state = match result {
            Ok(()) => {
                self.executed.push(pass.name.clone());
                if tainted {
                    log::warn!("Pass '{}' read undefined input", pass.name);
                    ResourceState::Undefined
                } else {
                    ResourceState::Valid
                }
            }
            Err(source) => match self.mode {
                ExecutionMode::FailFast => {
                    return Err(GraphError::PassExecutionFailed {
                        pass: pass.name.clone(),
                        source,
                    });
                }
                ExecutionMode::Lenient => {
                    log::warn!("Pass '{}' failed, skipping: {}", pass.name, source);
                    self.failed.push(PassFailure {
                        pass: pass.name.clone(),
                        message: source.to_string(),
                    });
                    ResourceState::Undefined
                }
            },
        };

        for index in produced {
            self.states.insert(index, state);
        }
        Ok(())
    }
}
