//! # passgraph
//!
//! Render graph engine. Passes declare typed input and output ports; a graph
//! connects them, and the engine orders the passes, resolves port formats and
//! sizes, aliases transient resources and runs each frame.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`PassRegistry`] - Named pass types with configuration schemas
//! - [`RenderGraph`] - Passes, edges and marked outputs
//! - [`compiler`] - Dependency resolution and descriptor propagation
//! - [`ResourceAllocator`] - Lifetime-based resource aliasing and pooling
//! - [`Executor`] - Frame execution with fail-fast or lenient error handling
//! - [`Session`] - Graphs, cached compilations and frame timing
//!
//! ## Example
//!
//! ```ignore
//! use passgraph::{ConfigRecord, DummyProvider, RenderGraph, Session, SessionConfig};
//!
//! let mut session = Session::new(registry, DummyProvider::new(), SessionConfig::default());
//! let mut graph = RenderGraph::new("main");
//! graph.add_instance(session.create_pass("GBuffer", "GBuffer", &ConfigRecord::new())?)?;
//! graph.add_instance(session.create_pass("ToneMapper", "ToneMapper", &ConfigRecord::new())?)?;
//! graph.add_edge("GBuffer", "albedo", "ToneMapper", "src")?;
//! graph.mark_output("ToneMapper", "dst")?;
//! session.add_graph(graph);
//!
//! let outputs = session.render_frame()?;
//! ```

pub mod allocator;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod pass;
pub mod provider;
pub mod registry;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use allocator::{Lifetime, ResourceAllocator, ResourcePlan, VirtualResource};
pub use cache::{CompilationCache, CompiledGraph};
pub use compiler::{CompileOptions, ResolvedGraph};
pub use config::{ConfigError, ConfigRecord, ConfigSchema, ConfigValue};
pub use error::{ErrorKind, GraphError, GraphResult, GraphWarning};
pub use executor::{ExecutionMode, Executor, FrameOutputs, PassFailure};
pub use graph::{Edge, PortRef, RenderGraph};
pub use pass::{
    BoundResource, FrameContext, PassError, PassReflection, RenderData, RenderPass,
    ResolvedPorts, ResourceState,
};
pub use provider::{DummyProvider, ProviderError, ResourceHandle, ResourceProvider};
pub use registry::{PassInstance, PassRegistry, PassType};
pub use session::{GraphId, Session, SessionConfig, attach_graph};
pub use types::{
    Extent3d, FormatSpec, IoSize, PortDesc, PortFlags, ResourceDesc, ResourceFormat,
    ResourceUsage,
};

static_assertions::assert_impl_all!(RenderGraph: Send);
static_assertions::assert_impl_all!(PassRegistry: Send, Sync);
static_assertions::assert_impl_all!(Session<DummyProvider>: Send);

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version.
pub fn init() {
    passgraph_core::init();
    log::info!("passgraph v{} initialized", VERSION);
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Passes with a fixed reflection, for building graphs without a registry.

    use std::any::Any;
    use std::sync::{Arc, OnceLock};

    use crate::config::{ConfigError, ConfigRecord, ConfigSchema};
    use crate::graph::RenderGraph;
    use crate::pass::{FrameContext, PassError, PassReflection, RenderData, RenderPass};
    use crate::registry::{PassInstance, PassType};
    use crate::types::PortDesc;

    #[derive(Debug, Clone)]
    pub struct Stub {
        reflection: PassReflection,
        fail: bool,
    }

    impl RenderPass for Stub {
        fn reflect(&self) -> PassReflection {
            self.reflection.clone()
        }

        fn execute(
            &mut self,
            _frame: &FrameContext<'_>,
            data: &mut RenderData,
        ) -> Result<(), PassError> {
            if self.fail {
                return Err(PassError::failed(format!("{} failed", data.pass_name())));
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    pub fn reflect(inputs: &[PortDesc], outputs: &[PortDesc]) -> Stub {
        let reflection = inputs
            .iter()
            .cloned()
            .fold(PassReflection::new(), PassReflection::input);
        let reflection = outputs.iter().cloned().fold(reflection, PassReflection::output);
        Stub {
            reflection,
            fail: false,
        }
    }

    pub fn failing(stub: Stub) -> Stub {
        Stub { fail: true, ..stub }
    }

    fn stub_type() -> Arc<PassType> {
        static STUB: OnceLock<Arc<PassType>> = OnceLock::new();
        STUB.get_or_init(|| {
            Arc::new(PassType::new("Stub", "Test pass", ConfigSchema::new(), |_| {
                Err(ConfigError::rejected("stub passes are built directly"))
            }))
        })
        .clone()
    }

    pub fn named_graph_with(
        name: &str,
        passes: &[(&str, Stub)],
        edges: &[(&str, &str)],
    ) -> RenderGraph {
        let mut graph = RenderGraph::new(name);
        for (pass, stub) in passes {
            let instance = PassInstance {
                name: pass.to_string(),
                pass_type: stub_type(),
                config: ConfigRecord::new(),
                pass: Box::new(stub.clone()),
            };
            graph.add_instance(instance).unwrap();
        }
        for (src, dst) in edges {
            graph.add_edge_str(src, dst).unwrap();
        }
        graph
    }

    pub fn graph_with(passes: &[(&str, Stub)], edges: &[(&str, &str)]) -> RenderGraph {
        named_graph_with("test", passes, edges)
    }
}
