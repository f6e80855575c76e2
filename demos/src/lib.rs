//! # passgraph demos
//!
//! A small library of synthetic passes and the graphs built from them.
//!
//! ## Available Demos
//!
//! - `graph_demo` - Renders the MinimalPathTracer graph for a number of frames,
//!   optionally sweeping the path tracer's sample count

pub mod passes;

use passgraph::{ConfigRecord, GraphResult, PassRegistry, RenderGraph};

pub use passes::{Accumulate, DemoScene, GBuffer, PathTracer, ToneMapper};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register every demo pass type.
pub fn register_demo_passes(registry: &mut PassRegistry) -> GraphResult<()> {
    registry.register(GBuffer::pass_type())?;
    registry.register(PathTracer::pass_type())?;
    registry.register(Accumulate::pass_type())?;
    registry.register(ToneMapper::pass_type())?;
    Ok(())
}

/// A registry holding the demo pass types.
pub fn demo_registry() -> GraphResult<PassRegistry> {
    let mut registry = PassRegistry::new();
    register_demo_passes(&mut registry)?;
    Ok(registry)
}

/// G-buffer, path tracer, accumulation and linear tone mapping, with the
/// tone mapped image as the graph output.
pub fn minimal_path_tracer(registry: &PassRegistry) -> GraphResult<RenderGraph> {
    let mut graph = RenderGraph::new("MinimalPathTracer");
    let defaults = ConfigRecord::new();
    graph.add_instance(registry.create("PathTracer", "MinimalPathTracer", &defaults)?)?;
    graph.add_instance(registry.create("GBuffer", "GBufferRT", &defaults)?)?;
    graph.add_instance(registry.create("Accumulate", "AccumulatePass", &defaults)?)?;
    graph.add_instance(registry.create(
        "ToneMapper",
        "ToneMapper",
        &passes::linear_tone_mapping(),
    )?)?;

    for &(input, channel) in passes::PATH_TRACER_INPUTS {
        graph.add_edge("GBufferRT", channel, "MinimalPathTracer", input)?;
    }
    graph.add_edge_str("MinimalPathTracer.color", "AccumulatePass.input")?;
    graph.add_edge_str("AccumulatePass.output", "ToneMapper.src")?;
    graph.mark_output_str("ToneMapper.dst")?;
    Ok(graph)
}
