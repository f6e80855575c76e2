//! Render the MinimalPathTracer graph from the command line.
//!
//! ```bash
//! # Ten frames at 1280x720
//! graph_demo --frames 10 --width 1280 --height 720
//!
//! # Sweep the sample count, four frames per setting
//! RUST_LOG=info graph_demo --frames 4 --sweep 1,2,4,8
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use passgraph::{
    ConfigRecord, DummyProvider, ExecutionMode, Extent3d, FrameOutputs, GraphResult, Session,
    SessionConfig,
};
use passgraph_demos::{DemoScene, PathTracer, demo_registry, minimal_path_tracer};

/// passgraph demo driver.
#[derive(Parser, Debug)]
#[command(
    name = "graph_demo",
    about = "Render the MinimalPathTracer graph with synthetic passes",
    version
)]
struct Args {
    /// Frames to render per sample count.
    #[arg(long, default_value = "8")]
    frames: usize,

    /// Frame width in pixels.
    #[arg(long, default_value = "1920")]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value = "1080")]
    height: u32,

    /// Keep rendering when a pass fails, marking its outputs undefined.
    #[arg(long)]
    lenient: bool,

    /// Run independent parts of the graph on separate threads.
    #[arg(long)]
    parallel: bool,

    /// Samples per pixel to render with, one batch of frames each.
    #[arg(long, value_delimiter = ',')]
    sweep: Vec<i64>,

    /// Fixed time step in seconds instead of wall-clock time.
    #[arg(long)]
    time_step: Option<f64>,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_extent: Extent3d::new_2d(self.width.max(1), self.height.max(1)),
            mode: if self.lenient {
                ExecutionMode::Lenient
            } else {
                ExecutionMode::FailFast
            },
            parallel_dispatch: self.parallel,
            time_step: self.time_step,
            ..Default::default()
        }
    }
}

fn log_frame(outputs: &FrameOutputs) {
    for (port, bound) in outputs.iter() {
        log::info!(
            "frame {}: {} = {} {:?}",
            outputs.frame_index(),
            port,
            bound.desc,
            bound.state
        );
    }
    for failure in outputs.failed_passes() {
        log::warn!("frame {}: {}", outputs.frame_index(), failure);
    }
}

fn run(args: &Args) -> GraphResult<()> {
    passgraph::init();

    let registry = Arc::new(demo_registry()?);
    let provider = DummyProvider::new().with_concurrent_submission(args.parallel);
    let mut session = Session::new(registry.clone(), provider, args.session_config());
    let id = session.add_graph(minimal_path_tracer(&registry)?);
    let scene = DemoScene {
        name: "demo".to_string(),
        light_count: 2,
    };

    let sweep = if args.sweep.is_empty() {
        vec![None]
    } else {
        args.sweep.iter().copied().map(Some).collect()
    };
    for spp in sweep {
        if let Some(spp) = spp {
            let update = ConfigRecord::new().with("samplesPerPixel", spp);
            let warnings = session
                .graph_mut(id)?
                .update_pass_config("MinimalPathTracer", &update)?;
            for warning in warnings {
                log::warn!("{}", warning);
            }
        }

        for _ in 0..args.frames {
            let outputs = session.render_frame_with_scene(Some(&scene))?;
            log_frame(&outputs);
        }

        let graph = session.graph(id)?;
        if let Some(tracer) = graph.pass_as::<PathTracer>("MinimalPathTracer") {
            log::info!(
                "{} spp: {} samples traced over {} frame(s)",
                tracer.samples_per_pixel(),
                tracer.samples_traced,
                args.frames
            );
        }
    }

    log::info!(
        "Rendered {} frame(s), {} compilation(s), {} live resource(s), {} pooled",
        session.frame_index(),
        session.compile_count(id)?,
        session.provider().live_count(),
        session.pool_size()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{} ({:?} error)", err, err.kind());
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                log::error!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
