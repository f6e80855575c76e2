//! Synthetic passes modeled on a minimal path tracing pipeline.
//!
//! None of them touch real memory; they validate their bindings, keep a bit
//! of per-frame state and log what they would have done.

use std::any::Any;

use passgraph::{
    ConfigError, ConfigRecord, ConfigSchema, Extent3d, FormatSpec, FrameContext, PassError,
    PassReflection, PassType, PortDesc, RenderData, RenderPass, ResolvedPorts, ResourceFormat,
    ResourceUsage,
};

/// External scene state handed to passes through [`FrameContext::scene`].
#[derive(Debug, Clone, PartialEq)]
pub struct DemoScene {
    pub name: String,
    pub light_count: u32,
}

// ============================================================================
// GBuffer
// ============================================================================

/// Outputs of [`GBuffer`], in declaration order.
pub const GBUFFER_CHANNELS: &[&str] = &[
    "posW",
    "normW",
    "tangentW",
    "faceNormalW",
    "viewW",
    "specRough",
    "emissive",
    "matlExtra",
    "diffuseOpacity",
];

/// Rasterizes scene geometry into per-pixel surface attributes.
#[derive(Debug)]
pub struct GBuffer {
    sample_pattern: String,
    depth: bool,
}

impl GBuffer {
    pub fn pass_type() -> PassType {
        PassType::new(
            "GBuffer",
            "Rasterizes surface attributes for later passes",
            ConfigSchema::new()
                .enumeration("samplePattern", "Center", &["Center", "DirectX", "Halton"])
                .bool("outputDepth", false),
            |config| {
                Ok(Box::new(GBuffer {
                    sample_pattern: config
                        .get_str("samplePattern")
                        .unwrap_or("Center")
                        .to_string(),
                    depth: config.get_bool("outputDepth").unwrap_or(false),
                }))
            },
        )
    }
}

impl RenderPass for GBuffer {
    fn reflect(&self) -> PassReflection {
        let mut reflection = PassReflection::new();
        for &channel in GBUFFER_CHANNELS {
            let port = match channel {
                "specRough" | "emissive" | "matlExtra" | "diffuseOpacity" => {
                    PortDesc::new(channel).format(ResourceFormat::Rgba16Float)
                }
                _ => PortDesc::new(channel).format_spec(FormatSpec::Default),
            };
            reflection = reflection.output(port.usage(ResourceUsage::RENDER_TARGET));
        }
        if self.depth {
            reflection = reflection.output(
                PortDesc::new("depth")
                    .with_description("Depth buffer")
                    .format(ResourceFormat::Depth32Float),
            );
        }
        reflection
    }

    fn execute(
        &mut self,
        frame: &FrameContext<'_>,
        data: &mut RenderData,
    ) -> Result<(), PassError> {
        for &channel in GBUFFER_CHANNELS {
            data.require_output(channel)?;
        }
        log::trace!(
            "{}: rasterized frame {} with {} sampling",
            data.pass_name(),
            frame.frame_index,
            self.sample_pattern
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// PathTracer
// ============================================================================

/// Inputs of [`PathTracer`] paired with the G-buffer channel feeding them.
pub const PATH_TRACER_INPUTS: &[(&str, &str)] = &[
    ("posW", "posW"),
    ("normalW", "normW"),
    ("tangentW", "tangentW"),
    ("faceNormalW", "faceNormalW"),
    ("viewW", "viewW"),
    ("mtlSpecRough", "specRough"),
    ("mtlEmissive", "emissive"),
    ("mtlParams", "matlExtra"),
    ("mtlDiffOpacity", "diffuseOpacity"),
];

/// Traces one path per sample from the G-buffer hit points.
#[derive(Debug)]
pub struct PathTracer {
    samples_per_pixel: i64,
    max_bounces: i64,
    extent: Option<Extent3d>,
    /// Samples traced since creation.
    pub samples_traced: u64,
}

impl PathTracer {
    pub fn pass_type() -> PassType {
        PassType::new(
            "PathTracer",
            "Minimal path tracer fed by a G-buffer",
            ConfigSchema::new()
                .int_range("samplesPerPixel", 1, 1, 64)
                .int_range("maxBounces", 3, 0, 16)
                .bool("computeDirect", true),
            |config| {
                Ok(Box::new(PathTracer {
                    samples_per_pixel: config.get_int("samplesPerPixel").unwrap_or(1),
                    max_bounces: config.get_int("maxBounces").unwrap_or(3),
                    extent: None,
                    samples_traced: 0,
                }))
            },
        )
    }

    pub fn samples_per_pixel(&self) -> i64 {
        self.samples_per_pixel
    }
}

impl RenderPass for PathTracer {
    fn reflect(&self) -> PassReflection {
        let mut reflection = PassReflection::new();
        for &(input, _) in PATH_TRACER_INPUTS {
            let port = PortDesc::new(input).usage(ResourceUsage::SHADER_READ);
            reflection = reflection.input(if input == "viewW" { port.optional() } else { port });
        }
        reflection.output(
            PortDesc::new("color")
                .with_description("Radiance estimate")
                .format(ResourceFormat::Rgba32Float)
                .usage(ResourceUsage::STORAGE),
        )
    }

    fn compile(&mut self, ports: &ResolvedPorts) -> Result<(), PassError> {
        self.extent = ports.output("color").map(|desc| desc.extent);
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &FrameContext<'_>,
        data: &mut RenderData,
    ) -> Result<(), PassError> {
        data.require_input("posW")?;
        let color = data.require_output("color")?;
        let extent = self
            .extent
            .ok_or_else(|| PassError::failed("path tracer executed before compilation"))?;

        let pixels = u64::from(extent.width) * u64::from(extent.height);
        self.samples_traced += pixels * self.samples_per_pixel as u64;
        let lights = frame.scene::<DemoScene>().map_or(0, |scene| scene.light_count);
        log::trace!(
            "{}: {} spp, {} bounces, {} light(s) into {}",
            data.pass_name(),
            self.samples_per_pixel,
            self.max_bounces,
            lights,
            color.handle
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Accumulate
// ============================================================================

/// Averages its input over frames into a persistent buffer.
#[derive(Debug)]
pub struct Accumulate {
    enabled: bool,
    max_frame_count: u64,
    extent: Option<Extent3d>,
    frame_count: u64,
}

impl Accumulate {
    pub fn pass_type() -> PassType {
        PassType::new(
            "Accumulate",
            "Temporal accumulation of its input",
            ConfigSchema::new()
                .bool("enabled", true)
                .int_range("maxFrameCount", 0, 0, i64::from(u32::MAX)),
            |config| {
                let max_frame_count = config.get_int("maxFrameCount").unwrap_or(0);
                Ok(Box::new(Accumulate {
                    enabled: config.get_bool("enabled").unwrap_or(true),
                    max_frame_count: u64::try_from(max_frame_count)
                        .map_err(|_| ConfigError::rejected("maxFrameCount must be positive"))?,
                    extent: None,
                    frame_count: 0,
                }))
            },
        )
    }

    /// Frames accumulated since the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Restart accumulation from the next frame.
    pub fn reset(&mut self) {
        self.frame_count = 0;
    }
}

impl RenderPass for Accumulate {
    fn reflect(&self) -> PassReflection {
        PassReflection::new()
            .input(PortDesc::new("input").usage(ResourceUsage::SHADER_READ))
            .output(
                PortDesc::new("output")
                    .with_description("Running average")
                    .format(ResourceFormat::Rgba32Float)
                    .usage(ResourceUsage::STORAGE)
                    .persistent(),
            )
    }

    fn compile(&mut self, ports: &ResolvedPorts) -> Result<(), PassError> {
        let extent = ports.output("output").map(|desc| desc.extent);
        if extent != self.extent {
            self.extent = extent;
            self.reset();
        }
        Ok(())
    }

    fn execute(
        &mut self,
        _frame: &FrameContext<'_>,
        data: &mut RenderData,
    ) -> Result<(), PassError> {
        let input = data.require_input("input")?;
        if !input.is_valid() {
            // An undefined sample invalidates the running average
            log::warn!("{}: input undefined, restarting", data.pass_name());
            self.reset();
            return Ok(());
        }
        if !self.enabled {
            return Ok(());
        }
        if self.max_frame_count == 0 || self.frame_count < self.max_frame_count {
            self.frame_count += 1;
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

// ============================================================================
// ToneMapper
// ============================================================================

/// Maps HDR radiance to display values.
#[derive(Debug)]
pub struct ToneMapper {
    operator: String,
    exposure: f64,
    output_format: ResourceFormat,
}

impl ToneMapper {
    pub fn pass_type() -> PassType {
        PassType::new(
            "ToneMapper",
            "Tone mapping with a selectable operator",
            ConfigSchema::new()
                .enumeration(
                    "operator",
                    "Aces",
                    &[
                        "Linear",
                        "Reinhard",
                        "ReinhardModified",
                        "HejiHableAlu",
                        "HableUc2",
                        "Aces",
                    ],
                )
                .bool("autoExposure", false)
                .bool("clamp", true)
                .float_range("exposureCompensation", 0.0, -12.0, 12.0)
                .format("outputFormat", ResourceFormat::Rgba8UnormSrgb),
            |config| {
                Ok(Box::new(ToneMapper {
                    operator: config.get_str("operator").unwrap_or("Aces").to_string(),
                    exposure: config.get_float("exposureCompensation").unwrap_or(0.0),
                    output_format: config
                        .get_format("outputFormat")
                        .unwrap_or(ResourceFormat::Rgba8UnormSrgb),
                }))
            },
        )
    }

    pub fn output_format(&self) -> ResourceFormat {
        self.output_format
    }
}

impl RenderPass for ToneMapper {
    fn reflect(&self) -> PassReflection {
        PassReflection::new()
            .input(PortDesc::new("src").usage(ResourceUsage::SHADER_READ))
            .output(
                PortDesc::new("dst")
                    .format(self.output_format)
                    .usage(ResourceUsage::RENDER_TARGET | ResourceUsage::COPY_SRC),
            )
    }

    fn execute(
        &mut self,
        _frame: &FrameContext<'_>,
        data: &mut RenderData,
    ) -> Result<(), PassError> {
        let src = data.require_input("src")?;
        let dst = data.require_output("dst")?;
        log::trace!(
            "{}: {} {} -> {} ({:+} EV)",
            data.pass_name(),
            self.operator,
            src.desc.format,
            dst.desc.format,
            self.exposure
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Configuration the MinimalPathTracer graph creates its tone mapper with.
pub fn linear_tone_mapping() -> ConfigRecord {
    ConfigRecord::new()
        .with("autoExposure", false)
        .with("operator", "Linear")
        .with("clamp", false)
        .with("outputFormat", ResourceFormat::Rgba32Float)
}
