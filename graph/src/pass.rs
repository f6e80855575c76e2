//! The pass interface.
//!
//! A pass is an opaque unit of work. The graph only sees what it declares
//! through [`RenderPass::reflect`] and drives it through
//! [`RenderPass::execute`]; concrete passes are dispatched through the trait
//! object and recovered with [`RenderPass::as_any`] when a caller needs to call
//! type-specific methods.

use std::any::Any;

use crate::provider::ResourceHandle;
use crate::types::{PortDesc, ResourceDesc};

/// Ports declared by a pass for its current configuration.
///
/// Port order is significant: inputs are resolved in declaration order, and
/// the reflection is compared across configuration updates to detect removed
/// ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReflection {
    inputs: Vec<PortDesc>,
    outputs: Vec<PortDesc>,
}

impl PassReflection {
    /// Create an empty reflection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input port.
    pub fn input(mut self, port: PortDesc) -> Self {
        self.inputs.push(port);
        self
    }

    /// Declare an output port.
    pub fn output(mut self, port: PortDesc) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn inputs(&self) -> &[PortDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortDesc] {
        &self.outputs
    }

    pub fn find_input(&self, name: &str) -> Option<&PortDesc> {
        self.inputs.iter().find(|p| p.name() == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&PortDesc> {
        self.outputs.iter().find(|p| p.name() == name)
    }

    /// Check whether a port of either direction is named `name`.
    pub fn has_port(&self, name: &str) -> bool {
        self.find_input(name).is_some() || self.find_output(name).is_some()
    }

    /// Returns the first port name declared more than once, if any.
    pub(crate) fn duplicate_port(&self) -> Option<&str> {
        let mut names: Vec<&str> = self
            .inputs
            .iter()
            .chain(&self.outputs)
            .map(PortDesc::name)
            .collect();
        names.sort_unstable();
        names.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
    }
}

/// Resolved descriptors of one pass's ports, handed to [`RenderPass::compile`].
///
/// Ports that stayed unresolved (optional and unconnected) map to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPorts {
    pub(crate) inputs: Vec<(String, Option<ResourceDesc>)>,
    pub(crate) outputs: Vec<(String, Option<ResourceDesc>)>,
}

impl ResolvedPorts {
    pub fn input(&self, name: &str) -> Option<&ResourceDesc> {
        lookup(&self.inputs, name)
    }

    pub fn output(&self, name: &str) -> Option<&ResourceDesc> {
        lookup(&self.outputs, name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, Option<&ResourceDesc>)> {
        self.inputs.iter().map(|(n, d)| (n.as_str(), d.as_ref()))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, Option<&ResourceDesc>)> {
        self.outputs.iter().map(|(n, d)| (n.as_str(), d.as_ref()))
    }
}

fn lookup<'a, T>(entries: &'a [(String, Option<T>)], name: &str) -> Option<&'a T> {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| v.as_ref())
}

/// Per-frame information passed to every pass.
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    /// Index of the frame, starting at zero for the first rendered frame.
    pub frame_index: u64,
    /// Time in seconds at the start of the frame.
    pub time: f64,
    /// Time in seconds since the previous frame.
    pub delta_time: f64,
    /// External scene state, if the caller supplied any.
    pub scene: Option<&'a (dyn Any + Sync)>,
}

impl<'a> FrameContext<'a> {
    pub fn new(frame_index: u64, time: f64, delta_time: f64) -> Self {
        Self {
            frame_index,
            time,
            delta_time,
            scene: None,
        }
    }

    pub fn with_scene(mut self, scene: &'a (dyn Any + Sync)) -> Self {
        self.scene = Some(scene);
        self
    }

    /// Downcast the scene state to a concrete type.
    pub fn scene<T: Any>(&self) -> Option<&'a T> {
        self.scene
            .and_then(|scene| (scene as &'a dyn Any).downcast_ref::<T>())
    }
}

impl std::fmt::Debug for FrameContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("frame_index", &self.frame_index)
            .field("time", &self.time)
            .field("delta_time", &self.delta_time)
            .field("scene", &self.scene.is_some())
            .finish()
    }
}

/// Contents state of a bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Written by its producer this frame, or an unconnected input.
    #[default]
    Valid,
    /// The producer failed or was skipped this frame. Contents are undefined.
    Undefined,
}

/// A concrete resource bound to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundResource {
    pub handle: ResourceHandle,
    pub desc: ResourceDesc,
    pub state: ResourceState,
}

impl BoundResource {
    pub fn is_valid(&self) -> bool {
        self.state == ResourceState::Valid
    }
}

/// Resources bound to a pass for one execution.
#[derive(Debug, Clone, Default)]
pub struct RenderData {
    pass: String,
    inputs: Vec<(String, Option<BoundResource>)>,
    outputs: Vec<(String, Option<BoundResource>)>,
    recompile_requested: bool,
}

impl RenderData {
    pub(crate) fn new(
        pass: impl Into<String>,
        inputs: Vec<(String, Option<BoundResource>)>,
        outputs: Vec<(String, Option<BoundResource>)>,
    ) -> Self {
        Self {
            pass: pass.into(),
            inputs,
            outputs,
            recompile_requested: false,
        }
    }

    /// Name of the pass being executed.
    pub fn pass_name(&self) -> &str {
        &self.pass
    }

    /// Resource bound to an input port, or `None` if the port is unbound.
    pub fn input(&self, name: &str) -> Option<&BoundResource> {
        lookup(&self.inputs, name)
    }

    /// Resource bound to an output port, or `None` if the port is unbound.
    pub fn output(&self, name: &str) -> Option<&BoundResource> {
        lookup(&self.outputs, name)
    }

    /// Resource bound to an input port, failing with
    /// [`PassError::MissingBinding`] if it is unbound.
    pub fn require_input(&self, name: &str) -> Result<&BoundResource, PassError> {
        self.input(name)
            .ok_or_else(|| PassError::MissingBinding(name.to_string()))
    }

    /// Resource bound to an output port, failing with
    /// [`PassError::MissingBinding`] if it is unbound.
    pub fn require_output(&self, name: &str) -> Result<&BoundResource, PassError> {
        self.output(name)
            .ok_or_else(|| PassError::MissingBinding(name.to_string()))
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, Option<&BoundResource>)> {
        self.inputs.iter().map(|(n, r)| (n.as_str(), r.as_ref()))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, Option<&BoundResource>)> {
        self.outputs.iter().map(|(n, r)| (n.as_str(), r.as_ref()))
    }

    /// Ask for the graph to be recompiled before the next frame.
    ///
    /// Passes call this when a runtime change alters their declared ports.
    pub fn request_recompile(&mut self) {
        self.recompile_requested = true;
    }

    pub fn recompile_requested(&self) -> bool {
        self.recompile_requested
    }
}

/// Error returned by a pass hook.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("port '{0}' has no bound resource")]
    MissingBinding(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PassError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// A unit of work in a render graph.
///
/// Implementations are created by a [`PassType`](crate::registry::PassType)
/// factory from a validated configuration record. A configuration update
/// creates a fresh instance, so `reflect` only has to describe the
/// configuration the pass was created with.
pub trait RenderPass: Send + 'static {
    /// Declare input and output ports.
    fn reflect(&self) -> PassReflection;

    /// Called after each successful compilation with the resolved descriptors
    /// of this pass's ports.
    fn compile(&mut self, ports: &ResolvedPorts) -> Result<(), PassError> {
        let _ = ports;
        Ok(())
    }

    /// Record the pass's work for one frame.
    fn execute(&mut self, frame: &FrameContext<'_>, data: &mut RenderData)
        -> Result<(), PassError>;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceFormat, ResourceUsage};

    #[test]
    fn test_reflection_lookup() {
        let reflection = PassReflection::new()
            .input(PortDesc::new("src"))
            .output(PortDesc::new("dst").format(ResourceFormat::Rgba8Unorm));

        assert!(reflection.find_input("src").is_some());
        assert!(reflection.find_output("src").is_none());
        assert!(reflection.has_port("dst"));
        assert_eq!(reflection.duplicate_port(), None);
    }

    #[test]
    fn test_reflection_duplicate_port() {
        let reflection = PassReflection::new()
            .input(PortDesc::new("color"))
            .output(PortDesc::new("color"));
        assert_eq!(reflection.duplicate_port(), Some("color"));
    }

    #[test]
    fn test_render_data_bindings() {
        let bound = BoundResource {
            handle: ResourceHandle::new(3),
            desc: ResourceDesc::new_2d(
                ResourceFormat::Rgba8Unorm,
                4,
                4,
                ResourceUsage::SHADER_READ,
            ),
            state: ResourceState::Valid,
        };
        let mut data = RenderData::new(
            "blit",
            vec![("src".into(), Some(bound)), ("mask".into(), None)],
            vec![],
        );

        assert_eq!(data.pass_name(), "blit");
        assert_eq!(data.input("src"), Some(&bound));
        assert!(data.input("mask").is_none());
        assert!(matches!(
            data.require_input("mask"),
            Err(PassError::MissingBinding(ref port)) if port == "mask"
        ));

        assert!(!data.recompile_requested());
        data.request_recompile();
        assert!(data.recompile_requested());
    }

    #[test]
    fn test_frame_context_scene_downcast() {
        struct Scene {
            lights: u32,
        }
        let scene = Scene { lights: 2 };
        let frame = FrameContext::new(0, 0.0, 0.0).with_scene(&scene);
        assert_eq!(frame.scene::<Scene>().map(|s| s.lights), Some(2));
        assert!(frame.scene::<u32>().is_none());
    }
}
