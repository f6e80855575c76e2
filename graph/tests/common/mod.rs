//! Common utilities for graph integration tests.
//!
//! The `Mock` pass type declares its ports from configuration strings, so a
//! test can build any graph shape through the public registry API. Every
//! executed pass appends its name, and any `String` scene it was given, to a
//! shared [`EventLog`].

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use passgraph::{
    ConfigError, ConfigRecord, ConfigSchema, DummyProvider, FrameContext, IoSize, PassError,
    PassReflection, PassRegistry, PassType, PortDesc, ProviderError, RenderData, RenderGraph,
    RenderPass, ResolvedPorts, ResourceDesc, ResourceFormat, ResourceHandle, ResourceProvider,
    Session, SessionConfig,
};

/// Install a test logger once per binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Event log
// ============================================================================

/// Events shared between mock passes, the provider and the test body.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Events with the given prefix, with the prefix stripped.
    pub fn filtered(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|event| event.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

// ============================================================================
// Mock pass
// ============================================================================

/// Port lists use `name` or `name:FORMAT`, comma separated. Sizes use
/// `name=half` or `name=WxH`.
pub struct MockPass {
    inputs: Vec<PortDesc>,
    outputs: Vec<PortDesc>,
    fail: bool,
    recompile_once: bool,
    pub compiled: Option<ResolvedPorts>,
    pub compilations: u64,
    pub executions: u64,
    log: EventLog,
}

impl MockPass {
    pub fn reset(&mut self) {
        self.executions = 0;
    }
}

impl RenderPass for MockPass {
    fn reflect(&self) -> PassReflection {
        let reflection = self
            .inputs
            .iter()
            .cloned()
            .fold(PassReflection::new(), PassReflection::input);
        self.outputs
            .iter()
            .cloned()
            .fold(reflection, PassReflection::output)
    }

    fn compile(&mut self, ports: &ResolvedPorts) -> Result<(), PassError> {
        self.compiled = Some(ports.clone());
        self.compilations += 1;
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &FrameContext<'_>,
        data: &mut RenderData,
    ) -> Result<(), PassError> {
        self.executions += 1;
        self.log.push(format!("exec:{}", data.pass_name()));
        if let Some(scene) = frame.scene::<String>() {
            self.log.push(format!("scene:{}:{}", data.pass_name(), scene));
        }
        if self.fail {
            return Err(PassError::failed(format!(
                "{} failed on frame {}",
                data.pass_name(),
                frame.frame_index
            )));
        }
        if self.recompile_once {
            self.recompile_once = false;
            data.request_recompile();
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

fn parse_ports(list: &str) -> Result<Vec<PortDesc>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.split(':');
            let name = parts.next().unwrap_or_default();
            let mut port = PortDesc::new(name);
            if let Some(format) = parts.next() {
                let format: ResourceFormat = format
                    .parse()
                    .map_err(|e| ConfigError::rejected(format!("{}", e)))?;
                port = port.format(format);
            }
            Ok(port)
        })
        .collect()
}

fn apply_list(
    ports: Vec<PortDesc>,
    list: &str,
    f: impl Fn(PortDesc) -> PortDesc,
) -> Vec<PortDesc> {
    let names: Vec<&str> = list.split(',').map(str::trim).collect();
    ports
        .into_iter()
        .map(|port| if names.contains(&port.name()) { f(port) } else { port })
        .collect()
}

fn apply_sizes(ports: Vec<PortDesc>, list: &str) -> Result<Vec<PortDesc>, ConfigError> {
    let mut ports = ports;
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, size) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::rejected(format!("bad size entry '{}'", entry)))?;
        let size = match size {
            "half" => IoSize::HALF,
            "double" => IoSize::DOUBLE,
            "default" => IoSize::Default,
            fixed => {
                let (w, h) = fixed
                    .split_once('x')
                    .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
                    .ok_or_else(|| ConfigError::rejected(format!("bad size '{}'", fixed)))?;
                IoSize::Fixed(passgraph::Extent3d::new_2d(w, h))
            }
        };
        ports = ports
            .into_iter()
            .map(|port| if port.name() == name { port.size(size) } else { port })
            .collect();
    }
    Ok(ports)
}

fn mock_schema() -> ConfigSchema {
    ConfigSchema::new()
        .string("inputs", "")
        .string("outputs", "")
        .string("optional", "")
        .string("persistent", "")
        .string("sizes", "")
        .bool("fail", false)
        .bool("recompileOnce", false)
}

/// Register the `Mock` pass type, logging into `log`.
pub fn register_mock(registry: &mut PassRegistry, log: &EventLog) {
    let log = log.clone();
    registry
        .register(PassType::new(
            "Mock",
            "Pass with configurable ports",
            mock_schema(),
            move |config| {
                let inputs = parse_ports(config.get_str("inputs").unwrap_or_default())?;
                let inputs = apply_list(
                    inputs,
                    config.get_str("optional").unwrap_or_default(),
                    PortDesc::optional,
                );
                let outputs = parse_ports(config.get_str("outputs").unwrap_or_default())?;
                let outputs = apply_list(
                    outputs,
                    config.get_str("persistent").unwrap_or_default(),
                    PortDesc::persistent,
                );
                let sizes = config.get_str("sizes").unwrap_or_default();
                Ok(Box::new(MockPass {
                    inputs: apply_sizes(inputs, sizes)?,
                    outputs: apply_sizes(outputs, sizes)?,
                    fail: config.get_bool("fail").unwrap_or(false),
                    recompile_once: config.get_bool("recompileOnce").unwrap_or(false),
                    compiled: None,
                    compilations: 0,
                    executions: 0,
                    log: log.clone(),
                }))
            },
        ))
        .unwrap();
}

/// A registry holding only the `Mock` pass type.
pub fn mock_registry(log: &EventLog) -> Arc<PassRegistry> {
    let mut registry = PassRegistry::new();
    register_mock(&mut registry, log);
    Arc::new(registry)
}

/// Add a mock pass with the given port lists.
pub fn add_mock(
    graph: &mut RenderGraph,
    registry: &PassRegistry,
    name: &str,
    inputs: &str,
    outputs: &str,
) {
    add_mock_with(graph, registry, name, inputs, outputs, ConfigRecord::new());
}

/// Add a mock pass with extra configuration.
pub fn add_mock_with(
    graph: &mut RenderGraph,
    registry: &PassRegistry,
    name: &str,
    inputs: &str,
    outputs: &str,
    extra: ConfigRecord,
) {
    let config = ConfigRecord::new()
        .with("inputs", inputs)
        .with("outputs", outputs)
        .merged(&extra);
    let instance = registry.create("Mock", name, &config).unwrap();
    graph.add_instance(instance).unwrap();
}

// ============================================================================
// Recording provider
// ============================================================================

/// A [`DummyProvider`] that records allocations and releases.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    inner: DummyProvider,
    log: EventLog,
}

impl RecordingProvider {
    pub fn new(log: &EventLog) -> Self {
        Self {
            inner: DummyProvider::new(),
            log: log.clone(),
        }
    }

    pub fn with_concurrent_submission(mut self) -> Self {
        self.inner = self.inner.with_concurrent_submission(true);
        self
    }

    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.inner = self.inner.with_capacity_limit(capacity);
        self
    }

    pub fn inner(&self) -> &DummyProvider {
        &self.inner
    }
}

impl ResourceProvider for RecordingProvider {
    fn allocate(&mut self, desc: &ResourceDesc) -> Result<ResourceHandle, ProviderError> {
        let handle = self.inner.allocate(desc)?;
        self.log.push(format!("alloc:{}", handle));
        Ok(handle)
    }

    fn release(&mut self, handle: ResourceHandle) {
        self.log.push(format!("release:{}", handle));
        self.inner.release(handle);
    }

    fn supports_concurrent_submission(&self) -> bool {
        self.inner.supports_concurrent_submission()
    }
}

/// A session over a recording provider with a fixed time step.
pub fn session(
    registry: Arc<PassRegistry>,
    provider: RecordingProvider,
) -> Session<RecordingProvider> {
    Session::new(
        registry,
        provider,
        SessionConfig {
            time_step: Some(1.0 / 60.0),
            ..Default::default()
        },
    )
}
