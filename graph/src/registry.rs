//! Pass type registry.
//!
//! The registry maps a type name to a [`PassType`]: a schema plus a factory
//! building a pass from a validated configuration record. It is filled once at
//! startup and only read afterwards, so sessions share it behind an [`Arc`].
//!
//! ```
//! use passgraph::config::ConfigSchema;
//! use passgraph::registry::{PassRegistry, PassType};
//! # use passgraph::pass::{FrameContext, PassError, PassReflection, RenderData, RenderPass};
//! # struct Blit;
//! # impl RenderPass for Blit {
//! #     fn reflect(&self) -> PassReflection { PassReflection::new() }
//! #     fn execute(&mut self, _: &FrameContext<'_>, _: &mut RenderData) -> Result<(), PassError> { Ok(()) }
//! #     fn as_any(&self) -> &dyn std::any::Any { self }
//! #     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
//! # }
//!
//! let mut registry = PassRegistry::new();
//! registry
//!     .register(PassType::new("Blit", "Copies a texture", ConfigSchema::new(), |_| {
//!         Ok(Box::new(Blit))
//!     }))
//!     .unwrap();
//!
//! assert!(registry.contains("Blit"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, ConfigRecord, ConfigSchema};
use crate::error::{GraphError, GraphResult};
use crate::pass::RenderPass;

type PassFactory =
    dyn Fn(&ConfigRecord) -> Result<Box<dyn RenderPass>, ConfigError> + Send + Sync;

/// A registered kind of pass.
pub struct PassType {
    name: String,
    description: String,
    schema: ConfigSchema,
    factory: Box<PassFactory>,
}

impl PassType {
    /// Create a pass type. `factory` receives a record already validated
    /// against `schema`, with defaults filled in.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ConfigSchema,
        factory: F,
    ) -> Self
    where
        F: Fn(&ConfigRecord) -> Result<Box<dyn RenderPass>, ConfigError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            factory: Box::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Validate `config` and build a pass from it.
    ///
    /// Returns the pass together with the validated record.
    pub fn instantiate(
        &self,
        config: &ConfigRecord,
    ) -> Result<(Box<dyn RenderPass>, ConfigRecord), ConfigError> {
        let validated = self.schema.validate(config)?;
        let pass = (self.factory)(&validated)?;
        Ok((pass, validated))
    }
}

impl fmt::Debug for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassType")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// A pass built by the registry, not yet added to a graph.
pub struct PassInstance {
    pub(crate) name: String,
    pub(crate) pass_type: Arc<PassType>,
    pub(crate) config: ConfigRecord,
    pub(crate) pass: Box<dyn RenderPass>,
}

impl PassInstance {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        self.pass_type.name()
    }

    /// The validated configuration the pass was created with.
    pub fn config(&self) -> &ConfigRecord {
        &self.config
    }

    pub fn pass(&self) -> &dyn RenderPass {
        self.pass.as_ref()
    }
}

impl fmt::Debug for PassInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassInstance")
            .field("name", &self.name)
            .field("type", &self.pass_type.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Table of registered pass types.
#[derive(Debug, Default)]
pub struct PassRegistry {
    types: BTreeMap<String, Arc<PassType>>,
}

impl PassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass type.
    ///
    /// Fails with [`GraphError::DuplicateType`] if the name is taken.
    pub fn register(&mut self, pass_type: PassType) -> GraphResult<()> {
        if self.types.contains_key(pass_type.name()) {
            return Err(GraphError::DuplicateType(pass_type.name().to_string()));
        }
        log::debug!("Registered pass type '{}'", pass_type.name());
        self.types
            .insert(pass_type.name().to_string(), Arc::new(pass_type));
        Ok(())
    }

    /// Create a pass named `name` of type `type_name`.
    ///
    /// Fails with [`GraphError::UnknownType`] for an unregistered type and
    /// [`GraphError::InvalidConfig`] if `config` does not validate.
    pub fn create(
        &self,
        type_name: &str,
        name: impl Into<String>,
        config: &ConfigRecord,
    ) -> GraphResult<PassInstance> {
        let name = name.into();
        let pass_type = self
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;

        let (pass, config) =
            pass_type
                .instantiate(config)
                .map_err(|source| GraphError::InvalidConfig {
                    pass: name.clone(),
                    type_name: type_name.to_string(),
                    source,
                })?;

        Ok(PassInstance {
            name,
            pass_type: Arc::clone(pass_type),
            config,
            pass,
        })
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<PassType>> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn description(&self, type_name: &str) -> Option<&str> {
        self.get(type_name).map(|t| t.description())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
