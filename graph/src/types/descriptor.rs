//! Port and resource descriptors.
//!
//! A pass declares each port with a [`PortDesc`], which may leave fields to be
//! inferred ([`FormatSpec::Inherit`], [`IoSize::Inherit`]). Compilation turns
//! every port it can resolve into a fully specified [`ResourceDesc`].

use bitflags::bitflags;

use super::ResourceFormat;

/// Extent of a resource in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    /// Create a 2D extent.
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Scale width and height by `numerator / denominator`, rounding down and
    /// clamping to at least one element.
    pub fn scaled(self, numerator: u32, denominator: u32) -> Self {
        let scale = |v: u32| {
            let scaled = (u64::from(v) * u64::from(numerator)) / u64::from(denominator.max(1));
            scaled.clamp(1, u64::from(u32::MAX)) as u32
        };
        Self {
            width: scale(self.width),
            height: scale(self.height),
            depth: self.depth,
        }
    }
}

impl std::fmt::Display for Extent3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.depth == 1 {
            write!(f, "{}x{}", self.width, self.height)
        } else {
            write!(f, "{}x{}x{}", self.width, self.height, self.depth)
        }
    }
}

bitflags! {
    /// How a port uses its resource.
    ///
    /// The usage of a backing resource is the union of the usages declared by
    /// its producer and every consumer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        /// Sampled or read in a shader.
        const SHADER_READ = 1 << 0;
        /// Written as a color render target.
        const RENDER_TARGET = 1 << 1;
        /// Read/write storage access.
        const STORAGE = 1 << 2;
        /// Depth/stencil attachment.
        const DEPTH_STENCIL = 1 << 3;
        /// Source of a copy.
        const COPY_SRC = 1 << 4;
        /// Destination of a copy.
        const COPY_DST = 1 << 5;
    }
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Per-port behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortFlags: u32 {
        /// The port may stay unconnected and unresolved.
        const OPTIONAL = 1 << 0;
        /// The backing resource keeps its contents across frames and is never
        /// shared with another port.
        const PERSISTENT = 1 << 1;
    }
}

impl Default for PortFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Requested extent of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IoSize {
    /// The compile-time default extent (usually the frame size).
    Default,
    /// A fixed extent.
    Fixed(Extent3d),
    /// The default extent scaled by `numerator / denominator`.
    Scaled { numerator: u32, denominator: u32 },
    /// Inputs take the extent of their producer. Outputs and unconnected
    /// inputs fall back to [`IoSize::Default`].
    #[default]
    Inherit,
}

impl IoSize {
    /// Half the default extent.
    pub const HALF: IoSize = IoSize::Scaled {
        numerator: 1,
        denominator: 2,
    };

    /// Twice the default extent.
    pub const DOUBLE: IoSize = IoSize::Scaled {
        numerator: 2,
        denominator: 1,
    };

    /// Resolve against the default extent. Returns `None` for [`IoSize::Inherit`].
    pub fn resolve(&self, default: Extent3d) -> Option<Extent3d> {
        match *self {
            IoSize::Default => Some(default),
            IoSize::Fixed(extent) => Some(extent),
            IoSize::Scaled {
                numerator,
                denominator,
            } => Some(default.scaled(numerator, denominator)),
            IoSize::Inherit => None,
        }
    }
}

/// Requested format of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatSpec {
    /// Inputs take their producer's format; outputs take the format required
    /// by their consumers. Unresolved when nothing supplies one.
    #[default]
    Inherit,
    /// The compile-time default format.
    Default,
    /// An exact format.
    Exact(ResourceFormat),
}

/// Declaration of a single pass port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    name: String,
    description: String,
    format: FormatSpec,
    size: IoSize,
    usage: ResourceUsage,
    flags: PortFlags,
}

impl PortDesc {
    /// Create a port that inherits both format and size.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            format: FormatSpec::Inherit,
            size: IoSize::Inherit,
            usage: ResourceUsage::empty(),
            flags: PortFlags::empty(),
        }
    }

    /// Set a human readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Require an exact format.
    pub fn format(mut self, format: ResourceFormat) -> Self {
        self.format = FormatSpec::Exact(format);
        self
    }

    /// Set the format specification.
    pub fn format_spec(mut self, format: FormatSpec) -> Self {
        self.format = format;
        self
    }

    /// Set the requested size.
    pub fn size(mut self, size: IoSize) -> Self {
        self.size = size;
        self
    }

    /// Request a fixed 2D extent.
    pub fn texture_2d(self, width: u32, height: u32) -> Self {
        self.size(IoSize::Fixed(Extent3d::new_2d(width, height)))
    }

    /// Add usage flags.
    pub fn usage(mut self, usage: ResourceUsage) -> Self {
        self.usage |= usage;
        self
    }

    /// Mark the port optional.
    pub fn optional(mut self) -> Self {
        self.flags |= PortFlags::OPTIONAL;
        self
    }

    /// Mark the port persistent across frames.
    pub fn persistent(mut self) -> Self {
        self.flags |= PortFlags::PERSISTENT;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn format_request(&self) -> FormatSpec {
        self.format
    }

    pub fn size_request(&self) -> IoSize {
        self.size
    }

    pub fn usage_flags(&self) -> ResourceUsage {
        self.usage
    }

    pub fn flags(&self) -> PortFlags {
        self.flags
    }

    pub fn is_optional(&self) -> bool {
        self.flags.contains(PortFlags::OPTIONAL)
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.contains(PortFlags::PERSISTENT)
    }

    /// Resolve the format request, using `default` for [`FormatSpec::Default`].
    pub fn explicit_format(&self, default: ResourceFormat) -> Option<ResourceFormat> {
        match self.format {
            FormatSpec::Inherit => None,
            FormatSpec::Default => Some(default),
            FormatSpec::Exact(format) => Some(format),
        }
    }
}

/// Fully resolved descriptor of a backing resource.
///
/// Pool reuse matches descriptors by exact equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub format: ResourceFormat,
    pub extent: Extent3d,
    pub usage: ResourceUsage,
}

impl ResourceDesc {
    /// Create a 2D descriptor.
    pub fn new_2d(format: ResourceFormat, width: u32, height: u32, usage: ResourceUsage) -> Self {
        Self {
            format,
            extent: Extent3d::new_2d(width, height),
            usage,
        }
    }

    /// Size of the resource in bytes.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.extent.width)
            * u64::from(self.extent.height)
            * u64::from(self.extent.depth)
            * u64::from(self.format.block_size())
    }

    /// Check whether a resource with this descriptor satisfies `port`.
    ///
    /// Inherited fields accept anything; explicit fields must match exactly.
    /// Usage is not compared since the resolved usage is a union.
    pub fn satisfies(&self, port: &PortDesc, defaults: (ResourceFormat, Extent3d)) -> bool {
        let format_ok = port
            .explicit_format(defaults.0)
            .map_or(true, |format| format == self.format);
        let size_ok = port
            .size_request()
            .resolve(defaults.1)
            .map_or(true, |extent| extent == self.extent);
        format_ok && size_ok
    }
}

impl std::fmt::Display for ResourceDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.format, self.extent)
    }
}
