//! Resource element formats.

use std::fmt;
use std::str::FromStr;

/// Element format of a graph resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum ResourceFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit red channel, unsigned integer.
    R8Uint,

    // 16-bit formats
    /// 16-bit red channel, float.
    R16Float,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,
    /// 32-bit RG channels, unsigned integer.
    Rg32Uint,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit RGBA channels, unsigned integer.
    Rgba32Uint,

    // Depth/stencil formats
    /// 32-bit depth, float.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
}

impl ResourceFormat {
    /// All formats, in declaration order.
    pub const ALL: &'static [ResourceFormat] = &[
        Self::R8Unorm,
        Self::R8Uint,
        Self::R16Float,
        Self::Rg8Unorm,
        Self::R32Float,
        Self::R32Uint,
        Self::Rg16Float,
        Self::Rgba8Unorm,
        Self::Rgba8UnormSrgb,
        Self::Bgra8Unorm,
        Self::Rgba16Float,
        Self::Rg32Float,
        Self::Rg32Uint,
        Self::Rgba32Float,
        Self::Rgba32Uint,
        Self::Depth32Float,
        Self::Depth24PlusStencil8,
    ];

    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    /// Returns the size in bytes per element.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm | Self::R8Uint => 1,
            Self::R16Float | Self::Rg8Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Rg32Uint => 8,
            Self::Rgba32Float | Self::Rgba32Uint => 16,
        }
    }

    /// Canonical name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::R8Unorm => "R8Unorm",
            Self::R8Uint => "R8Uint",
            Self::R16Float => "R16Float",
            Self::Rg8Unorm => "RG8Unorm",
            Self::R32Float => "R32Float",
            Self::R32Uint => "R32Uint",
            Self::Rg16Float => "RG16Float",
            Self::Rgba8Unorm => "RGBA8Unorm",
            Self::Rgba8UnormSrgb => "RGBA8UnormSrgb",
            Self::Bgra8Unorm => "BGRA8Unorm",
            Self::Rgba16Float => "RGBA16Float",
            Self::Rg32Float => "RG32Float",
            Self::Rg32Uint => "RG32Uint",
            Self::Rgba32Float => "RGBA32Float",
            Self::Rgba32Uint => "RGBA32Uint",
            Self::Depth32Float => "D32Float",
            Self::Depth24PlusStencil8 => "D24UnormS8",
        }
    }
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown format name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource format '{0}'")]
pub struct UnknownFormat(pub String);

impl FromStr for ResourceFormat {
    type Err = UnknownFormat;

    /// Parse a format name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}
