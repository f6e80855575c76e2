//! Resource description types shared by every stage of the graph.

mod descriptor;
mod format;

pub use descriptor::{
    Extent3d, FormatSpec, IoSize, PortDesc, PortFlags, ResourceDesc, ResourceUsage,
};
pub use format::{ResourceFormat, UnknownFormat};
