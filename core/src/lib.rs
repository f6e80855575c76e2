//! # passgraph core
//!
//! Engine-agnostic utilities shared by the passgraph crates:
//!
//! - [`pool`] - keyed free lists for recycling backing resources
//! - [`profiling`] - optional Tracy instrumentation macros

pub mod pool;
pub mod profiling;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the core library version.
pub fn init() {
    log::info!("passgraph core v{} initialized", VERSION);
}
