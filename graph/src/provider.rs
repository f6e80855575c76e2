//! Backing resource providers.
//!
//! The graph never creates GPU memory itself. It asks a [`ResourceProvider`]
//! for a resource matching a [`ResourceDesc`] and hands it back when done.
//! [`DummyProvider`] implements the interface without any device, for tests
//! and headless runs.

use std::collections::HashMap;

use crate::types::ResourceDesc;

/// Opaque handle to a resource issued by a [`ResourceProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors reported by a resource provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("resource limit of {capacity} reached")]
    Exhausted { capacity: usize },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Source of backing resources.
pub trait ResourceProvider {
    /// Create a resource matching `desc`.
    fn allocate(&mut self, desc: &ResourceDesc) -> Result<ResourceHandle, ProviderError>;

    /// Destroy a resource previously returned by [`allocate`](Self::allocate).
    fn release(&mut self, handle: ResourceHandle);

    /// Whether independent passes may record work from several threads at once.
    fn supports_concurrent_submission(&self) -> bool {
        false
    }
}

/// A provider that hands out ids without backing memory.
///
/// It keeps counters for tests, and an optional capacity makes allocation fail
/// with [`ProviderError::Exhausted`] once that many resources are live.
#[derive(Debug, Default)]
pub struct DummyProvider {
    next_id: u64,
    live: HashMap<ResourceHandle, ResourceDesc>,
    total_allocations: usize,
    total_releases: usize,
    capacity: Option<usize>,
    concurrent: bool,
}

impl DummyProvider {
    /// Create an unbounded provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of simultaneously live resources.
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Report support for concurrent submission.
    pub fn with_concurrent_submission(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn set_capacity_limit(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    /// Number of resources currently allocated.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Total bytes of currently allocated resources.
    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(ResourceDesc::byte_size).sum()
    }

    /// Number of successful allocations since creation.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    /// Number of releases of live resources since creation.
    pub fn total_releases(&self) -> usize {
        self.total_releases
    }

    pub fn is_live(&self, handle: ResourceHandle) -> bool {
        self.live.contains_key(&handle)
    }

    /// Descriptor a live resource was allocated with.
    pub fn descriptor(&self, handle: ResourceHandle) -> Option<&ResourceDesc> {
        self.live.get(&handle)
    }
}

impl ResourceProvider for DummyProvider {
    fn allocate(&mut self, desc: &ResourceDesc) -> Result<ResourceHandle, ProviderError> {
        if let Some(capacity) = self.capacity {
            if self.live.len() >= capacity {
                return Err(ProviderError::Exhausted { capacity });
            }
        }

        self.next_id += 1;
        let handle = ResourceHandle(self.next_id);
        self.live.insert(handle, *desc);
        self.total_allocations += 1;
        log::trace!("DummyProvider: allocated {} ({})", handle, desc);
        Ok(handle)
    }

    fn release(&mut self, handle: ResourceHandle) {
        if self.live.remove(&handle).is_some() {
            self.total_releases += 1;
            log::trace!("DummyProvider: released {}", handle);
        } else {
            log::warn!("DummyProvider: release of unknown resource {}", handle);
        }
    }

    fn supports_concurrent_submission(&self) -> bool {
        self.concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceFormat, ResourceUsage};

    fn desc() -> ResourceDesc {
        ResourceDesc::new_2d(ResourceFormat::Rgba8Unorm, 16, 16, ResourceUsage::RENDER_TARGET)
    }

    #[test]
    fn test_allocate_and_release() {
        let mut provider = DummyProvider::new();
        let a = provider.allocate(&desc()).unwrap();
        let b = provider.allocate(&desc()).unwrap();
        assert_ne!(a, b);
        assert_eq!(provider.live_count(), 2);
        assert_eq!(provider.live_bytes(), 2 * 16 * 16 * 4);

        provider.release(a);
        assert!(!provider.is_live(a));
        assert!(provider.is_live(b));
        assert_eq!(provider.total_allocations(), 2);
        assert_eq!(provider.total_releases(), 1);
    }

    #[test]
    fn test_double_release_is_ignored() {
        let mut provider = DummyProvider::new();
        let a = provider.allocate(&desc()).unwrap();
        provider.release(a);
        provider.release(a);
        assert_eq!(provider.total_releases(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let mut provider = DummyProvider::new().with_capacity_limit(1);
        let a = provider.allocate(&desc()).unwrap();
        assert_eq!(
            provider.allocate(&desc()),
            Err(ProviderError::Exhausted { capacity: 1 })
        );

        provider.release(a);
        assert!(provider.allocate(&desc()).is_ok());
    }

    #[test]
    fn test_concurrent_flag() {
        assert!(!DummyProvider::new().supports_concurrent_submission());
        assert!(DummyProvider::new()
            .with_concurrent_submission(true)
            .supports_concurrent_submission());
    }
}
