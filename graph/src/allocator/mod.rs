//! Resource allocation.
//!
//! The allocator assigns a backing resource to every resolved port of a
//! [`ResolvedGraph`]. Each output, and each unconnected input with an explicit
//! descriptor, is a *virtual resource* with a [`Lifetime`] measured in
//! execution positions. Virtual resources whose lifetimes do not overlap and
//! whose descriptors are equal share a backing resource.
//!
//! Allocation is a single greedy walk in execution order:
//!
//! 1. Resources whose last consumer already ran go back to an in-plan free list.
//! 2. A new resource takes a slot from the free list if one with an equal
//!    descriptor is available, then from the cross-compilation pool, and only
//!    then asks the [`ResourceProvider`] for a new one.
//!
//! Marked outputs and persistent ports are *pinned*: they live until the end of
//! the frame and are never handed to another port. Persistent ports
//! additionally keep their resource across recompilations as long as the
//! pass instance, the port and the resolved descriptor stay the same. A pass
//! that is removed, or recreated by a configuration update, loses it.

use std::collections::HashMap;

use passgraph_core::pool::FreeList;
use passgraph_core::profile_function;

use crate::compiler::{CompileOptions, InputSource, ResolvedGraph};
use crate::error::{GraphError, GraphResult};
use crate::graph::PortRef;
use crate::provider::{ProviderError, ResourceHandle, ResourceProvider};
use crate::types::ResourceDesc;

/// Span of execution positions during which a resource holds live data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lifetime {
    /// Position of the producing pass.
    pub first_use: usize,
    /// Position of the last consuming pass.
    pub last_use: usize,
    /// Live until the end of the frame regardless of `last_use`.
    pub pinned: bool,
}

impl Lifetime {
    fn end(&self) -> usize {
        if self.pinned {
            usize::MAX
        } else {
            self.last_use
        }
    }

    /// Check whether two resources are live at the same time.
    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.first_use <= other.end() && other.first_use <= self.end()
    }
}

/// A port-owned logical resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualResource {
    /// The output (or unconnected input) that owns the resource.
    pub owner: PortRef,
    /// Instance id of the owning pass.
    pub instance: u64,
    pub desc: ResourceDesc,
    pub lifetime: Lifetime,
    /// Index of the backing slot in [`ResourcePlan::slots`].
    pub slot: usize,
    pub component: usize,
    pub persistent: bool,
}

/// A backing resource used by one or more virtual resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub handle: ResourceHandle,
    pub desc: ResourceDesc,
    pub persistent: bool,
}

/// Result of allocation: virtual resources, their backing slots and the
/// binding of every resolved port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePlan {
    resources: Vec<VirtualResource>,
    slots: Vec<Slot>,
    bindings: HashMap<PortRef, usize>,
}

impl ResourcePlan {
    /// Virtual resources in allocation order.
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Backing slots in creation order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Index of the virtual resource bound to a port.
    pub fn resource_index(&self, port: &PortRef) -> Option<usize> {
        self.bindings.get(port).copied()
    }

    /// Virtual resource bound to a port.
    pub fn binding(&self, port: &PortRef) -> Option<&VirtualResource> {
        self.resource_index(port).map(|i| &self.resources[i])
    }

    /// Backing resource bound to a port.
    pub fn handle(&self, port: &PortRef) -> Option<ResourceHandle> {
        self.binding(port).map(|vr| self.slots[vr.slot].handle)
    }

    pub(crate) fn slot_of(&self, resource: usize) -> &Slot {
        &self.slots[self.resources[resource].slot]
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Owns the pool of idle backing resources and builds [`ResourcePlan`]s.
#[derive(Debug, Default)]
pub struct ResourceAllocator {
    pool: FreeList<ResourceDesc, ResourceHandle>,
}

impl ResourceAllocator {
    /// Create an allocator with an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of idle resources in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Build a plan for `resolved`, retiring `previous`.
    ///
    /// Non-persistent resources of `previous` return to the pool before the
    /// walk so the new plan can pick them up. Persistent resources whose port
    /// vanished or changed descriptor are released to the provider.
    ///
    /// Fails with [`GraphError::AllocationFailed`] when the provider cannot
    /// create a resource. Everything acquired up to that point is returned to
    /// the pool.
    pub fn allocate<P: ResourceProvider + ?Sized>(
        &mut self,
        resolved: &ResolvedGraph,
        previous: Option<ResourcePlan>,
        provider: &mut P,
        options: &CompileOptions,
    ) -> GraphResult<ResourcePlan> {
        profile_function!();

        let mut kept = HashMap::new();
        if let Some(previous) = previous {
            for resource in &previous.resources {
                let slot = previous.slots[resource.slot];
                if slot.persistent {
                    kept.insert((resource.instance, resource.owner.clone()), slot);
                }
            }
            for slot in previous.slots.iter().filter(|s| !s.persistent) {
                self.pool.put(slot.desc, slot.handle);
            }
        }

        let mut builder = PlanBuilder {
            pool: &mut self.pool,
            provider,
            kept,
            free: FreeList::new(),
            live: Vec::new(),
            plan: ResourcePlan::default(),
            isolate: options.isolate_components,
        };

        for (position, pass) in resolved.passes().iter().enumerate() {
            builder.expire(position);

            for input in &pass.inputs {
                let (InputSource::Unconnected, Some(desc)) = (&input.source, input.desc) else {
                    continue;
                };
                let owner = PortRef::new(pass.name.as_str(), input.port.as_str());
                let lifetime = Lifetime {
                    first_use: position,
                    last_use: position,
                    pinned: input.persistent,
                };
                let claim = Claim {
                    instance: pass.instance,
                    component: pass.component,
                    persistent: input.persistent,
                };
                if let Err(source) = builder.add(owner.clone(), desc, lifetime, claim) {
                    builder.rollback();
                    return Err(GraphError::AllocationFailed {
                        port: owner,
                        source,
                    });
                }
            }

            for output in &pass.outputs {
                let Some(desc) = output.desc else {
                    continue;
                };
                let owner = PortRef::new(pass.name.as_str(), output.port.as_str());
                let last_use = output
                    .consumers
                    .iter()
                    .filter_map(|consumer| resolved.position(&consumer.pass))
                    .max()
                    .unwrap_or(position);
                let lifetime = Lifetime {
                    first_use: position,
                    last_use,
                    pinned: output.marked || output.persistent,
                };

                let claim = Claim {
                    instance: pass.instance,
                    component: pass.component,
                    persistent: output.persistent,
                };
                match builder.add(owner.clone(), desc, lifetime, claim) {
                    Ok(resource) => {
                        for consumer in &output.consumers {
                            builder.plan.bindings.insert(consumer.clone(), resource);
                        }
                    }
                    Err(source) => {
                        builder.rollback();
                        return Err(GraphError::AllocationFailed {
                            port: owner,
                            source,
                        });
                    }
                }
            }
        }

        let plan = builder.finish();
        log::debug!(
            "Allocated {} resource(s) for {} port(s), pool holds {}",
            plan.slots.len(),
            plan.resources.len(),
            self.pool.len()
        );
        Ok(plan)
    }

    /// Return every resource of `plan` to the pool.
    pub fn recycle(&mut self, plan: ResourcePlan) {
        for slot in plan.slots {
            self.pool.put(slot.desc, slot.handle);
        }
    }

    /// Release every pooled resource to the provider.
    ///
    /// Returns the number of released resources.
    pub fn trim<P: ResourceProvider + ?Sized>(&mut self, provider: &mut P) -> usize {
        let drained = self.pool.drain();
        let count = drained.len();
        for (_, handle) in drained {
            provider.release(handle);
        }
        if count > 0 {
            log::debug!("Released {} pooled resource(s)", count);
        }
        count
    }

    /// Release `plan` and the whole pool to the provider.
    pub fn release_all<P: ResourceProvider + ?Sized>(
        &mut self,
        plan: Option<ResourcePlan>,
        provider: &mut P,
    ) -> usize {
        if let Some(plan) = plan {
            self.recycle(plan);
        }
        self.trim(provider)
    }
}

/// Pass-side facts about a virtual resource being added to a plan.
#[derive(Debug, Clone, Copy)]
struct Claim {
    instance: u64,
    component: usize,
    persistent: bool,
}

struct PlanBuilder<'a, P: ?Sized> {
    pool: &'a mut FreeList<ResourceDesc, ResourceHandle>,
    provider: &'a mut P,
    /// Persistent slots of the previous plan, by pass instance and owner.
    kept: HashMap<(u64, PortRef), Slot>,
    /// Slots of this plan whose last user already ran, keyed by descriptor
    /// and isolation group.
    free: FreeList<(ResourceDesc, usize), usize>,
    /// Unpinned resources that are still live, in allocation order.
    live: Vec<usize>,
    plan: ResourcePlan,
    isolate: bool,
}

impl<P: ResourceProvider + ?Sized> PlanBuilder<'_, P> {
    fn group(&self, component: usize) -> usize {
        if self.isolate {
            component
        } else {
            0
        }
    }

    /// Move resources whose last use is before `position` to the free list.
    fn expire(&mut self, position: usize) {
        let resources = &self.plan.resources;
        let isolate = self.isolate;
        let free = &mut self.free;
        self.live.retain(|&index| {
            let resource = &resources[index];
            if resource.lifetime.last_use < position {
                let group = if isolate { resource.component } else { 0 };
                free.put((resource.desc, group), resource.slot);
                false
            } else {
                true
            }
        });
    }

    fn add(
        &mut self,
        owner: PortRef,
        desc: ResourceDesc,
        lifetime: Lifetime,
        claim: Claim,
    ) -> Result<usize, ProviderError> {
        let slot = if claim.persistent {
            self.persistent_slot(claim.instance, &owner, desc)?
        } else {
            let group = self.group(claim.component);
            match self.free.take(&(desc, group)) {
                Some(slot) => {
                    log::trace!("Aliasing {} onto slot {}", owner, slot);
                    slot
                }
                None => self.new_slot(&owner, desc, false)?,
            }
        };

        let index = self.plan.resources.len();
        self.plan.resources.push(VirtualResource {
            owner: owner.clone(),
            instance: claim.instance,
            desc,
            lifetime,
            slot,
            component: claim.component,
            persistent: claim.persistent,
        });
        self.plan.bindings.insert(owner, index);
        if !lifetime.pinned {
            self.live.push(index);
        }
        Ok(index)
    }

    fn persistent_slot(
        &mut self,
        instance: u64,
        owner: &PortRef,
        desc: ResourceDesc,
    ) -> Result<usize, ProviderError> {
        if let Some(slot) = self.kept.remove(&(instance, owner.clone())) {
            if slot.desc == desc {
                log::trace!("Keeping persistent resource {} for {}", slot.handle, owner);
                self.plan.slots.push(slot);
                return Ok(self.plan.slots.len() - 1);
            }
            log::debug!("Persistent resource for {} changed descriptor", owner);
            self.provider.release(slot.handle);
        }
        self.new_slot(owner, desc, true)
    }

    fn new_slot(
        &mut self,
        owner: &PortRef,
        desc: ResourceDesc,
        persistent: bool,
    ) -> Result<usize, ProviderError> {
        let handle = match self.pool.take(&desc) {
            Some(handle) => {
                log::trace!("Pool hit for {} ({})", owner, desc);
                handle
            }
            None => {
                log::trace!("Pool miss for {} ({})", owner, desc);
                self.provider.allocate(&desc)?
            }
        };
        self.plan.slots.push(Slot {
            handle,
            desc,
            persistent,
        });
        Ok(self.plan.slots.len() - 1)
    }

    /// Return everything acquired so far, and any unclaimed persistent
    /// resource, to the pool.
    fn rollback(self) {
        for slot in self.plan.slots {
            self.pool.put(slot.desc, slot.handle);
        }
        for (_, slot) in self.kept {
            self.pool.put(slot.desc, slot.handle);
        }
    }

    fn finish(self) -> ResourcePlan {
        for ((_, owner), slot) in self.kept {
            log::debug!("Releasing persistent resource {} of {}", slot.handle, owner);
            self.provider.release(slot.handle);
        }
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::resolve;
    use crate::provider::DummyProvider;
    use crate::test_util::{graph_with, reflect};
    use crate::types::{PortDesc, ResourceFormat};

    fn rgba(name: &str) -> PortDesc {
        PortDesc::new(name).format(ResourceFormat::Rgba8Unorm)
    }

    fn plan_for(
        graph: &crate::graph::RenderGraph,
        allocator: &mut ResourceAllocator,
        provider: &mut DummyProvider,
        previous: Option<ResourcePlan>,
    ) -> GraphResult<ResourcePlan> {
        let options = CompileOptions::default();
        let resolved = resolve(graph, &options)?;
        allocator.allocate(&resolved, previous, provider, &options)
    }

    #[test]
    fn test_lifetime_overlap() {
        let a = Lifetime {
            first_use: 0,
            last_use: 1,
            pinned: false,
        };
        let b = Lifetime {
            first_use: 2,
            last_use: 3,
            pinned: false,
        };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Lifetime { first_use: 1, ..b }));
        assert!(Lifetime { pinned: true, ..a }.overlaps(&b));
    }

    #[test]
    fn test_chain_reuses_dead_resource() {
        // A -> B -> C, all rgba: A.out dies after B, so C.out can take it
        let graph = graph_with(
            &[
                ("A", reflect(&[], &[rgba("out")])),
                ("B", reflect(&[PortDesc::new("in")], &[rgba("out")])),
                ("C", reflect(&[PortDesc::new("in")], &[rgba("out")])),
            ],
            &[("A.out", "B.in"), ("B.out", "C.in")],
        );
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();
        let plan = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();

        assert_eq!(plan.resources().len(), 3);
        assert_eq!(plan.slot_count(), 2);
        assert_eq!(
            plan.handle(&PortRef::new("A", "out")),
            plan.handle(&PortRef::new("C", "out"))
        );
        assert_ne!(
            plan.handle(&PortRef::new("A", "out")),
            plan.handle(&PortRef::new("B", "out"))
        );
        assert_eq!(
            plan.handle(&PortRef::new("B", "in")),
            plan.handle(&PortRef::new("A", "out"))
        );
        assert_eq!(provider.live_count(), 2);
    }

    #[test]
    fn test_marked_output_is_not_reused() {
        let mut graph = graph_with(
            &[
                ("A", reflect(&[], &[rgba("out")])),
                ("B", reflect(&[PortDesc::new("in")], &[rgba("out")])),
                ("C", reflect(&[PortDesc::new("in")], &[rgba("out")])),
            ],
            &[("A.out", "B.in"), ("B.out", "C.in")],
        );
        graph.mark_output("A", "out").unwrap();

        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();
        let plan = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();
        assert_eq!(plan.slot_count(), 3);
    }

    #[test]
    fn test_different_descriptors_never_share() {
        let graph = graph_with(
            &[
                ("A", reflect(&[], &[rgba("out")])),
                ("B", reflect(&[PortDesc::new("in")], &[rgba("out")])),
                (
                    "C",
                    reflect(
                        &[PortDesc::new("in")],
                        &[PortDesc::new("out").format(ResourceFormat::R32Float)],
                    ),
                ),
            ],
            &[("A.out", "B.in"), ("B.out", "C.in")],
        );
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();
        let plan = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();
        assert_eq!(plan.slot_count(), 3);
    }

    #[test]
    fn test_recompile_reuses_pool() {
        let graph = graph_with(&[("A", reflect(&[], &[rgba("out")]))], &[]);
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();

        let first = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();
        let handle = first.handle(&PortRef::new("A", "out"));
        let second = plan_for(&graph, &mut allocator, &mut provider, Some(first)).unwrap();

        assert_eq!(second.handle(&PortRef::new("A", "out")), handle);
        assert_eq!(provider.total_allocations(), 1);
        assert_eq!(allocator.pool_size(), 0);
    }

    #[test]
    fn test_persistent_kept_then_released() {
        let graph = graph_with(
            &[("Acc", reflect(&[], &[rgba("history").persistent()]))],
            &[],
        );
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();

        let first = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();
        let handle = first.handle(&PortRef::new("Acc", "history")).unwrap();
        assert!(first.slots()[0].persistent);

        let second = plan_for(&graph, &mut allocator, &mut provider, Some(first)).unwrap();
        assert_eq!(second.handle(&PortRef::new("Acc", "history")), Some(handle));

        let empty = graph_with(&[], &[]);
        let third = plan_for(&empty, &mut allocator, &mut provider, Some(second)).unwrap();
        assert!(third.is_empty());
        assert!(!provider.is_live(handle));
        assert_eq!(allocator.pool_size(), 0);
    }

    #[test]
    fn test_persistent_follows_pass_instance() {
        let history = || {
            graph_with(
                &[("Acc", reflect(&[], &[rgba("history").persistent()]))],
                &[],
            )
        };
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();

        let first = plan_for(&history(), &mut allocator, &mut provider, None).unwrap();
        let old = first.handle(&PortRef::new("Acc", "history")).unwrap();

        // Same name and port, but a new pass object
        let second = plan_for(&history(), &mut allocator, &mut provider, Some(first)).unwrap();
        let new = second.handle(&PortRef::new("Acc", "history")).unwrap();
        assert_ne!(old, new);
        assert!(!provider.is_live(old));
        assert_eq!(provider.live_count(), 1);
    }

    #[test]
    fn test_allocation_failure_rolls_back() {
        let graph = graph_with(
            &[
                ("A", reflect(&[], &[rgba("out")])),
                ("B", reflect(&[], &[rgba("out")])),
            ],
            &[],
        );
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new().with_capacity_limit(1);
        // A.out is dead by the time B runs, so one resource suffices
        let plan = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();
        assert_eq!(plan.slot_count(), 1);
        allocator.recycle(plan);

        let mut graph = graph;
        graph.mark_output("A", "out").unwrap();
        graph.mark_output("B", "out").unwrap();
        let err = plan_for(&graph, &mut allocator, &mut provider, None).unwrap_err();
        match err {
            GraphError::AllocationFailed { port, source } => {
                assert_eq!(port, PortRef::new("B", "out"));
                assert_eq!(source, ProviderError::Exhausted { capacity: 1 });
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(allocator.pool_size(), 1);
        assert_eq!(provider.live_count(), 1);
    }

    #[test]
    fn test_isolated_components_do_not_alias() {
        let graph = graph_with(
            &[
                ("A", reflect(&[], &[rgba("out")])),
                ("B", reflect(&[], &[rgba("out")])),
            ],
            &[],
        );
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();
        let options = CompileOptions {
            isolate_components: true,
            ..Default::default()
        };
        let resolved = resolve(&graph, &options).unwrap();
        let plan = allocator
            .allocate(&resolved, None, &mut provider, &options)
            .unwrap();
        assert_eq!(plan.slot_count(), 2);
    }

    #[test]
    fn test_trim_releases_pool() {
        let graph = graph_with(&[("A", reflect(&[], &[rgba("out")]))], &[]);
        let mut allocator = ResourceAllocator::new();
        let mut provider = DummyProvider::new();
        let plan = plan_for(&graph, &mut allocator, &mut provider, None).unwrap();

        allocator.recycle(plan);
        assert_eq!(allocator.pool_size(), 1);
        assert_eq!(allocator.trim(&mut provider), 1);
        assert_eq!(provider.live_count(), 0);
    }
}
