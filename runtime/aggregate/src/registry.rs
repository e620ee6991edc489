//! The component registry and its matching algorithm.
//!
//! One [`Registry`] instance owns every piece of cross-linked state:
//! registered components (in registration order), aggregate devices,
//! dependency links and per-device resource stacks. A single lock serializes
//! all of it; matching and binding of one aggregate are therefore fully
//! ordered against any other aggregate's.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, error};
use spin::Mutex;

use crate::bus;
use crate::component::{Component, ComponentId};
use crate::debug::format_aggregate;
use crate::device::{AggregateDevice, AggregateId, BindState, RuntimePm};
use crate::link::{DeviceLink, LinkId};
use crate::matching::MatchList;
use crate::ops::{AggregateDriver, ComponentOps, LegacyShim, MasterOps};
use crate::resource::ResourceLedger;
use crate::{AggregateError, DeviceId, Result};

/// Process- or test-scoped component registry.
///
/// Registries are independent: a component registered on one is invisible
/// to every other. Production systems typically hold one in a `static` or a
/// platform context; tests create one per case.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::new()),
        }
    }

    /// Register a component for `dev`.
    ///
    /// The component is appended to the registry and every pending aggregate
    /// device is re-evaluated. Registration succeeds whether or not any
    /// aggregate currently wants the component; the callbacks in `ops` fire
    /// once an aggregate claims and assembles it.
    ///
    /// Remove with [`remove_component`](Self::remove_component) before the
    /// owning driver goes away.
    pub fn add_component(&self, dev: DeviceId, ops: Arc<dyn ComponentOps>) -> Result<()> {
        self.insert(dev, ops, 0)
    }

    /// Register a tagged component for `dev`.
    ///
    /// `subcomponent` distinguishes multiple components registered on the
    /// same device and is matched by [`MatchList::add_typed`] entries.
    ///
    /// # Errors
    /// `subcomponent` must be nonzero.
    pub fn add_component_typed(
        &self,
        dev: DeviceId,
        ops: Arc<dyn ComponentOps>,
        subcomponent: u32,
    ) -> Result<()> {
        if subcomponent == 0 {
            return Err(AggregateError::InvalidArgument(
                "subcomponent must be nonzero",
            ));
        }
        self.insert(dev, ops, subcomponent)
    }

    fn insert(&self, dev: DeviceId, ops: Arc<dyn ComponentOps>, subcomponent: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        debug!("{:?}: adding component (ops {:p})", dev, Arc::as_ptr(&ops));
        inner.insert_component(Component::new(dev, ops, subcomponent));
        bus::rescan(&mut inner);
        Ok(())
    }

    /// Unregister the component previously added for (`dev`, `ops`).
    ///
    /// If the component is attached to an aggregate device, the whole
    /// aggregate is forced apart first: every bound component - including
    /// this one - is unbound in reverse match order, and the aggregate
    /// becomes eligible to reassemble once a replacement shows up.
    ///
    /// Removing a component that was never added is a caller bug; it is
    /// logged and otherwise ignored.
    pub fn remove_component(&self, dev: DeviceId, ops: &Arc<dyn ComponentOps>) {
        let mut inner = self.inner.lock();
        let Some(cid) = inner.take_component(dev, ops) else {
            error!("{:?}: removing component that was never added", dev);
            return;
        };

        if let Some(aid) = inner.component(cid).aggregate {
            // Take the aggregate apart before scrubbing the match entries so
            // this component still receives its unbind in reverse order.
            bus::detach_driver(&mut inner, aid);
            inner.clear_entries_for(cid);
            if let Some(link) = inner.component_mut(cid).link.take() {
                inner.drop_link(link);
            }
            inner.put_aggregate(aid);
        } else {
            inner.clear_entries_for(cid);
        }
        inner.free_component(cid);
        debug!("{:?}: removed component", dev);
    }

    /// Register an aggregate device under `parent`.
    ///
    /// The match list is consumed and fixed; the device is evaluated
    /// immediately and on every later registry event, and `driver.probe`
    /// runs once all entries resolve. The same `driver` value may back any
    /// number of aggregate devices.
    ///
    /// Returns a handle usable with the introspection accessors; the
    /// aggregate itself is identified for unregistration by
    /// (`parent`, `driver`).
    pub fn register_aggregate(
        &self,
        parent: DeviceId,
        driver: Arc<dyn AggregateDriver>,
        mut match_list: MatchList,
    ) -> Result<AggregateId> {
        let mut inner = self.inner.lock();
        match_list.shrink();
        let id = inner.insert_aggregate(parent, driver, None, match_list);
        debug!("{:?}: registered aggregate{}", parent, id.0);
        // Newly registered devices probe right away if their components are
        // already all present; failure here is not a registration failure.
        let _ = bus::try_assemble(&mut inner, id);
        Ok(id)
    }

    /// Unregister the aggregate device registered for (`parent`, `driver`),
    /// disassembling it first if necessary.
    pub fn unregister_aggregate(&self, parent: DeviceId, driver: &Arc<dyn AggregateDriver>) {
        let mut inner = self.inner.lock();
        let found = inner
            .aggregates
            .iter()
            .flatten()
            .find(|a| a.registered && a.parent == parent && Arc::ptr_eq(&a.driver, driver))
            .map(|a| a.id);
        let Some(id) = found else {
            error!("{:?}: unregistering unknown aggregate driver", parent);
            return;
        };
        inner.unregister(id);
    }

    /// Register an aggregate through the legacy master callbacks.
    ///
    /// Kept for coordinating drivers that have not migrated to
    /// [`AggregateDriver`]; behaves like
    /// [`register_aggregate`](Self::register_aggregate) except that runtime
    /// PM bookkeeping is skipped, preserving the old behavior.
    pub fn add_master(
        &self,
        parent: DeviceId,
        ops: Arc<dyn MasterOps>,
        mut match_list: MatchList,
    ) -> Result<AggregateId> {
        let mut inner = self.inner.lock();
        match_list.shrink();
        let driver: Arc<dyn AggregateDriver> = Arc::new(LegacyShim { ops: ops.clone() });
        let id = inner.insert_aggregate(parent, driver, Some(ops), match_list);
        debug!("{:?}: registered master aggregate{}", parent, id.0);
        let _ = bus::try_assemble(&mut inner, id);
        Ok(id)
    }

    /// Unregister a legacy master previously added with
    /// [`add_master`](Self::add_master).
    pub fn remove_master(&self, parent: DeviceId, ops: &Arc<dyn MasterOps>) {
        let mut inner = self.inner.lock();
        let found = inner
            .aggregates
            .iter()
            .flatten()
            .find(|a| {
                a.registered
                    && a.parent == parent
                    && a.legacy_ops.as_ref().is_some_and(|o| Arc::ptr_eq(o, ops))
            })
            .map(|a| a.id);
        let Some(id) = found else {
            error!("{:?}: unregistering unknown master", parent);
            return;
        };
        inner.unregister(id);
    }

    /// System shutdown: run every assembled aggregate's shutdown hook.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        bus::shutdown(&mut inner);
    }

    /// Number of currently registered components.
    pub fn component_count(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Bind state of an aggregate device, if it is still alive.
    pub fn aggregate_state(&self, id: AggregateId) -> Option<BindState> {
        self.inner.lock().aggregate_get(id).map(|a| a.state)
    }

    /// Runtime PM bookkeeping of an aggregate device, if it is still alive.
    pub fn runtime_pm(&self, id: AggregateId) -> Option<RuntimePm> {
        self.inner.lock().aggregate_get(id).map(|a| a.pm)
    }

    /// Textual status of one aggregate device: its parent and bound state,
    /// then one line per match entry. Diagnostic surface only.
    pub fn dump_aggregate(&self, id: AggregateId) -> Option<String> {
        let inner = self.inner.lock();
        format_aggregate(&inner, id)
    }

    /// Textual status of every live aggregate device.
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        for id in inner.all_aggregate_ids() {
            if let Some(listing) = format_aggregate(&inner, id) {
                out.push_str(&listing);
                out.push('\n');
            }
        }
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything behind the registry lock.
pub(crate) struct RegistryInner {
    /// Component arena; freed slots are reused.
    components: Vec<Option<Component>>,
    /// Live components in registration order - the order matching scans.
    pub(crate) order: Vec<ComponentId>,
    /// Aggregate device arena; slots are never reused so ids stay unique.
    pub(crate) aggregates: Vec<Option<AggregateDevice>>,
    /// Dependency link arena.
    links: Vec<Option<DeviceLink>>,
    /// Per-device resource stacks.
    pub(crate) resources: ResourceLedger,
}

impl RegistryInner {
    pub(crate) fn new() -> Self {
        Self {
            components: Vec::new(),
            order: Vec::new(),
            aggregates: Vec::new(),
            links: Vec::new(),
            resources: ResourceLedger::new(),
        }
    }

    pub(crate) fn component(&self, id: ComponentId) -> &Component {
        self.components[id.0 as usize]
            .as_ref()
            .expect("stale component id")
    }

    pub(crate) fn component_mut(&mut self, id: ComponentId) -> &mut Component {
        self.components[id.0 as usize]
            .as_mut()
            .expect("stale component id")
    }

    pub(crate) fn component_get(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0 as usize)?.as_ref()
    }

    pub(crate) fn aggregate(&self, id: AggregateId) -> &AggregateDevice {
        self.aggregates[id.0 as usize]
            .as_ref()
            .expect("stale aggregate id")
    }

    pub(crate) fn aggregate_mut(&mut self, id: AggregateId) -> &mut AggregateDevice {
        self.aggregates[id.0 as usize]
            .as_mut()
            .expect("stale aggregate id")
    }

    pub(crate) fn aggregate_get(&self, id: AggregateId) -> Option<&AggregateDevice> {
        self.aggregates.get(id.0 as usize)?.as_ref()
    }

    /// Registered aggregate devices, in registration order.
    pub(crate) fn aggregate_ids(&self) -> Vec<AggregateId> {
        self.aggregates
            .iter()
            .flatten()
            .filter(|a| a.registered)
            .map(|a| a.id)
            .collect()
    }

    /// Every live aggregate device, registered or lingering on claim
    /// references.
    pub(crate) fn all_aggregate_ids(&self) -> Vec<AggregateId> {
        self.aggregates.iter().flatten().map(|a| a.id).collect()
    }

    pub(crate) fn insert_component(&mut self, component: Component) -> ComponentId {
        let id = match self.components.iter().position(|slot| slot.is_none()) {
            Some(free) => {
                self.components[free] = Some(component);
                ComponentId(free as u32)
            }
            None => {
                self.components.push(Some(component));
                ComponentId((self.components.len() - 1) as u32)
            }
        };
        self.order.push(id);
        id
    }

    /// Unlink the component for (`dev`, `ops`) from the registration order.
    /// The arena slot stays valid until [`free_component`](Self::free_component).
    pub(crate) fn take_component(
        &mut self,
        dev: DeviceId,
        ops: &Arc<dyn ComponentOps>,
    ) -> Option<ComponentId> {
        let pos = self
            .order
            .iter()
            .position(|&cid| self.component(cid).is(dev, ops))?;
        Some(self.order.remove(pos))
    }

    pub(crate) fn free_component(&mut self, id: ComponentId) {
        self.components[id.0 as usize] = None;
    }

    /// Drop every match-entry reference to `cid`, in all aggregates.
    pub(crate) fn clear_entries_for(&mut self, cid: ComponentId) {
        for adev in self.aggregates.iter_mut().flatten() {
            for index in 0..adev.match_list.len() {
                let entry = adev.match_list.entry_mut(index);
                if entry.component == Some(cid) {
                    entry.component = None;
                    entry.duplicate = false;
                }
            }
        }
    }

    pub(crate) fn insert_aggregate(
        &mut self,
        parent: DeviceId,
        driver: Arc<dyn AggregateDriver>,
        legacy_ops: Option<Arc<dyn MasterOps>>,
        match_list: MatchList,
    ) -> AggregateId {
        let id = AggregateId(self.aggregates.len() as u32);
        self.aggregates.push(Some(AggregateDevice::new(
            id, parent, driver, legacy_ops, match_list,
        )));
        id
    }

    fn unregister(&mut self, id: AggregateId) {
        bus::detach_driver(self, id);
        self.aggregate_mut(id).registered = false;
        self.put_aggregate(id);
    }

    /// Drop one device-model reference; free the device once unregistered
    /// and unreferenced.
    pub(crate) fn put_aggregate(&mut self, id: AggregateId) {
        let adev = self.aggregate_mut(id);
        adev.refs = adev.refs.saturating_sub(1);
        if adev.refs == 0 && !adev.registered {
            self.free_aggregate(id);
        }
    }

    fn free_aggregate(&mut self, id: AggregateId) {
        // Let go of any component still pointing back at this device.
        for component in self.components.iter_mut().flatten() {
            if component.aggregate == Some(id) {
                component.aggregate = None;
                if let Some(link) = component.link.take() {
                    if let Some(slot) = self.links.get_mut(link.0 as usize) {
                        *slot = None;
                    }
                }
            }
        }
        for slot in self.links.iter_mut() {
            if slot.is_some_and(|l| l.consumer == id) {
                *slot = None;
            }
        }
        debug!(
            "{:?}: destroyed aggregate{}",
            self.aggregate(id).parent,
            id.0
        );
        // Dropping the slot also runs the match list's release hooks.
        self.aggregates[id.0 as usize] = None;
    }

    pub(crate) fn add_link(&mut self, consumer: AggregateId, cid: ComponentId) -> LinkId {
        let supplier = self.component(cid).dev;
        let link = DeviceLink::new(consumer, supplier);
        debug!(
            "aggregate{}: linked to {:?} ({:?})",
            consumer.0, link.supplier, link.flags
        );
        match self.links.iter().position(|slot| slot.is_none()) {
            Some(free) => {
                self.links[free] = Some(link);
                LinkId(free as u32)
            }
            None => {
                self.links.push(Some(link));
                LinkId((self.links.len() - 1) as u32)
            }
        }
    }

    pub(crate) fn drop_link(&mut self, id: LinkId) {
        if let Some(slot) = self.links.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// The matching algorithm: resolve this aggregate's match entries left
    /// to right against the registry, claiming components along the way.
    ///
    /// Matching stops at the first entry with no candidate and reports the
    /// aggregate not ready, even if later entries would already resolve -
    /// entries resolve strictly in order, which keeps multi-aggregate races
    /// for a shared component deterministic.
    pub(crate) fn find_components(&mut self, id: AggregateId) -> bool {
        let len = self.aggregate(id).match_list.len();
        for index in 0..len {
            if self.aggregate(id).match_list.entries()[index]
                .component
                .is_some()
            {
                continue;
            }
            debug!(
                "{:?}: looking for component {}",
                self.aggregate(id).parent,
                index
            );

            let Some(cid) = self.find_component(id, index) else {
                return false;
            };

            // Already attached means an earlier entry of this same aggregate
            // claimed the component: present, but bound only once.
            let duplicate = self.component(cid).aggregate.is_some();
            debug!(
                "{:?}: found component {:?}, duplicate {}",
                self.aggregate(id).parent,
                self.component(cid).dev,
                duplicate
            );

            let entry = self.aggregate_mut(id).match_list.entry_mut(index);
            entry.duplicate = duplicate;
            entry.component = Some(cid);
            if duplicate {
                continue;
            }

            // A fresh claim keeps the aggregate device alive until the
            // component is removed again.
            self.aggregate_mut(id).refs += 1;
            let link = self.add_link(id, cid);
            let component = self.component_mut(cid);
            component.aggregate = Some(id);
            component.link = Some(link);
        }
        true
    }

    /// First registered component acceptable to the given match entry, in
    /// registration order. Components attached to another aggregate are
    /// skipped.
    fn find_component(&self, id: AggregateId, index: usize) -> Option<ComponentId> {
        let entry = &self.aggregate(id).match_list.entries()[index];
        self.order.iter().copied().find(|&cid| {
            let component = self.component(cid);
            if component.aggregate.is_some() && component.aggregate != Some(id) {
                return false;
            }
            entry.matches(&component.dev, component.subcomponent)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::BindContext;
    use core::any::Any;

    struct NopOps;

    impl ComponentOps for NopOps {
        fn bind(&self, _ctx: &mut BindContext<'_>, _data: &mut (dyn Any + Send)) -> Result<()> {
            Ok(())
        }

        fn unbind(&self, _ctx: &mut BindContext<'_>, _data: &mut (dyn Any + Send)) {}
    }

    fn dev(name: &'static str) -> DeviceId {
        DeviceId::Platform { name }
    }

    #[test]
    fn test_registration_order_survives_removal_and_slot_reuse() {
        let mut inner = RegistryInner::new();
        let ops: Arc<dyn ComponentOps> = Arc::new(NopOps);

        inner.insert_component(Component::new(dev("a"), ops.clone(), 0));
        inner.insert_component(Component::new(dev("b"), ops.clone(), 0));
        inner.insert_component(Component::new(dev("c"), ops.clone(), 0));

        let b = inner.take_component(dev("b"), &ops).unwrap();
        inner.free_component(b);

        // The next insertion reuses b's arena slot but must still scan last.
        let d = inner.insert_component(Component::new(dev("d"), ops.clone(), 0));
        assert_eq!(d, b);

        let scanned: Vec<DeviceId> = inner
            .order
            .iter()
            .map(|&cid| inner.component(cid).dev)
            .collect();
        assert_eq!(scanned, vec![dev("a"), dev("c"), dev("d")]);
    }

    #[test]
    fn test_component_identity_is_per_ops_allocation() {
        let mut inner = RegistryInner::new();
        let first: Arc<dyn ComponentOps> = Arc::new(NopOps);
        let second: Arc<dyn ComponentOps> = Arc::new(NopOps);

        inner.insert_component(Component::new(dev("a"), first.clone(), 0));
        inner.insert_component(Component::new(dev("a"), second.clone(), 0));

        let taken = inner.take_component(dev("a"), &second).unwrap();
        assert!(Arc::ptr_eq(&inner.component(taken).ops, &second));
        assert_eq!(inner.order.len(), 1);
        assert!(Arc::ptr_eq(
            &inner.component(inner.order[0]).ops,
            &first
        ));
    }

    #[test]
    fn test_typed_registration_rejects_zero_subcomponent() {
        let registry = Registry::new();
        let ops: Arc<dyn ComponentOps> = Arc::new(NopOps);

        let result = registry.add_component_typed(dev("a"), ops, 0);
        assert!(matches!(result, Err(AggregateError::InvalidArgument(_))));
        assert_eq!(registry.component_count(), 0);
    }

    #[test]
    fn test_remove_unknown_component_is_harmless() {
        let registry = Registry::new();
        let ops: Arc<dyn ComponentOps> = Arc::new(NopOps);

        registry.remove_component(dev("ghost"), &ops);

        // The registry stays usable.
        registry.add_component(dev("a"), ops.clone()).unwrap();
        assert_eq!(registry.component_count(), 1);
    }

    #[test]
    fn test_component_count_tracks_registrations() {
        let registry = Registry::new();
        let ops: Arc<dyn ComponentOps> = Arc::new(NopOps);

        registry.add_component(dev("a"), ops.clone()).unwrap();
        registry.add_component(dev("b"), ops.clone()).unwrap();
        assert_eq!(registry.component_count(), 2);

        registry.remove_component(dev("a"), &ops);
        assert_eq!(registry.component_count(), 1);
    }
}
