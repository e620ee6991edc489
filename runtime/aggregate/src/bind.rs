//! Bind/unbind orchestration across an aggregate's matched components.
//!
//! Binding walks the match list front to back, giving every non-duplicate
//! component its bind callback inside a resource scope of its own; any
//! failure unbinds the already-bound prefix in exact reverse order. Orderly
//! teardown is the same reverse walk over the full list.

use core::any::Any;

use log::{debug, error, info, warn};

use crate::component::ComponentId;
use crate::device::AggregateId;
use crate::ops::BindContext;
use crate::registry::RegistryInner;
use crate::{AggregateError, DeviceId, Result};

/// Context handed to an aggregate driver's probe/remove/shutdown callback.
///
/// Borrows the registry state for the duration of the callback, which runs
/// under the registry lock; binding and unbinding go through here rather
/// than back through the [`Registry`](crate::Registry).
pub struct AggregateContext<'a> {
    inner: &'a mut RegistryInner,
    id: AggregateId,
}

impl<'a> AggregateContext<'a> {
    pub(crate) fn new(inner: &'a mut RegistryInner, id: AggregateId) -> Self {
        Self { inner, id }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    /// The parent device this aggregate hangs off.
    pub fn parent(&self) -> DeviceId {
        self.inner.aggregate(self.id).parent
    }

    /// Register a release action against the parent device. Actions added
    /// during probe belong to the probe's resource scope: they are released
    /// when the aggregate is torn down, or immediately if the probe fails.
    pub fn add_parent_action(&mut self, action: impl FnOnce() + Send + 'static) {
        let parent = self.parent();
        self.inner.resources.stack_mut(parent).add_action(action);
    }

    /// Bind every matched component of this aggregate in match-list order,
    /// passing `data` to each bind callback.
    ///
    /// Should be called from the aggregate driver's probe.
    ///
    /// # Errors
    /// The first component failure aborts the walk; components bound so far
    /// are unbound again in reverse order and the error is returned.
    pub fn bind_all(&mut self, data: &mut (dyn Any + Send)) -> Result<()> {
        bind_all(self.inner, self.id, data)
    }

    /// Unbind every bound component of this aggregate in reverse match-list
    /// order. Should be called from the aggregate driver's remove.
    pub fn unbind_all(&mut self, data: &mut (dyn Any + Send)) {
        unbind_all(self.inner, self.id, data)
    }
}

fn entry_target(
    inner: &RegistryInner,
    id: AggregateId,
    index: usize,
) -> (Option<ComponentId>, bool) {
    let entry = &inner.aggregate(id).match_list.entries()[index];
    (entry.component, entry.duplicate)
}

pub(crate) fn bind_all(
    inner: &mut RegistryInner,
    id: AggregateId,
    data: &mut (dyn Any + Send),
) -> Result<()> {
    let len = inner.aggregate(id).match_list.len();
    let mut failed: Option<(usize, AggregateError)> = None;

    for index in 0..len {
        let (component, duplicate) = entry_target(inner, id, index);
        if duplicate {
            continue;
        }
        let Some(cid) = component else {
            // Binding an aggregate with unresolved entries is a caller bug;
            // keep going best-effort.
            error!(
                "{:?}: bind_all with unresolved match entry {}",
                inner.aggregate(id).parent,
                index
            );
            continue;
        };
        if let Err(err) = bind_component(inner, id, cid, data) {
            failed = Some((index, err));
            break;
        }
    }

    let Some((failed_index, err)) = failed else {
        return Ok(());
    };

    // Roll back everything bound so far, newest first.
    for index in (0..failed_index).rev() {
        let (component, duplicate) = entry_target(inner, id, index);
        if duplicate {
            continue;
        }
        if let Some(cid) = component {
            unbind_component(inner, id, cid, data);
        }
    }
    Err(err)
}

pub(crate) fn unbind_all(inner: &mut RegistryInner, id: AggregateId, data: &mut (dyn Any + Send)) {
    let len = inner.aggregate(id).match_list.len();
    for index in (0..len).rev() {
        let (component, duplicate) = entry_target(inner, id, index);
        if duplicate {
            continue;
        }
        if let Some(cid) = component {
            unbind_component(inner, id, cid, data);
        }
    }
}

fn bind_component(
    inner: &mut RegistryInner,
    id: AggregateId,
    cid: ComponentId,
    data: &mut (dyn Any + Send),
) -> Result<()> {
    let parent = inner.aggregate(id).parent;
    let (dev, ops) = {
        let component = inner.component(cid);
        (component.dev, component.ops.clone())
    };

    // Scratch scope on the parent: a failed bind takes its parent-side
    // allocations with it without touching earlier components' resources.
    let parent_group = inner.resources.stack_mut(parent).open_group();
    // Scope on the component's own device, kept for the whole time the
    // component stays bound.
    let dev_group = inner.resources.stack_mut(dev).open_group();

    debug!("{:?}: binding {:?}", parent, dev);

    let ret = {
        let mut ctx = BindContext::new(dev, parent, &mut inner.resources);
        ops.bind(&mut ctx, data)
    };

    match ret {
        Ok(()) => {
            {
                let component = inner.component_mut(cid);
                component.bound = true;
                component.group = Some(dev_group);
            }
            // Close the component's scope so its resources stay encapsulated
            // until unbind; the parent-side scratch scope dissolves into the
            // enclosing probe scope.
            inner.resources.stack_mut(dev).close_group(dev_group);
            inner.resources.stack_mut(parent).remove_group(parent_group);
            info!("{:?}: bound {:?}", parent, dev);
            Ok(())
        }
        Err(err) => {
            inner.resources.stack_mut(dev).release_group(dev_group);
            inner.resources.stack_mut(parent).release_group(parent_group);
            if matches!(err, AggregateError::DeferredDependency) {
                debug!("{:?}: {:?} deferred bind", parent, dev);
            } else {
                error!("{:?}: failed to bind {:?}: {}", parent, dev, err);
            }
            Err(err)
        }
    }
}

fn unbind_component(
    inner: &mut RegistryInner,
    id: AggregateId,
    cid: ComponentId,
    data: &mut (dyn Any + Send),
) {
    let parent = inner.aggregate(id).parent;
    let (dev, ops, bound) = {
        let component = inner.component(cid);
        (component.dev, component.ops.clone(), component.bound)
    };
    if !bound {
        warn!("{:?}: unbinding {:?} which is not bound", parent, dev);
    }

    {
        let mut ctx = BindContext::new(dev, parent, &mut inner.resources);
        ops.unbind(&mut ctx, data);
    }

    let group = {
        let component = inner.component_mut(cid);
        component.bound = false;
        component.group.take()
    };
    // Give back everything this component claimed during its own bind.
    if let Some(group) = group {
        inner.resources.stack_mut(dev).release_group(group);
    }
    debug!("{:?}: unbound {:?}", parent, dev);
}
