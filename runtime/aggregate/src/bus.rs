//! The virtual aggregate bus - the event loop between registry mutation and
//! bind lifecycle.
//!
//! Every component registration rescans the registered aggregate devices.
//! A device whose match list resolves completely is probed; a probe failure
//! leaves it registered and eligible again on the next registry event.

use log::{debug, error, info};

use crate::bind::AggregateContext;
use crate::device::{AggregateId, BindState};
use crate::registry::RegistryInner;
use crate::{AggregateError, Result};

/// Re-evaluate every registered aggregate device. Assembly outcomes are not
/// propagated: components only announce availability, they do not care
/// whether any aggregate could actually probe.
pub(crate) fn rescan(inner: &mut RegistryInner) {
    for id in inner.aggregate_ids() {
        let _ = try_assemble(inner, id);
    }
}

/// Run the matching algorithm for one aggregate device and probe it if it
/// just became ready.
///
/// # Errors
/// [`AggregateError::NotReady`] while matches are unresolved; otherwise the
/// probe result.
pub(crate) fn try_assemble(inner: &mut RegistryInner, id: AggregateId) -> Result<()> {
    if inner.aggregate(id).state != BindState::Unbound {
        return Ok(());
    }
    if !inner.find_components(id) {
        return Err(AggregateError::NotReady);
    }
    probe(inner, id)
}

fn probe(inner: &mut RegistryInner, id: AggregateId) -> Result<()> {
    let (parent, modern, driver) = {
        let adev = inner.aggregate(id);
        (adev.parent, adev.modern, adev.driver.clone())
    };

    // Only do runtime PM when drivers have migrated to the modern callbacks.
    if modern {
        let pm = &mut inner.aggregate_mut(id).pm;
        pm.get_noresume();
        pm.set_active();
        pm.enable();
    }

    // Everything the probe acquires against the parent lands in one scope,
    // released wholesale if the probe fails.
    let group = inner.resources.stack_mut(parent).open_group();
    {
        let adev = inner.aggregate_mut(id);
        adev.probe_group = Some(group);
        adev.state = BindState::Binding;
    }

    let ret = {
        let mut agg = AggregateContext::new(inner, id);
        driver.probe(&mut agg)
    };

    match ret {
        Ok(()) => {
            inner.aggregate_mut(id).state = BindState::Bound;
            info!("{:?}: aggregate{} assembled", parent, id.0);
            Ok(())
        }
        Err(err) => {
            inner.resources.stack_mut(parent).release_group(group);
            {
                let adev = inner.aggregate_mut(id);
                adev.probe_group = None;
                adev.state = BindState::Unbound;
            }
            if modern {
                let pm = &mut inner.aggregate_mut(id).pm;
                pm.disable();
                pm.set_suspended();
                pm.put_noidle();
            }
            if matches!(err, AggregateError::DeferredDependency) {
                debug!("{:?}: aggregate{} probe deferred", parent, id.0);
            } else {
                error!("{:?}: aggregate{} probe failed: {}", parent, id.0, err);
            }
            Err(err)
        }
    }
}

/// Force a bound aggregate apart: run the driver's remove (which unbinds the
/// components in reverse), then give back the probe's resource scope.
///
/// No-op unless the aggregate is currently bound. The device itself stays
/// registered; it may reassemble on a later registry event.
pub(crate) fn detach_driver(inner: &mut RegistryInner, id: AggregateId) {
    if inner.aggregate(id).state != BindState::Bound {
        return;
    }
    let (parent, modern, driver) = {
        let adev = inner.aggregate(id);
        (adev.parent, adev.modern, adev.driver.clone())
    };

    inner.aggregate_mut(id).state = BindState::Unbinding;
    if modern {
        inner.aggregate_mut(id).pm.get_sync();
    }

    {
        let mut agg = AggregateContext::new(inner, id);
        driver.remove(&mut agg);
    }

    if let Some(group) = inner.aggregate_mut(id).probe_group.take() {
        inner.resources.stack_mut(parent).release_group(group);
    }
    if modern {
        let pm = &mut inner.aggregate_mut(id).pm;
        pm.put_noidle();
        pm.disable();
        pm.set_suspended();
        pm.put_noidle();
    }
    inner.aggregate_mut(id).state = BindState::Unbound;
    debug!("{:?}: aggregate{} disassembled", parent, id.0);
}

/// System shutdown: give every assembled aggregate its shutdown hook.
pub(crate) fn shutdown(inner: &mut RegistryInner) {
    for id in inner.aggregate_ids() {
        if inner.aggregate(id).state != BindState::Bound {
            continue;
        }
        let driver = inner.aggregate(id).driver.clone();
        let mut agg = AggregateContext::new(inner, id);
        driver.shutdown(&mut agg);
    }
}
