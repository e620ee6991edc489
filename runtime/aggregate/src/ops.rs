//! Driver-facing callback traits and the contexts they run in.
//!
//! All callbacks execute with the registry lock held. A callback must not
//! call back into the [`Registry`](crate::Registry) that invoked it - the
//! lock is not reentrant and the call would deadlock. Everything a callback
//! legitimately needs (binding, resource scoping, identities) is reachable
//! through the context it is handed.

use core::any::Any;

use crate::bind::AggregateContext;
use crate::resource::ResourceLedger;
use crate::{DeviceId, Result};

/// Callbacks of one component driver.
///
/// Registered with [`Registry::add_component`](crate::Registry::add_component)
/// and invoked through [`AggregateContext::bind_all`] /
/// [`AggregateContext::unbind_all`] once the owning aggregate assembles.
pub trait ComponentOps: Send + Sync {
    /// Activate this component within its aggregate.
    ///
    /// `data` is the opaque per-aggregate payload handed to `bind_all`,
    /// typically the aggregate driver's own state under construction.
    ///
    /// Resources acquired here should be registered on `ctx` so they are
    /// released automatically when this component unbinds.
    ///
    /// # Errors
    /// Return [`crate::AggregateError::DeferredDependency`] when a transitive
    /// dependency is not ready yet; any other error is treated as a real
    /// bind failure. Either way the aggregate rolls back this attempt.
    fn bind(&self, ctx: &mut BindContext<'_>, data: &mut (dyn Any + Send)) -> Result<()>;

    /// Deactivate this component. Called in exact reverse bind order, both
    /// on orderly teardown and when rolling back a partial bind.
    fn unbind(&self, ctx: &mut BindContext<'_>, data: &mut (dyn Any + Send));
}

/// Callbacks of an aggregate driver.
pub trait AggregateDriver: Send + Sync {
    /// Assemble the aggregate. Runs once all match entries have resolved.
    ///
    /// The usual shape: allocate the aggregate's own state, then call
    /// [`AggregateContext::bind_all`] with it, then publish the assembled
    /// device to its subsystem.
    fn probe(&self, agg: &mut AggregateContext<'_>) -> Result<()>;

    /// Disassemble the aggregate. Runs when the aggregate driver is
    /// unregistered or any of its components is removed. Expected to call
    /// [`AggregateContext::unbind_all`].
    fn remove(&self, agg: &mut AggregateContext<'_>);

    /// System shutdown hook. Optional.
    fn shutdown(&self, _agg: &mut AggregateContext<'_>) {}
}

/// Callbacks of the legacy, pre-aggregate-device master API.
///
/// Kept so unmigrated coordinating drivers keep working unchanged; wrapped
/// into an [`AggregateDriver`] internally. Masters do not take part in
/// runtime PM bookkeeping.
pub trait MasterOps: Send + Sync {
    fn bind(&self, agg: &mut AggregateContext<'_>) -> Result<()>;
    fn unbind(&self, agg: &mut AggregateContext<'_>);
}

/// Adapter presenting [`MasterOps`] as an [`AggregateDriver`].
pub(crate) struct LegacyShim {
    pub(crate) ops: alloc::sync::Arc<dyn MasterOps>,
}

impl AggregateDriver for LegacyShim {
    fn probe(&self, agg: &mut AggregateContext<'_>) -> Result<()> {
        self.ops.bind(agg)
    }

    fn remove(&self, agg: &mut AggregateContext<'_>) {
        self.ops.unbind(agg)
    }
}

/// Context handed to one component's bind/unbind callback.
///
/// Scopes resource registration to the component being bound: actions added
/// with [`add_action`](Self::add_action) are grouped so that exactly this
/// component's resources are released at its unbind (or immediately, if the
/// bind fails part-way).
pub struct BindContext<'a> {
    dev: DeviceId,
    parent: DeviceId,
    ledger: &'a mut ResourceLedger,
}

impl<'a> BindContext<'a> {
    pub(crate) fn new(dev: DeviceId, parent: DeviceId, ledger: &'a mut ResourceLedger) -> Self {
        Self {
            dev,
            parent,
            ledger,
        }
    }

    /// The component's own device.
    pub fn device(&self) -> DeviceId {
        self.dev
    }

    /// The aggregate's parent device.
    pub fn parent(&self) -> DeviceId {
        self.parent
    }

    /// Register a release action against the component's device. Released
    /// when this component unbinds.
    pub fn add_action(&mut self, action: impl FnOnce() + Send + 'static) {
        self.ledger.stack_mut(self.dev).add_action(action);
    }

    /// Register a release action against the aggregate's parent device.
    /// Released when the aggregate itself is torn down (or immediately, if
    /// this bind fails).
    pub fn add_parent_action(&mut self, action: impl FnOnce() + Send + 'static) {
        self.ledger.stack_mut(self.parent).add_action(action);
    }
}
