//! Registered components - sub-devices available for aggregation.

use alloc::sync::Arc;

use manifold_devres::GroupId;

use crate::device::AggregateId;
use crate::link::LinkId;
use crate::ops::ComponentOps;
use crate::DeviceId;

/// Stable handle into the registry's component arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ComponentId(pub(crate) u32);

/// One registered sub-device.
///
/// Identity is the (device, ops) pair - or (device, ops, subcomponent) when
/// tagged - with the ops table compared by allocation, so a driver removes
/// exactly the component it registered. The registry does not police double
/// registration beyond lookup order; registering the same identity twice is
/// a caller bug.
pub(crate) struct Component {
    pub(crate) dev: DeviceId,
    pub(crate) ops: Arc<dyn ComponentOps>,
    /// Nonzero tag distinguishing multiple components on one device.
    pub(crate) subcomponent: u32,
    /// True between a successful bind and the matching unbind.
    pub(crate) bound: bool,
    /// The aggregate device currently claiming this component, if any.
    pub(crate) aggregate: Option<AggregateId>,
    /// Dependency link recorded when claimed.
    pub(crate) link: Option<LinkId>,
    /// Resource group on this component's own device, kept while bound.
    pub(crate) group: Option<GroupId>,
}

impl Component {
    pub(crate) fn new(dev: DeviceId, ops: Arc<dyn ComponentOps>, subcomponent: u32) -> Self {
        Self {
            dev,
            ops,
            subcomponent,
            bound: false,
            aggregate: None,
            link: None,
            group: None,
        }
    }

    pub(crate) fn is(&self, dev: DeviceId, ops: &Arc<dyn ComponentOps>) -> bool {
        self.dev == dev && Arc::ptr_eq(&self.ops, ops)
    }
}
