//! Dependency links between an aggregate device and its claimed components.
//!
//! A link is the hint the platform's lifecycle and power management layers
//! need to know that the aggregate depends on the component's device. Links
//! carry no state of their own; they are dropped when the claiming side lets
//! go of the component or when the aggregate device is destroyed.

use bitflags::bitflags;

use crate::device::AggregateId;
use crate::DeviceId;

/// Stable handle into the registry's link arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LinkId(pub(crate) u32);

bitflags! {
    /// Properties of a dependency link.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkFlags: u32 {
        /// The link records the dependency only; no driver-presence state
        /// tracking is attached to it.
        const STATELESS = 1 << 0;
        /// Runtime power management follows the link: resuming the consumer
        /// keeps the supplier awake.
        const PM_RUNTIME = 1 << 1;
    }
}

/// A recorded aggregate-to-component dependency edge.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceLink {
    pub(crate) consumer: AggregateId,
    pub(crate) supplier: DeviceId,
    pub(crate) flags: LinkFlags,
}

impl DeviceLink {
    pub(crate) fn new(consumer: AggregateId, supplier: DeviceId) -> Self {
        Self {
            consumer,
            supplier,
            flags: LinkFlags::STATELESS | LinkFlags::PM_RUNTIME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_links_are_stateless_pm_aware() {
        let link = DeviceLink::new(AggregateId(0), DeviceId::Serial { port: 0 });
        assert!(link.flags.contains(LinkFlags::STATELESS));
        assert!(link.flags.contains(LinkFlags::PM_RUNTIME));
    }
}
