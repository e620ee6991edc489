//! Component aggregation - assembling one logical device out of sub-devices
//!
//! # Purpose
//! A logical device is often spread across several sub-devices, each bound by
//! its own low-level driver in an unspecified order (a display controller
//! split into scanout engines, blending blocks and output transcoders is the
//! classic case). The aggregation layer lets a coordinating driver declare
//! the set of components it needs and only assembles it once every one of
//! them has shown up, tearing the whole thing down again if any member
//! disappears.
//!
//! # Architecture
//! - Sub-device drivers announce themselves with [`Registry::add_component`].
//! - An aggregate driver describes its needs in a [`MatchList`] and registers
//!   them with [`Registry::register_aggregate`].
//! - Every registry mutation rescans the pending aggregate devices; a fully
//!   matched aggregate is probed, and its probe binds all matched components
//!   in match-list order through [`AggregateContext::bind_all`], rolling back
//!   on partial failure.
//! - Removing a component while its aggregate is assembled forces the whole
//!   aggregate apart again, unbinding in reverse order.
//!
//! All registry, match and bind state is serialized by one coarse lock per
//! [`Registry`]. Registration and removal are boot-time/hotplug-time events,
//! so the lock favors correctness over throughput. Component and aggregate
//! driver callbacks run with that lock held: they must not call back into
//! the same registry or they will deadlock.
//!
//! # Testing Strategy
//! - Unit tests: match-list resolution, registry bookkeeping, link flags
//! - Integration tests: full bind/unbind lifecycles with recording drivers

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

mod bind;
mod bus;
mod component;
mod debug;
mod device;
mod link;
mod matching;
mod ops;
mod registry;
mod resource;

pub use bind::AggregateContext;
pub use device::{AggregateId, BindState, RuntimePm};
pub use link::LinkFlags;
pub use matching::{MatchList, MATCH_ALLOC_BATCH};
pub use ops::{AggregateDriver, BindContext, ComponentOps, MasterOps};
pub use registry::Registry;

use thiserror::Error;

/// Error types for component and aggregate operations
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Matching is incomplete. This is the normal pending state of an
    /// aggregate device, not a failure; the next registry event retries.
    #[error("aggregate not ready: unresolved component matches remain")]
    NotReady,

    /// A component cannot bind yet because one of its own dependencies is
    /// missing. Expected and retryable; suppressed from error logs.
    #[error("component dependency not ready, deferring bind")]
    DeferredDependency,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Growing a match list failed.
    #[error("allocation failed (requested: {requested} entries)")]
    AllocationFailure { requested: usize },

    /// A component driver's bind callback failed for a reason of its own.
    #[error("component driver error: {0}")]
    Driver(alloc::string::String),
}

pub type Result<T> = core::result::Result<T, AggregateError>;

/// Device identifier, the identity components and aggregates hang off
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceId {
    /// PCI device by vendor and device ID
    Pci { vendor: u16, device: u16 },

    /// Platform device by name (from device tree)
    Platform { name: &'static str },

    /// Serial console (UART)
    Serial { port: u8 },
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeviceId::Pci { vendor, device } => write!(f, "pci:{:04x}:{:04x}", vendor, device),
            DeviceId::Platform { name } => write!(f, "{}", name),
            DeviceId::Serial { port } => write!(f, "serial{}", port),
        }
    }
}

static_assertions::assert_impl_all!(Registry: Send, Sync);
static_assertions::assert_impl_all!(DeviceId: Copy, Ord);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let pci = DeviceId::Pci {
            vendor: 0x8086,
            device: 0x100E,
        };
        assert_eq!(format!("{}", pci), "pci:8086:100e");

        let platform = DeviceId::Platform { name: "scanout0" };
        assert_eq!(format!("{}", platform), "scanout0");

        let serial = DeviceId::Serial { port: 1 };
        assert_eq!(format!("{}", serial), "serial1");
    }

    #[test]
    fn test_device_id_equality() {
        let dev1 = DeviceId::Platform { name: "blender" };
        let dev2 = DeviceId::Platform { name: "blender" };
        let dev3 = DeviceId::Platform { name: "transcoder" };

        assert_eq!(dev1, dev2);
        assert_ne!(dev1, dev3);
    }
}
