//! Per-device resource stacks, keyed by device identity.

use alloc::collections::BTreeMap;

use manifold_devres::ResourceStack;

use crate::DeviceId;

/// Lazily-created [`ResourceStack`] per device the registry has touched.
#[derive(Default)]
pub(crate) struct ResourceLedger {
    stacks: BTreeMap<DeviceId, ResourceStack>,
}

impl ResourceLedger {
    pub(crate) fn new() -> Self {
        Self {
            stacks: BTreeMap::new(),
        }
    }

    pub(crate) fn stack_mut(&mut self, dev: DeviceId) -> &mut ResourceStack {
        self.stacks.entry(dev).or_default()
    }
}
