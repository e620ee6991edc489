//! Match lists - the declarative description of what an aggregate needs.
//!
//! An aggregate driver assembles a [`MatchList`] of criteria before
//! registering itself. Each entry carries a comparator that recognizes one
//! required component by its device identity (and optionally its
//! subcomponent tag). Entries resolve strictly left to right when the
//! registry scans for candidates; see the matching loop in the registry.

use alloc::boxed::Box;

use crate::component::ComponentId;
use crate::{AggregateError, DeviceId, Result};

/// Match lists grow in batches to amortize allocation.
pub const MATCH_ALLOC_BATCH: usize = 16;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Comparator for one match entry.
pub(crate) enum MatchRule {
    /// Matches on device identity alone, regardless of subcomponent tag.
    Device(Box<dyn Fn(&DeviceId) -> bool + Send>),
    /// Matches on device identity plus the component's subcomponent tag.
    Subcomponent(Box<dyn Fn(&DeviceId, u32) -> bool + Send>),
}

/// One criterion in an aggregate's match list.
pub(crate) struct MatchEntry {
    rule: MatchRule,
    release: Option<ReleaseFn>,
    /// The component this entry resolved to, while pending none.
    pub(crate) component: Option<ComponentId>,
    /// Set when the resolved component was already attached, meaning an
    /// earlier entry of the same aggregate claimed it. Duplicate entries are
    /// present but never bound a second time.
    pub(crate) duplicate: bool,
}

impl MatchEntry {
    pub(crate) fn matches(&self, dev: &DeviceId, subcomponent: u32) -> bool {
        match &self.rule {
            MatchRule::Device(compare) => compare(dev),
            MatchRule::Subcomponent(compare) => compare(dev, subcomponent),
        }
    }
}

/// Ordered list of match criteria, owned by one aggregate device (or by the
/// driver still assembling it).
#[derive(Default)]
pub struct MatchList {
    entries: alloc::vec::Vec<MatchEntry>,
}

impl MatchList {
    pub fn new() -> Self {
        Self {
            entries: alloc::vec::Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a match entry recognizing a component by its device identity.
    ///
    /// This only matches components registered without a subcomponent tag or
    /// with one - the comparator sees the device identity alone.
    ///
    /// # Errors
    /// Returns [`AggregateError::AllocationFailure`] if the list cannot grow.
    pub fn add(&mut self, compare: impl Fn(&DeviceId) -> bool + Send + 'static) -> Result<()> {
        self.push(MatchRule::Device(Box::new(compare)), None)
    }

    /// Like [`add`](Self::add), with a release hook run when the match list
    /// is dropped. Used when the comparator borrows a reference-counted
    /// description that must be put back explicitly.
    pub fn add_with_release(
        &mut self,
        compare: impl Fn(&DeviceId) -> bool + Send + 'static,
        release: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.push(MatchRule::Device(Box::new(compare)), Some(Box::new(release)))
    }

    /// Add a match entry recognizing a tagged component. The comparator
    /// additionally sees the component's subcomponent tag, letting one
    /// device satisfy several entries with distinct tags.
    pub fn add_typed(
        &mut self,
        compare: impl Fn(&DeviceId, u32) -> bool + Send + 'static,
    ) -> Result<()> {
        self.push(MatchRule::Subcomponent(Box::new(compare)), None)
    }

    /// Convenience entry matching exactly one device identity.
    pub fn add_device(&mut self, dev: DeviceId) -> Result<()> {
        self.add(move |candidate| *candidate == dev)
    }

    fn push(&mut self, rule: MatchRule, release: Option<ReleaseFn>) -> Result<()> {
        if self.entries.len() == self.entries.capacity() {
            self.entries
                .try_reserve_exact(MATCH_ALLOC_BATCH)
                .map_err(|_| AggregateError::AllocationFailure {
                    requested: self.entries.len() + MATCH_ALLOC_BATCH,
                })?;
        }
        self.entries.push(MatchEntry {
            rule,
            release,
            component: None,
            duplicate: false,
        });
        Ok(())
    }

    /// Give back the slack left by batched growth once the list is final.
    pub(crate) fn shrink(&mut self) {
        self.entries.shrink_to_fit();
    }

    pub(crate) fn entries(&self) -> &[MatchEntry] {
        &self.entries
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut MatchEntry {
        &mut self.entries[index]
    }
}

impl Drop for MatchList {
    fn drop(&mut self) {
        for entry in &mut self.entries {
            if let Some(release) = entry.release.take() {
                release();
            }
        }
    }
}

impl core::fmt::Debug for MatchList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MatchList")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_in_batches() {
        let mut list = MatchList::new();
        for _ in 0..MATCH_ALLOC_BATCH {
            list.add(|_| true).unwrap();
        }
        let first_batch = list.entries.capacity();
        assert!(first_batch >= MATCH_ALLOC_BATCH);

        list.add(|_| true).unwrap();
        assert!(list.entries.capacity() >= first_batch + MATCH_ALLOC_BATCH);
        assert_eq!(list.len(), MATCH_ALLOC_BATCH + 1);
    }

    #[test]
    fn test_shrink_gives_back_slack() {
        let mut list = MatchList::new();
        list.add(|_| true).unwrap();
        list.shrink();
        assert_eq!(list.entries.capacity(), 1);
    }

    #[test]
    fn test_device_rule_ignores_subcomponent() {
        let mut list = MatchList::new();
        list.add_device(DeviceId::Serial { port: 0 }).unwrap();

        let entry = &list.entries()[0];
        assert!(entry.matches(&DeviceId::Serial { port: 0 }, 0));
        assert!(entry.matches(&DeviceId::Serial { port: 0 }, 7));
        assert!(!entry.matches(&DeviceId::Serial { port: 1 }, 0));
    }

    #[test]
    fn test_typed_rule_sees_subcomponent() {
        let mut list = MatchList::new();
        list.add_typed(|dev, sub| *dev == DeviceId::Serial { port: 0 } && sub == 2)
            .unwrap();

        let entry = &list.entries()[0];
        assert!(entry.matches(&DeviceId::Serial { port: 0 }, 2));
        assert!(!entry.matches(&DeviceId::Serial { port: 0 }, 1));
        assert!(!entry.matches(&DeviceId::Serial { port: 1 }, 2));
    }

    #[test]
    fn test_release_hooks_run_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicUsize::new(0));
        {
            let mut list = MatchList::new();
            for _ in 0..3 {
                let released = released.clone();
                list.add_with_release(
                    |_| true,
                    move || {
                        released.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .unwrap();
            }
            list.add(|_| true).unwrap();
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }
}
