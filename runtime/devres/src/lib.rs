//! Scoped resource tracking for device teardown.
//!
//! # Purpose
//! Drivers acquire resources (mappings, allocations, registrations) while
//! binding against a device and must give all of them back when the device
//! goes away. Instead of every driver hand-writing teardown paths, a
//! [`ResourceStack`] records a release action per acquired resource and
//! replays them in reverse order on release.
//!
//! # Groups
//! Release actions can be bracketed into *groups*. A group collects every
//! action registered between [`ResourceStack::open_group`] and
//! [`ResourceStack::close_group`] so that one failed initialization step can
//! be rolled back ([`ResourceStack::release_group`]) without disturbing
//! resources acquired before it. A successfully completed step can instead
//! dissolve its group markers ([`ResourceStack::remove_group`]), merging the
//! actions into the enclosing scope.
//!
//! # Testing Strategy
//! - Unit tests: release ordering, group open/close/remove/release nesting

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use log::{debug, warn};

/// Identifier for a resource group opened on one [`ResourceStack`].
///
/// Ids are unique per stack for its lifetime; they are never reused, so a
/// stale id simply fails to resolve instead of aliasing a newer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u64);

type ReleaseAction = Box<dyn FnOnce() + Send>;

enum Entry {
    /// A registered teardown action, run exactly once on release.
    Action(ReleaseAction),
    /// Start marker of a group.
    Open(GroupId),
    /// End marker of a closed group.
    Close(GroupId),
}

/// One device's pile of pending release actions, newest last.
///
/// Releases always run newest-first, mirroring the reverse of acquisition
/// order.
#[derive(Default)]
pub struct ResourceStack {
    entries: Vec<Entry>,
    next_group: u64,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_group: 0,
        }
    }

    /// Number of registered release actions (group markers excluded).
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Action(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a teardown action for a resource just acquired.
    pub fn add_action(&mut self, action: impl FnOnce() + Send + 'static) {
        self.entries.push(Entry::Action(Box::new(action)));
    }

    /// Open a new group. Actions registered from now on belong to it until
    /// [`close_group`](Self::close_group) is called with the returned id.
    pub fn open_group(&mut self) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        self.entries.push(Entry::Open(id));
        id
    }

    /// Close a group so that later actions land outside of it.
    ///
    /// Closing an unknown or already-closed group is a caller bug; it is
    /// logged and ignored.
    pub fn close_group(&mut self, id: GroupId) {
        if self.find_open(id).is_none() {
            warn!("close_group: no open group {:?}", id);
            return;
        }
        self.entries.push(Entry::Close(id));
    }

    /// Dissolve a group, keeping its actions.
    ///
    /// The markers are removed and the group's actions become part of the
    /// enclosing scope, to be released with it.
    pub fn remove_group(&mut self, id: GroupId) {
        if self.find_open(id).is_none() {
            warn!("remove_group: no group {:?}", id);
            return;
        }
        self.entries.retain(|e| match e {
            Entry::Open(g) | Entry::Close(g) => *g != id,
            Entry::Action(_) => true,
        });
    }

    /// Release a group: run all of its actions newest-first and remove them
    /// together with the group markers.
    ///
    /// An unclosed group extends to the top of the stack.
    pub fn release_group(&mut self, id: GroupId) {
        let Some(start) = self.find_open(id) else {
            warn!("release_group: no group {:?}", id);
            return;
        };
        let end = self
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Close(g) if *g == id))
            .map(|close| close + 1)
            .unwrap_or(self.entries.len());

        debug!("releasing group {:?} ({} entries)", id, end - start);
        let released: Vec<Entry> = self.entries.drain(start..end).collect();
        Self::run(released);
    }

    /// Release everything on the stack, newest-first.
    pub fn release_all(&mut self) {
        let released: Vec<Entry> = self.entries.drain(..).collect();
        Self::run(released);
    }

    fn run(entries: Vec<Entry>) {
        for entry in entries.into_iter().rev() {
            if let Entry::Action(action) = entry {
                action();
            }
        }
    }

    fn find_open(&self, id: GroupId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, Entry::Open(g) if *g == id))
    }
}

impl Drop for ResourceStack {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>) {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |tag: &'static str| -> Box<dyn FnOnce() + Send> {
            let log = log2.clone();
            Box::new(move || log.lock().unwrap().push(tag))
        };
        (log, make)
    }

    #[test]
    fn test_release_all_runs_newest_first() {
        let (log, act) = recorder();
        let mut stack = ResourceStack::new();
        stack.add_action(act("a"));
        stack.add_action(act("b"));
        stack.add_action(act("c"));

        stack.release_all();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_release_group_only_touches_group() {
        let (log, act) = recorder();
        let mut stack = ResourceStack::new();
        stack.add_action(act("outer"));
        let group = stack.open_group();
        stack.add_action(act("g1"));
        stack.add_action(act("g2"));
        stack.close_group(group);
        stack.add_action(act("after"));

        stack.release_group(group);
        assert_eq!(*log.lock().unwrap(), vec!["g2", "g1"]);
        assert_eq!(stack.len(), 2);

        stack.release_all();
        assert_eq!(*log.lock().unwrap(), vec!["g2", "g1", "after", "outer"]);
    }

    #[test]
    fn test_unclosed_group_extends_to_top() {
        let (log, act) = recorder();
        let mut stack = ResourceStack::new();
        stack.add_action(act("outer"));
        let group = stack.open_group();
        stack.add_action(act("g1"));
        stack.add_action(act("g2"));

        stack.release_group(group);
        assert_eq!(*log.lock().unwrap(), vec!["g2", "g1"]);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_remove_group_keeps_actions() {
        let (log, act) = recorder();
        let mut stack = ResourceStack::new();
        let outer = stack.open_group();
        stack.add_action(act("o1"));
        let inner = stack.open_group();
        stack.add_action(act("i1"));
        stack.close_group(inner);
        stack.close_group(outer);

        // Dissolving the inner group must not run anything.
        stack.remove_group(inner);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(stack.len(), 2);

        // Its actions now belong to the outer group.
        stack.release_group(outer);
        assert_eq!(*log.lock().unwrap(), vec!["i1", "o1"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_nested_group_release_inside_out() {
        let (log, act) = recorder();
        let mut stack = ResourceStack::new();
        let outer = stack.open_group();
        stack.add_action(act("o1"));
        let inner = stack.open_group();
        stack.add_action(act("i1"));
        stack.close_group(inner);
        stack.add_action(act("o2"));
        stack.close_group(outer);

        // Releasing the outer group takes the inner one with it.
        stack.release_group(outer);
        assert_eq!(*log.lock().unwrap(), vec!["o2", "i1", "o1"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_unknown_group_is_ignored() {
        let (log, act) = recorder();
        let mut stack = ResourceStack::new();
        stack.add_action(act("a"));
        let group = stack.open_group();
        stack.close_group(group);
        stack.release_group(group);

        // Second release resolves nothing and must not fire "a".
        stack.release_group(group);
        stack.remove_group(group);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_drop_releases_everything() {
        let (log, act) = recorder();
        {
            let mut stack = ResourceStack::new();
            stack.add_action(act("a"));
            let _group = stack.open_group();
            stack.add_action(act("b"));
        }
        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_group_ids_not_reused() {
        let mut stack = ResourceStack::new();
        let first = stack.open_group();
        stack.close_group(first);
        stack.release_group(first);
        let second = stack.open_group();
        assert_ne!(first, second);
    }
}
