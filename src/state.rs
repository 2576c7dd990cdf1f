//! Per-group aggregation state.
//!
//! [`GroupStore`] is an arena of states keyed by [`GroupKey`]. Slots
//! are appended the first time a group is seen and never removed, so
//! iteration order is first-insertion order. That order is what breaks
//! ties between groups during a store-wide flush, which keeps output
//! deterministic for identical input.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use seahash::SeaHasher;

use crate::point::GroupKey;

/// Behavior every per-group state must provide to live in a
/// [`GroupStore`].
pub trait GroupState {
    /// Clear accumulated data in place, keeping configuration.
    fn reset(&mut self);
}

pub struct GroupStore<S> {
    slots: Vec<(GroupKey, S)>,
    // Seeded hasher so lookups don't depend on per-process random
    // state.
    index: HashMap<GroupKey, usize, BuildHasherDefault<SeaHasher>>,
}

impl<S> Default for GroupStore<S> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::default(),
        }
    }
}

impl<S: GroupState> GroupStore<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from entries in their original insertion order.
    ///
    /// A key repeated later in `entries` replaces the earlier state but
    /// keeps the earlier slot.
    pub fn from_entries(entries: impl IntoIterator<Item = (GroupKey, S)>) -> Self {
        let mut store = Self::new();
        for (key, state) in entries {
            match store.index.get(&key) {
                Some(&slot) => store.slots[slot].1 = state,
                None => {
                    store.index.insert(key.clone(), store.slots.len());
                    store.slots.push((key, state));
                }
            }
        }
        store
    }

    /// Return the state for `key`, building it with `init` the first
    /// time the group is seen.
    pub fn get_or_create(&mut self, key: &GroupKey, init: impl FnOnce() -> S) -> &mut S {
        let slot = match self.index.get(key) {
            Some(&slot) => slot,
            None => {
                let slot = self.slots.len();
                tracing::debug!(group = %key, slot, "tracking new group");
                self.index.insert(key.clone(), slot);
                self.slots.push((key.clone(), init()));
                slot
            }
        };
        &mut self.slots[slot].1
    }

    pub fn get(&self, key: &GroupKey) -> Option<&S> {
        self.index.get(key).map(|&slot| &self.slots[slot].1)
    }

    pub fn get_mut(&mut self, key: &GroupKey) -> Option<&mut S> {
        self.index.get(key).map(|&slot| &mut self.slots[slot].1)
    }

    /// Clear one group's state in place. Returns `false` if the group
    /// was never seen.
    pub fn reset(&mut self, key: &GroupKey) -> bool {
        match self.get_mut(key) {
            Some(state) => {
                state.reset();
                true
            }
            None => false,
        }
    }

    /// Visit every group in first-insertion order.
    pub fn for_each(&mut self, mut f: impl FnMut(&GroupKey, &mut S)) {
        for (key, state) in self.slots.iter_mut() {
            f(key, state);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &S)> {
        self.slots.iter().map(|(key, state)| (key, state))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
