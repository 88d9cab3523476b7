use std::collections::HashMap;

use ahash::RandomState;

use crate::EntityId;

/// Handle to one refinement set in a [`RefinementStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefinementsId(u32);

impl RefinementsId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Refined entity to the refinement module active for it.
pub type RefinementSet = HashMap<EntityId, EntityId, RandomState>;

#[derive(Debug, Default)]
struct Slot {
    set: RefinementSet,
    /// scope frames currently pointing at this set
    holders: u32,
}

/// Storage for refinement sets. Scope frames only hold handles; a set with
/// more than one holder must be duplicated before it is mutated.
#[derive(Debug, Default)]
pub struct RefinementStore {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl RefinementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, slot: Slot) -> RefinementsId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                RefinementsId(index)
            }
            None => {
                self.slots.push(Some(slot));
                RefinementsId(self.slots.len() as u32 - 1)
            }
        }
    }

    /// An empty set with a single holder.
    pub fn allocate(&mut self) -> RefinementsId {
        self.insert(Slot {
            set: RefinementSet::default(),
            holders: 1,
        })
    }

    /// A copy of `id` with a single holder.
    pub fn duplicate(&mut self, id: RefinementsId) -> RefinementsId {
        let set = self.get(id).cloned().unwrap_or_default();
        self.insert(Slot { set, holders: 1 })
    }

    pub fn get(&self, id: RefinementsId) -> Option<&RefinementSet> {
        self.slots.get(id.index())?.as_ref().map(|slot| &slot.set)
    }

    pub fn get_mut(&mut self, id: RefinementsId) -> Option<&mut RefinementSet> {
        debug_assert!(self.holders(id) <= 1, "mutating a shared refinement set");
        self.slots
            .get_mut(id.index())?
            .as_mut()
            .map(|slot| &mut slot.set)
    }

    pub fn retain(&mut self, id: RefinementsId) {
        if let Some(Some(slot)) = self.slots.get_mut(id.index()) {
            slot.holders += 1;
        }
    }

    pub fn holders(&self, id: RefinementsId) -> u32 {
        match self.slots.get(id.index()) {
            Some(Some(slot)) => slot.holders,
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn reset_holders(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.holders = 0;
        }
    }

    pub(crate) fn add_holder(&mut self, id: RefinementsId) {
        self.retain(id);
    }

    /// Frees every set nobody holds. Returns how many were freed.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if entry.as_ref().is_some_and(|slot| slot.holders == 0) {
                *entry = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_copies_contents_without_sharing() {
        let mut store = RefinementStore::new();
        let original = store.allocate();
        store
            .get_mut(original)
            .expect("live")
            .insert(EntityId(3), EntityId(9));

        let copy = store.duplicate(original);
        store
            .get_mut(copy)
            .expect("live")
            .insert(EntityId(4), EntityId(10));

        assert_eq!(store.get(original).map(|set| set.len()), Some(1));
        assert_eq!(store.get(copy).map(|set| set.len()), Some(2));
        assert_eq!(store.holders(copy), 1);
    }

    #[test]
    fn sweep_frees_unheld_sets_for_reuse() {
        let mut store = RefinementStore::new();
        let kept = store.allocate();
        let dropped = store.allocate();
        store.reset_holders();
        store.add_holder(kept);
        assert_eq!(store.sweep(), 1);
        assert!(store.get(dropped).is_none());
        assert_eq!(store.len(), 1);

        let reused = store.allocate();
        assert_eq!(reused, dropped);
    }
}
