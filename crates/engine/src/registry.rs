use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::entity::EntityId;

/// Context state that can be dropped once it is back at baseline.
pub trait TrackedContext {
    /// True when no counter or persisted field carries information.
    fn is_vacant(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Keep,
    Deactivate,
    Evict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Active,
    Dormant,
    Evicted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub visited: usize,
    pub kept: usize,
    pub deactivated: usize,
    pub evicted: usize,
    pub orphans_healed: usize,
}

/// Per-entity contexts of one kind plus the subset needing scheduled work.
///
/// Every active key has a context in the primary map. Mutation during a
/// sweep is collected and applied once the sweep has visited every key.
#[derive(Debug)]
pub struct ContextRegistry<V> {
    kind: &'static str,
    contexts: HashMap<EntityId, V>,
    active: HashSet<EntityId>,
}

impl<V> ContextRegistry<V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            contexts: HashMap::new(),
            active: HashSet::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Returns the context and whether it already existed. A new context is
    /// not marked active.
    pub fn get_or_create(&mut self, key: EntityId) -> (&mut V, bool)
    where
        V: Default,
    {
        match self.contexts.entry(key) {
            Entry::Occupied(entry) => (entry.into_mut(), true),
            Entry::Vacant(entry) => (entry.insert(V::default()), false),
        }
    }

    pub fn insert(&mut self, key: EntityId, context: V) -> Option<V> {
        self.contexts.insert(key, context)
    }

    pub fn get(&self, key: EntityId) -> Option<&V> {
        self.contexts.get(&key)
    }

    pub fn get_mut(&mut self, key: EntityId) -> Option<&mut V> {
        self.contexts.get_mut(&key)
    }

    pub fn contains(&self, key: EntityId) -> bool {
        self.contexts.contains_key(&key)
    }

    pub fn remove(&mut self, key: EntityId) -> Option<V> {
        self.active.remove(&key);
        self.contexts.remove(&key)
    }

    /// Returns false, leaving the index untouched, when `key` has no context.
    pub fn mark_active(&mut self, key: EntityId) -> bool {
        if !self.contexts.contains_key(&key) {
            warn!(kind = self.kind, entity = %key, "mark_active_without_context");
            return false;
        }
        self.active.insert(key);
        true
    }

    pub fn mark_inactive(&mut self, key: EntityId) -> bool {
        self.active.remove(&key)
    }

    pub fn is_active(&self, key: EntityId) -> bool {
        self.active.contains(&key)
    }

    /// Puts `key` in the active index when work is pending; otherwise takes
    /// it out and evicts the context if it has returned to baseline.
    pub fn settle(&mut self, key: EntityId, pending: bool) -> Residency
    where
        V: TrackedContext,
    {
        if pending {
            return if self.mark_active(key) {
                Residency::Active
            } else {
                Residency::Evicted
            };
        }

        self.active.remove(&key);
        match self.contexts.get(&key) {
            Some(context) if context.is_vacant() => {
                self.contexts.remove(&key);
                Residency::Evicted
            }
            Some(_) => Residency::Dormant,
            None => Residency::Evicted,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn keys_sorted(&self) -> Vec<EntityId> {
        let mut keys = self.contexts.keys().copied().collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    pub fn active_keys(&self) -> Vec<EntityId> {
        let mut keys = self.active.iter().copied().collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &V)> {
        self.contexts.iter().map(|(key, context)| (*key, context))
    }

    /// Visits a snapshot of the active index. Deactivations and evictions
    /// requested by `visit` are applied after the last visit.
    pub fn for_each_active<F>(&mut self, mut visit: F) -> SweepSummary
    where
        F: FnMut(EntityId, &mut V) -> SweepAction,
    {
        let snapshot = self.active_keys();
        let mut summary = SweepSummary::default();
        let mut deactivate = Vec::new();
        let mut evict = Vec::new();

        for key in snapshot {
            let Some(context) = self.contexts.get_mut(&key) else {
                warn!(kind = self.kind, entity = %key, "orphaned_active_entry");
                self.active.remove(&key);
                summary.orphans_healed += 1;
                continue;
            };

            summary.visited += 1;
            match visit(key, context) {
                SweepAction::Keep => summary.kept += 1,
                SweepAction::Deactivate => deactivate.push(key),
                SweepAction::Evict => evict.push(key),
            }
        }

        summary.deactivated = deactivate.len();
        summary.evicted = evict.len();
        for key in deactivate {
            self.active.remove(&key);
        }
        for key in evict {
            self.remove(key);
        }
        summary
    }

    /// Drops contexts for which `keep` returns false. Returns how many went.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(EntityId, &V) -> bool,
    {
        let before = self.contexts.len();
        self.contexts.retain(|key, context| keep(*key, context));
        let contexts = &self.contexts;
        self.active.retain(|key| contexts.contains_key(key));
        before - self.contexts.len()
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
        self.active.clear();
    }

    #[cfg(test)]
    pub(crate) fn force_active(&mut self, key: EntityId) {
        self.active.insert(key);
    }
}
