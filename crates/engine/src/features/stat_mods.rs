use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::entity::EntityId;
use crate::registry::{ContextRegistry, Residency, TrackedContext};
use crate::scheduler::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stat {
    Str,
    Dex,
    Int,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Str => "Str",
            Self::Dex => "Dex",
            Self::Int => "Int",
        };
        f.write_str(label)
    }
}

pub fn bonus_name(stat: Stat) -> String {
    format!("[Magic] {stat} Buff")
}

pub fn curse_name(stat: Stat) -> String {
    format!("[Magic] {stat} Curse")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatMod {
    pub stat: Stat,
    pub offset: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub timer: Option<TimerHandle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatModContext {
    mods: BTreeMap<String, StatMod>,
}

impl StatModContext {
    pub fn get(&self, name: &str) -> Option<&StatMod> {
        self.mods.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StatMod)> {
        self.mods.iter().map(|(name, stat_mod)| (name.as_str(), stat_mod))
    }

    fn has_timed_mods(&self) -> bool {
        self.mods.values().any(|stat_mod| stat_mod.timer.is_some())
    }
}

impl TrackedContext for StatModContext {
    fn is_vacant(&self) -> bool {
        self.mods.is_empty()
    }
}

/// Named stat offsets per mobile. A mod with a duration owns a one-shot
/// timer; the active index holds mobiles with at least one such mod.
#[derive(Debug)]
pub struct StatModSystem {
    registry: ContextRegistry<StatModContext>,
}

impl Default for StatModSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl StatModSystem {
    pub fn new() -> Self {
        Self {
            registry: ContextRegistry::new("StatMods"),
        }
    }

    pub fn registry(&self) -> &ContextRegistry<StatModContext> {
        &self.registry
    }

    pub fn get(&self, id: EntityId, name: &str) -> Option<&StatMod> {
        self.registry.get(id)?.get(name)
    }

    /// Sum of every mod on `stat`.
    pub fn offset(&self, id: EntityId, stat: Stat) -> i32 {
        self.registry.get(id).map_or(0, |context| {
            context
                .mods
                .values()
                .filter(|stat_mod| stat_mod.stat == stat)
                .fold(0i32, |total, stat_mod| total.saturating_add(stat_mod.offset))
        })
    }

    /// Applies a buff of `bonus` points unless an equal or stronger one is
    /// already in place.
    pub fn add_stat_bonus<T: Clone>(
        &mut self,
        id: EntityId,
        stat: Stat,
        bonus: i32,
        duration: TimeDelta,
        scheduler: &mut Scheduler<T>,
        payload: impl FnOnce(&str) -> T,
    ) -> bool {
        let name = bonus_name(stat);
        if self.get(id, &name).is_some_and(|existing| existing.offset >= bonus) {
            return false;
        }
        self.add_stat_mod(id, name, stat, bonus, duration, scheduler, payload);
        true
    }

    /// Applies a curse of `curse` points unless an equal or stronger one is
    /// already in place.
    pub fn add_stat_curse<T: Clone>(
        &mut self,
        id: EntityId,
        stat: Stat,
        curse: i32,
        duration: TimeDelta,
        scheduler: &mut Scheduler<T>,
        payload: impl FnOnce(&str) -> T,
    ) -> bool {
        let malus = curse.saturating_neg();
        let name = curse_name(stat);
        if self.get(id, &name).is_some_and(|existing| existing.offset <= malus) {
            return false;
        }
        self.add_stat_mod(id, name, stat, malus, duration, scheduler, payload);
        true
    }

    /// Positive offsets become a bonus, negative ones a curse. Zero is a
    /// no-op that still reports success.
    pub fn add_stat_offset<T: Clone>(
        &mut self,
        id: EntityId,
        stat: Stat,
        offset: i32,
        duration: TimeDelta,
        scheduler: &mut Scheduler<T>,
        payload: impl FnOnce(&str) -> T,
    ) -> bool {
        if offset > 0 {
            self.add_stat_bonus(id, stat, offset, duration, scheduler, payload)
        } else if offset < 0 {
            self.add_stat_curse(id, stat, offset.saturating_neg(), duration, scheduler, payload)
        } else {
            true
        }
    }

    /// Installs `name`, replacing any mod with the same name. A zero or
    /// negative duration makes the mod permanent.
    #[allow(clippy::too_many_arguments)]
    pub fn add_stat_mod<T: Clone>(
        &mut self,
        id: EntityId,
        name: String,
        stat: Stat,
        offset: i32,
        duration: TimeDelta,
        scheduler: &mut Scheduler<T>,
        payload: impl FnOnce(&str) -> T,
    ) -> Residency {
        self.remove_stat_mod(id, &name, scheduler);

        let (expires_at, timer) = if duration > TimeDelta::zero() {
            let timer = scheduler.schedule(duration, payload(&name));
            (Some(scheduler.now() + duration), Some(timer))
        } else {
            (None, None)
        };
        debug!(entity = %id, name = %name, offset, "stat_mod_added");

        let (context, _) = self.registry.get_or_create(id);
        context.mods.insert(
            name,
            StatMod {
                stat,
                offset,
                expires_at,
                timer,
            },
        );
        let pending = context.has_timed_mods();
        self.registry.settle(id, pending)
    }

    pub fn remove_stat_mod<T: Clone>(
        &mut self,
        id: EntityId,
        name: &str,
        scheduler: &mut Scheduler<T>,
    ) -> bool {
        let Some(context) = self.registry.get_mut(id) else {
            return false;
        };
        let Some(removed) = context.mods.remove(name) else {
            return false;
        };
        if let Some(timer) = removed.timer {
            scheduler.cancel(timer);
        }
        let pending = context.has_timed_mods();
        self.registry.settle(id, pending);
        true
    }

    /// Drops the mod `name` when `timer` still belongs to it.
    pub fn on_expired(&mut self, id: EntityId, name: &str, timer: TimerHandle) -> bool {
        let Some(context) = self.registry.get_mut(id) else {
            return false;
        };
        if context.get(name).map(|stat_mod| stat_mod.timer) != Some(Some(timer)) {
            return false;
        }
        context.mods.remove(name);
        let pending = context.has_timed_mods();
        self.registry.settle(id, pending);
        debug!(entity = %id, name, "stat_mod_expired");
        true
    }

    pub fn clear<T: Clone>(&mut self, id: EntityId, scheduler: &mut Scheduler<T>) -> usize {
        let Some(context) = self.registry.remove(id) else {
            return 0;
        };
        for timer in context.mods.values().filter_map(|stat_mod| stat_mod.timer) {
            scheduler.cancel(timer);
        }
        context.mods.len()
    }
}
