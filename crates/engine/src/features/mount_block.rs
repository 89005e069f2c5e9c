use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::entity::EntityId;
use crate::registry::{ContextRegistry, Residency, TrackedContext};
use crate::scheduler::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountBlockReason {
    Dazed,
    BolaRecovery,
    DismountRecovery,
}

impl fmt::Display for MountBlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Dazed => "dazed",
            Self::BolaRecovery => "bola_recovery",
            Self::DismountRecovery => "dismount_recovery",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountBlock {
    pub reason: MountBlockReason,
    /// `None` blocks until cleared.
    pub expires_at: Option<DateTime<Utc>>,
    pub timer: Option<TimerHandle>,
}

impl MountBlock {
    pub fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// A block leaves the registry only when cleared or when its timer fires.
impl TrackedContext for MountBlock {
    fn is_vacant(&self) -> bool {
        false
    }
}

/// Temporary bans on mounting, one per mobile. Timed blocks own a one-shot
/// timer and sit in the active index until it fires.
#[derive(Debug)]
pub struct MountBlockSystem {
    registry: ContextRegistry<MountBlock>,
}

impl Default for MountBlockSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MountBlockSystem {
    pub fn new() -> Self {
        Self {
            registry: ContextRegistry::new("MountBlock"),
        }
    }

    pub fn registry(&self) -> &ContextRegistry<MountBlock> {
        &self.registry
    }

    pub fn block(&self, id: EntityId) -> Option<&MountBlock> {
        self.registry.get(id)
    }

    pub fn reason(&self, id: EntityId, now: DateTime<Utc>) -> Option<MountBlockReason> {
        self.registry
            .get(id)
            .filter(|block| block.is_blocking(now))
            .map(|block| block.reason)
    }

    /// Installs a block unless the current one already lasts at least as
    /// long. `duration` of `None` blocks indefinitely. Returns whether the
    /// block was installed.
    pub fn set_block<T: Clone>(
        &mut self,
        id: EntityId,
        reason: MountBlockReason,
        duration: Option<TimeDelta>,
        scheduler: &mut Scheduler<T>,
        payload: T,
    ) -> bool {
        let now = scheduler.now();
        let replace = match self.registry.get(id) {
            None => true,
            Some(existing) if !existing.is_blocking(now) => true,
            Some(existing) => match (existing.expires_at, duration) {
                (None, _) | (Some(_), None) => true,
                (Some(expires_at), Some(duration)) => expires_at < now + duration,
            },
        };
        if !replace {
            return false;
        }

        self.clear_block(id, scheduler);
        let (expires_at, timer) = match duration {
            Some(duration) => (
                Some(now + duration),
                Some(scheduler.schedule(duration, payload)),
            ),
            None => (None, None),
        };
        self.registry.insert(
            id,
            MountBlock {
                reason,
                expires_at,
                timer,
            },
        );
        self.registry.settle(id, timer.is_some());
        debug!(entity = %id, reason = %reason, indefinite = expires_at.is_none(), "mount_block_set");
        true
    }

    pub fn clear_block<T: Clone>(&mut self, id: EntityId, scheduler: &mut Scheduler<T>) -> bool {
        match self.registry.remove(id) {
            Some(block) => {
                if let Some(timer) = block.timer {
                    scheduler.cancel(timer);
                }
                true
            }
            None => false,
        }
    }

    /// Lifts the block owned by `timer`. Timers of replaced blocks are
    /// ignored.
    pub fn on_expired(&mut self, id: EntityId, timer: TimerHandle) -> Residency {
        let current = self
            .registry
            .get(id)
            .is_some_and(|block| block.timer == Some(timer));
        if !current {
            return if self.registry.is_active(id) {
                Residency::Active
            } else if self.registry.contains(id) {
                Residency::Dormant
            } else {
                Residency::Evicted
            };
        }

        self.registry.remove(id);
        debug!(entity = %id, "mount_block_expired");
        Residency::Evicted
    }
}
