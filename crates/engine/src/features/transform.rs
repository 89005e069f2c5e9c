use std::fmt;

use chrono::TimeDelta;
use tracing::{debug, info};

use crate::entity::{EntityId, MobileHost};
use crate::registry::ContextRegistry;
use crate::scheduler::{Scheduler, TimerHandle};

pub const TRANSFORM_MOD_TAG: &str = "TransformSpell";
const DEFAULT_TICK_RATE: TimeDelta = TimeDelta::seconds(1);
const HUMANOID_BODIES: [u16; 7] = [0x190, 0x191, 0x192, 0x193, 0x25D, 0x25E, 0x3DB];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormId(pub u16);

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "form#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResistanceKind {
    Physical,
    Fire,
    Cold,
    Poison,
    Energy,
}

impl ResistanceKind {
    pub const ALL: [ResistanceKind; 5] = [
        Self::Physical,
        Self::Fire,
        Self::Cold,
        Self::Poison,
        Self::Energy,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResistanceMod {
    pub kind: ResistanceKind,
    pub offset: i32,
    pub tag: &'static str,
}

/// A shape a mobile can take: the graphics it wears, the resistances it
/// grants and how often its upkeep tick runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpec {
    pub form: FormId,
    pub body: u16,
    pub hue: u16,
    /// Offsets in `ResistanceKind::ALL` order.
    pub resistances: [i32; 5],
    pub tick_rate: TimeDelta,
}

impl TransformSpec {
    pub fn is_humanoid(&self) -> bool {
        HUMANOID_BODIES.contains(&self.body)
    }

    fn effective_tick_rate(&self) -> TimeDelta {
        if self.tick_rate > TimeDelta::zero() {
            self.tick_rate
        } else {
            DEFAULT_TICK_RATE
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformContext {
    pub spec: TransformSpec,
    pub timer: TimerHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastRefusal {
    UnknownEntity,
    Dead,
    /// Graphics are modified by something other than a transformation.
    ForeignBodyMod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOutcome {
    Applied,
    Replaced { previous: FormId },
    Reverted,
    Refused(CastRefusal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformTick {
    Continued,
    Ended,
    /// The timer no longer belongs to a live transformation.
    Stale,
}

/// Active transformations, one repeating upkeep timer per transformed
/// mobile. Every context is in the active index for as long as it exists.
#[derive(Debug)]
pub struct TransformSystem {
    registry: ContextRegistry<TransformContext>,
}

impl Default for TransformSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformSystem {
    pub fn new() -> Self {
        Self {
            registry: ContextRegistry::new("Transform"),
        }
    }

    pub fn context(&self, id: EntityId) -> Option<&TransformContext> {
        self.registry.get(id)
    }

    pub fn is_transformed(&self, id: EntityId) -> bool {
        self.registry.contains(id)
    }

    pub fn form(&self, id: EntityId) -> Option<FormId> {
        self.registry.get(id).map(|context| context.spec.form)
    }

    pub fn registry(&self) -> &ContextRegistry<TransformContext> {
        &self.registry
    }

    pub fn cast<T: Clone>(
        &mut self,
        id: EntityId,
        spec: &TransformSpec,
        host: &mut dyn MobileHost,
        scheduler: &mut Scheduler<T>,
        payload: T,
    ) -> CastOutcome {
        if !host.resolve(id) {
            return CastOutcome::Refused(CastRefusal::UnknownEntity);
        }
        if !host.is_alive(id) {
            return CastOutcome::Refused(CastRefusal::Dead);
        }

        let previous = self.form(id);
        if previous.is_none() && host.has_body_mod(id) {
            return CastOutcome::Refused(CastRefusal::ForeignBodyMod);
        }

        if let Some(previous) = previous {
            let same_form = previous == spec.form;
            self.remove(id, same_form, host, scheduler);
            if same_form {
                info!(entity = %id, form = %previous, "transform_reverted");
                return CastOutcome::Reverted;
            }
        }

        for (kind, offset) in ResistanceKind::ALL.into_iter().zip(spec.resistances) {
            if offset != 0 {
                host.add_resistance_mod(
                    id,
                    ResistanceMod {
                        kind,
                        offset,
                        tag: TRANSFORM_MOD_TAG,
                    },
                );
            }
        }
        if !spec.is_humanoid() {
            host.dismount(id);
        }
        host.set_body_mod(id, Some(spec.body));
        host.set_hue_mod(id, Some(spec.hue));

        let rate = spec.effective_tick_rate();
        let timer = scheduler.schedule_repeating(rate, rate, payload);
        self.registry.insert(
            id,
            TransformContext {
                spec: spec.clone(),
                timer,
            },
        );
        self.registry.mark_active(id);
        info!(entity = %id, form = %spec.form, tick_ms = rate.num_milliseconds(), "transform_applied");

        match previous {
            Some(previous) => CastOutcome::Replaced { previous },
            None => CastOutcome::Applied,
        }
    }

    /// Upkeep for the transformation owning `timer`. Ends the effect when
    /// the mobile is gone, dead, or no longer wears the form's graphics.
    pub fn on_tick<T: Clone>(
        &mut self,
        id: EntityId,
        timer: TimerHandle,
        host: &mut dyn MobileHost,
        scheduler: &mut Scheduler<T>,
    ) -> TransformTick {
        let Some(context) = self.registry.get(id).filter(|context| context.timer == timer) else {
            scheduler.cancel(timer);
            return TransformTick::Stale;
        };

        let spec = &context.spec;
        let intact = host.resolve(id)
            && host.is_alive(id)
            && host.body(id) == Some(spec.body)
            && host.hue(id) == Some(spec.hue);
        if !intact {
            debug!(entity = %id, form = %spec.form, "transform_broken");
            self.remove(id, true, host, scheduler);
            return TransformTick::Ended;
        }

        host.on_transform_tick(id, spec.form);
        TransformTick::Continued
    }

    /// Ends the transformation. Returns false when there was none, so the
    /// modifiers are only ever stripped once.
    pub fn remove<T: Clone>(
        &mut self,
        id: EntityId,
        reset_graphics: bool,
        host: &mut dyn MobileHost,
        scheduler: &mut Scheduler<T>,
    ) -> bool {
        let Some(context) = self.registry.remove(id) else {
            return false;
        };

        let stripped = host.remove_resistance_mods(id, TRANSFORM_MOD_TAG);
        if reset_graphics {
            host.set_hue_mod(id, None);
            host.set_body_mod(id, None);
        }
        scheduler.cancel(context.timer);
        info!(
            entity = %id,
            form = %context.spec.form,
            resistance_mods = stripped,
            "transform_removed"
        );
        true
    }

    /// Drops the context of a deleted mobile without touching the world.
    pub fn forget<T: Clone>(&mut self, id: EntityId, scheduler: &mut Scheduler<T>) -> bool {
        match self.registry.remove(id) {
            Some(context) => {
                scheduler.cancel(context.timer);
                true
            }
            None => false,
        }
    }
}
