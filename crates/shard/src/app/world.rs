use std::collections::BTreeMap;

use engine::features::transform::{FormId, ResistanceMod};
use engine::{DecayEngine, EntityId, EntityResolver, LifecycleEvent, MobileHost, ShardWorld};
use tracing::debug;

use super::config::RosterEntry;

#[derive(Debug, Clone, Default)]
struct Mobile {
    base_body: u16,
    body_mod: Option<u16>,
    hue_mod: Option<u16>,
    alive: bool,
    mounted: bool,
    resistance_mods: Vec<ResistanceMod>,
}

/// In-process stand-in for the live mobile world. Connection changes are
/// queued here and handed to the engine at the start of each step.
#[derive(Debug, Default)]
pub(crate) struct WorldState {
    mobiles: BTreeMap<EntityId, Mobile>,
    pending: Vec<LifecycleEvent>,
}

impl WorldState {
    pub(crate) fn from_roster(roster: &[RosterEntry]) -> Self {
        let mut world = Self::default();
        for entry in roster {
            let id = EntityId(entry.id);
            world.spawn(id, entry.body);
            if entry.online {
                world.connect(id);
            }
        }
        world
    }

    pub(crate) fn spawn(&mut self, id: EntityId, body: u16) {
        self.mobiles.insert(
            id,
            Mobile {
                base_body: body,
                alive: true,
                ..Mobile::default()
            },
        );
    }

    pub(crate) fn connect(&mut self, id: EntityId) -> bool {
        if !self.mobiles.contains_key(&id) {
            return false;
        }
        self.pending.push(LifecycleEvent::Connected(id));
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.mobiles.len()
    }
}

impl EntityResolver for WorldState {
    fn resolve(&self, id: EntityId) -> bool {
        self.mobiles.contains_key(&id)
    }
}

impl MobileHost for WorldState {
    fn is_alive(&self, id: EntityId) -> bool {
        self.mobiles.get(&id).is_some_and(|mobile| mobile.alive)
    }

    fn body(&self, id: EntityId) -> Option<u16> {
        self.mobiles
            .get(&id)
            .map(|mobile| mobile.body_mod.unwrap_or(mobile.base_body))
    }

    fn hue(&self, id: EntityId) -> Option<u16> {
        self.mobiles
            .get(&id)
            .map(|mobile| mobile.hue_mod.unwrap_or(0))
    }

    fn has_body_mod(&self, id: EntityId) -> bool {
        self.mobiles
            .get(&id)
            .is_some_and(|mobile| mobile.body_mod.is_some())
    }

    fn set_body_mod(&mut self, id: EntityId, body: Option<u16>) {
        if let Some(mobile) = self.mobiles.get_mut(&id) {
            mobile.body_mod = body;
        }
    }

    fn set_hue_mod(&mut self, id: EntityId, hue: Option<u16>) {
        if let Some(mobile) = self.mobiles.get_mut(&id) {
            mobile.hue_mod = hue;
        }
    }

    fn add_resistance_mod(&mut self, id: EntityId, modifier: ResistanceMod) {
        if let Some(mobile) = self.mobiles.get_mut(&id) {
            mobile.resistance_mods.push(modifier);
        }
    }

    fn remove_resistance_mods(&mut self, id: EntityId, tag: &str) -> usize {
        let Some(mobile) = self.mobiles.get_mut(&id) else {
            return 0;
        };
        let before = mobile.resistance_mods.len();
        mobile.resistance_mods.retain(|modifier| modifier.tag != tag);
        before - mobile.resistance_mods.len()
    }

    fn dismount(&mut self, id: EntityId) -> bool {
        match self.mobiles.get_mut(&id) {
            Some(mobile) if mobile.mounted => {
                mobile.mounted = false;
                true
            }
            _ => false,
        }
    }

    fn on_transform_tick(&mut self, id: EntityId, form: FormId) {
        debug!(entity = %id, %form, "transform_tick");
    }
}

impl ShardWorld for WorldState {
    fn drain_lifecycle(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.pending)
    }

    fn update(&mut self, _engine: &mut DecayEngine) {}
}

#[cfg(test)]
mod tests {
    use engine::features::transform::{ResistanceKind, TRANSFORM_MOD_TAG};

    use super::*;

    #[test]
    fn roster_spawns_and_queues_online_entries() {
        let mut world = WorldState::from_roster(&[
            RosterEntry { id: 1, body: 0x190, online: true },
            RosterEntry { id: 2, body: 0xD9, online: false },
        ]);

        assert_eq!(world.len(), 2);
        assert_eq!(world.body(EntityId(2)), Some(0xD9));
        assert_eq!(
            world.drain_lifecycle(),
            vec![LifecycleEvent::Connected(EntityId(1))]
        );
        assert!(world.drain_lifecycle().is_empty());
    }

    #[test]
    fn unknown_ids_get_neutral_answers() {
        let mut world = WorldState::default();
        let ghost = EntityId(99);

        assert!(!world.resolve(ghost));
        assert!(!world.is_alive(ghost));
        assert_eq!(world.body(ghost), None);
        assert!(!world.dismount(ghost));
        assert_eq!(world.remove_resistance_mods(ghost, TRANSFORM_MOD_TAG), 0);
        assert!(!world.connect(ghost));
    }

    #[test]
    fn body_mod_overrides_base_body_until_cleared() {
        let mut world = WorldState::default();
        let id = EntityId(3);
        world.spawn(id, 0x190);

        world.set_body_mod(id, Some(0xD9));
        assert_eq!(world.body(id), Some(0xD9));
        assert!(world.has_body_mod(id));

        world.set_body_mod(id, None);
        assert_eq!(world.body(id), Some(0x190));
        assert!(!world.has_body_mod(id));
    }

    #[test]
    fn removing_resistance_mods_only_drops_matching_tag() {
        let mut world = WorldState::default();
        let id = EntityId(4);
        world.spawn(id, 0x190);
        world.add_resistance_mod(
            id,
            ResistanceMod { kind: ResistanceKind::Fire, offset: 5, tag: TRANSFORM_MOD_TAG },
        );
        world.add_resistance_mod(
            id,
            ResistanceMod { kind: ResistanceKind::Cold, offset: -5, tag: "Curse" },
        );

        assert_eq!(world.remove_resistance_mods(id, TRANSFORM_MOD_TAG), 1);
        assert_eq!(world.remove_resistance_mods(id, TRANSFORM_MOD_TAG), 0);
        assert_eq!(world.remove_resistance_mods(id, "Curse"), 1);
    }
}
