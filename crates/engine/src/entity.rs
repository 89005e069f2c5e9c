use std::fmt;

use crate::features::transform::{FormId, ResistanceMod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Resolves persisted entity references against the live world.
pub trait EntityResolver {
    fn resolve(&self, id: EntityId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected(EntityId),
    Disconnected(EntityId),
    Removed(EntityId),
}

impl LifecycleEvent {
    pub fn entity(self) -> EntityId {
        match self {
            Self::Connected(id) | Self::Disconnected(id) | Self::Removed(id) => id,
        }
    }
}

/// Live mobile attributes the effect systems read and modify. `body` and
/// `hue` report what the mobile currently shows, modifiers included.
///
/// Every query returns a neutral answer for ids the world does not know;
/// callers treat an unknown id the same as a deleted one.
pub trait MobileHost: EntityResolver {
    fn is_alive(&self, id: EntityId) -> bool;
    fn body(&self, id: EntityId) -> Option<u16>;
    fn hue(&self, id: EntityId) -> Option<u16>;
    fn has_body_mod(&self, id: EntityId) -> bool;
    fn set_body_mod(&mut self, id: EntityId, body: Option<u16>);
    fn set_hue_mod(&mut self, id: EntityId, hue: Option<u16>);
    fn add_resistance_mod(&mut self, id: EntityId, modifier: ResistanceMod);
    /// Returns how many modifiers carrying `tag` were removed.
    fn remove_resistance_mods(&mut self, id: EntityId, tag: &str) -> usize;
    /// Returns true when the mobile was riding and is now on foot.
    fn dismount(&mut self, id: EntityId) -> bool;

    fn on_transform_tick(&mut self, _id: EntityId, _form: FormId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_displays_as_padded_hex() {
        assert_eq!(EntityId(0x2a).to_string(), "0x0000002a");
    }

    #[test]
    fn lifecycle_event_reports_owner() {
        let id = EntityId(7);
        for event in [
            LifecycleEvent::Connected(id),
            LifecycleEvent::Disconnected(id),
            LifecycleEvent::Removed(id),
        ] {
            assert_eq!(event.entity(), id);
        }
    }
}
