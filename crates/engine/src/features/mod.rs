pub mod mount_block;
pub mod murder;
pub mod stat_mods;
pub mod transform;
pub mod virtue;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use super::transform::{FormId, ResistanceMod};
    use crate::entity::{EntityId, EntityResolver, MobileHost};

    #[derive(Debug, Default)]
    pub(crate) struct TestMobile {
        pub base_body: u16,
        pub body_mod: Option<u16>,
        pub hue_mod: Option<u16>,
        pub dead: bool,
        pub mounted: bool,
        pub resistance_mods: Vec<ResistanceMod>,
        pub resistance_removals: u32,
        pub transform_ticks: u32,
    }

    #[derive(Debug, Default)]
    pub(crate) struct TestWorld {
        pub mobiles: HashMap<EntityId, TestMobile>,
    }

    impl TestWorld {
        pub fn spawn(&mut self, id: EntityId, body: u16) {
            self.mobiles.insert(
                id,
                TestMobile {
                    base_body: body,
                    ..TestMobile::default()
                },
            );
        }

        pub fn delete(&mut self, id: EntityId) {
            self.mobiles.remove(&id);
        }

        pub fn kill(&mut self, id: EntityId) {
            if let Some(mobile) = self.mobiles.get_mut(&id) {
                mobile.dead = true;
            }
        }

        pub fn mount(&mut self, id: EntityId) {
            if let Some(mobile) = self.mobiles.get_mut(&id) {
                mobile.mounted = true;
            }
        }

        pub fn is_mounted(&self, id: EntityId) -> bool {
            self.mobiles.get(&id).is_some_and(|mobile| mobile.mounted)
        }

        pub fn resistance_mods(&self, id: EntityId) -> Vec<ResistanceMod> {
            self.mobiles
                .get(&id)
                .map(|mobile| mobile.resistance_mods.clone())
                .unwrap_or_default()
        }

        pub fn resistance_removals(&self, id: EntityId) -> u32 {
            self.mobiles
                .get(&id)
                .map_or(0, |mobile| mobile.resistance_removals)
        }

        pub fn transform_ticks(&self, id: EntityId) -> u32 {
            self.mobiles.get(&id).map_or(0, |mobile| mobile.transform_ticks)
        }
    }

    impl EntityResolver for TestWorld {
        fn resolve(&self, id: EntityId) -> bool {
            self.mobiles.contains_key(&id)
        }
    }

    impl MobileHost for TestWorld {
        fn is_alive(&self, id: EntityId) -> bool {
            self.mobiles.get(&id).is_some_and(|mobile| !mobile.dead)
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
            let removed = before - mobile.resistance_mods.len();
            if removed > 0 {
                mobile.resistance_removals += 1;
            }
            removed
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

        fn on_transform_tick(&mut self, id: EntityId, _form: FormId) {
            if let Some(mobile) = self.mobiles.get_mut(&id) {
                mobile.transform_ticks += 1;
            }
        }
    }
}
