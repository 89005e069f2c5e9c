use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::entity::{EntityId, EntityResolver};
use crate::persistence::{
    decode_registry, encode_registry, CodecError, FieldGroup, PersistenceError, PersistentStore,
    RecordReader, RecordWriter, Schema, StoreLoadSummary,
};
use crate::registry::{ContextRegistry, Residency, SweepAction, SweepSummary, TrackedContext};

pub const VIRTUE_STORE: &str = "Virtues";
pub const COMPASSION_DAILY_GAINS: u32 = 5;
const COMPASSION_DAY: TimeDelta = TimeDelta::days(1);
const SACRIFICE_GAIN_COOLDOWN: TimeDelta = TimeDelta::days(1);
const HONOR_USE_COOLDOWN: TimeDelta = TimeDelta::minutes(5);
const SEEKER_THRESHOLD: u32 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VirtueName {
    Humility,
    Sacrifice,
    Compassion,
    Spirituality,
    Valor,
    Honor,
    Justice,
    Honesty,
}

impl VirtueName {
    pub const ALL: [VirtueName; 8] = [
        Self::Humility,
        Self::Sacrifice,
        Self::Compassion,
        Self::Spirituality,
        Self::Valor,
        Self::Honor,
        Self::Justice,
        Self::Honesty,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn max_amount(self) -> u32 {
        match self {
            Self::Honor => 20_000,
            Self::Sacrifice => 22_000,
            _ => 21_000,
        }
    }

    pub fn atrophy_rule(self) -> Option<AtrophyRule> {
        ATROPHY_RULES.iter().copied().find(|rule| rule.virtue == self)
    }
}

impl fmt::Display for VirtueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VirtueLevel {
    None,
    Seeker,
    Follower,
    Knight,
}

impl VirtueLevel {
    pub fn for_value(virtue: VirtueName, value: u32) -> Self {
        if value < SEEKER_THRESHOLD {
            return Self::None;
        }
        if value >= virtue.max_amount() {
            return Self::Knight;
        }
        match (value + 9_999) / 10_000 {
            0 => Self::None,
            1 => Self::Seeker,
            2 => Self::Follower,
            _ => Self::Knight,
        }
    }
}

/// Points lost when a virtue goes unexercised for `delay` since its last
/// loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrophyRule {
    pub virtue: VirtueName,
    pub amount: u32,
    pub delay: TimeDelta,
}

pub const ATROPHY_RULES: [AtrophyRule; 4] = [
    AtrophyRule {
        virtue: VirtueName::Compassion,
        amount: 500,
        delay: TimeDelta::days(7),
    },
    AtrophyRule {
        virtue: VirtueName::Sacrifice,
        amount: 500,
        delay: TimeDelta::days(7),
    },
    AtrophyRule {
        virtue: VirtueName::Justice,
        amount: 950,
        delay: TimeDelta::days(7),
    },
    AtrophyRule {
        virtue: VirtueName::Valor,
        amount: 250,
        delay: TimeDelta::days(7),
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtueInfo {
    pub values: [u32; 8],
    pub compassion_gains: u32,
    pub next_compassion_day: Option<DateTime<Utc>>,
    pub last_compassion_loss: Option<DateTime<Utc>>,
    pub last_sacrifice_loss: Option<DateTime<Utc>>,
    pub last_justice_loss: Option<DateTime<Utc>>,
    pub last_valor_loss: Option<DateTime<Utc>>,
    pub available_resurrects: u32,
    pub last_sacrifice_gain: Option<DateTime<Utc>>,
    pub last_honor_use: Option<DateTime<Utc>>,
    pub honor_active: bool,
}

impl VirtueInfo {
    pub fn value(&self, virtue: VirtueName) -> u32 {
        self.values[virtue.index()]
    }

    pub fn level(&self, virtue: VirtueName) -> VirtueLevel {
        VirtueLevel::for_value(virtue, self.value(virtue))
    }

    fn last_loss_mut(&mut self, virtue: VirtueName) -> Option<&mut Option<DateTime<Utc>>> {
        match virtue {
            VirtueName::Compassion => Some(&mut self.last_compassion_loss),
            VirtueName::Sacrifice => Some(&mut self.last_sacrifice_loss),
            VirtueName::Justice => Some(&mut self.last_justice_loss),
            VirtueName::Valor => Some(&mut self.last_valor_loss),
            _ => None,
        }
    }

    pub fn last_loss(&self, virtue: VirtueName) -> Option<DateTime<Utc>> {
        match virtue {
            VirtueName::Compassion => self.last_compassion_loss,
            VirtueName::Sacrifice => self.last_sacrifice_loss,
            VirtueName::Justice => self.last_justice_loss,
            VirtueName::Valor => self.last_valor_loss,
            _ => None,
        }
    }

    /// A virtue that has never lost points is immediately eligible.
    pub fn can_atrophy(&self, virtue: VirtueName, now: DateTime<Utc>) -> bool {
        virtue.atrophy_rule().is_some_and(|rule| {
            self.last_loss(virtue)
                .map_or(true, |last_loss| last_loss + rule.delay < now)
        })
    }

    pub fn can_gain_sacrifice(&self, now: DateTime<Utc>) -> bool {
        self.last_sacrifice_gain
            .map_or(true, |last_gain| last_gain + SACRIFICE_GAIN_COOLDOWN < now)
    }

    pub fn can_use_honor(&self, now: DateTime<Utc>) -> bool {
        self.last_honor_use
            .map_or(true, |last_use| last_use + HONOR_USE_COOLDOWN < now)
    }

    fn compassion_day_running(&self, now: DateTime<Utc>) -> bool {
        self.compassion_gains > 0
            && self
                .next_compassion_day
                .is_some_and(|next_day| next_day >= now)
    }

    /// True while any cooldown or atrophy delay is still counting down.
    pub fn has_pending(&self, now: DateTime<Utc>) -> bool {
        self.compassion_day_running(now)
            || !self.can_gain_sacrifice(now)
            || !self.can_use_honor(now)
            || ATROPHY_RULES
                .iter()
                .any(|rule| self.last_loss(rule.virtue).is_some() && !self.can_atrophy(rule.virtue, now))
    }

    /// Nothing left worth saving: no points, no resurrects, and no
    /// sacrifice cooldown.
    pub fn is_unused(&self, now: DateTime<Utc>) -> bool {
        self.values.iter().all(|value| *value == 0)
            && self.available_resurrects == 0
            && self.can_gain_sacrifice(now)
    }
}

impl TrackedContext for VirtueInfo {
    fn is_vacant(&self) -> bool {
        *self == VirtueInfo::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    Gained { gained_path: bool },
    AtMaximum,
    CompassionCapped,
}

/// Virtue points per player. Atrophy is applied when gameplay asks for it;
/// the active index tracks players with a cooldown or atrophy delay still
/// running and is refreshed by the decay sweep.
#[derive(Debug)]
pub struct VirtueSystem {
    registry: ContextRegistry<VirtueInfo>,
}

impl Default for VirtueSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtueSystem {
    pub fn new() -> Self {
        Self {
            registry: ContextRegistry::new(VIRTUE_STORE),
        }
    }

    pub fn registry(&self) -> &ContextRegistry<VirtueInfo> {
        &self.registry
    }

    pub fn info(&self, id: EntityId) -> Option<&VirtueInfo> {
        self.registry.get(id)
    }

    pub fn value(&self, id: EntityId, virtue: VirtueName) -> u32 {
        self.registry.get(id).map_or(0, |info| info.value(virtue))
    }

    pub fn level(&self, id: EntityId, virtue: VirtueName) -> VirtueLevel {
        VirtueLevel::for_value(virtue, self.value(id, virtue))
    }

    pub fn award(
        &mut self,
        id: EntityId,
        virtue: VirtueName,
        amount: u32,
        now: DateTime<Utc>,
    ) -> AwardOutcome {
        let (info, _) = self.registry.get_or_create(id);
        if virtue == VirtueName::Compassion {
            if info.compassion_gains > 0 && info.next_compassion_day.is_some_and(|day| now > day) {
                info.next_compassion_day = None;
                info.compassion_gains = 0;
            }
            if info.compassion_gains >= COMPASSION_DAILY_GAINS {
                return AwardOutcome::CompassionCapped;
            }
        }

        let current = info.value(virtue);
        let max = virtue.max_amount();
        let outcome = if current >= max {
            AwardOutcome::AtMaximum
        } else {
            let old_level = info.level(virtue);
            info.values[virtue.index()] = current.saturating_add(amount).min(max);
            let gained_path = info.level(virtue) != old_level;
            if virtue == VirtueName::Compassion {
                info.next_compassion_day = Some(now + COMPASSION_DAY);
                info.compassion_gains += 1;
            }
            if gained_path {
                info!(entity = %id, virtue = %virtue, level = ?info.level(virtue), "virtue_path_gained");
            }
            AwardOutcome::Gained { gained_path }
        };

        let pending = info.has_pending(now);
        self.registry.settle(id, pending);
        outcome
    }

    /// Removes up to `amount` points. Returns whether there was anything to
    /// lose.
    pub fn atrophy(&mut self, id: EntityId, virtue: VirtueName, amount: u32) -> bool {
        let Some(info) = self.registry.get_mut(id) else {
            return false;
        };
        let current = info.value(virtue);
        info.values[virtue.index()] = current.saturating_sub(amount);
        current > 0
    }

    /// Applies the virtue's atrophy rule if its delay has run out, stamping
    /// the loss time either way. Returns whether points were lost.
    pub fn check_atrophy(&mut self, id: EntityId, virtue: VirtueName, now: DateTime<Utc>) -> bool {
        let Some(rule) = virtue.atrophy_rule() else {
            return false;
        };
        let eligible = self
            .registry
            .get(id)
            .is_some_and(|info| info.can_atrophy(virtue, now));
        if !eligible {
            return false;
        }

        let lost = self.atrophy(id, virtue, rule.amount);
        let Some(info) = self.registry.get_mut(id) else {
            return lost;
        };
        if let Some(last_loss) = info.last_loss_mut(virtue) {
            *last_loss = Some(now);
        }
        if lost {
            debug!(entity = %id, virtue = %virtue, value = info.value(virtue), "virtue_atrophied");
        }
        let pending = info.has_pending(now);
        self.registry.settle(id, pending);
        lost
    }

    pub fn can_gain_sacrifice(&self, id: EntityId, now: DateTime<Utc>) -> bool {
        self.registry
            .get(id)
            .map_or(true, |info| info.can_gain_sacrifice(now))
    }

    pub fn record_sacrifice_gain(&mut self, id: EntityId, now: DateTime<Utc>) -> Residency {
        let (info, _) = self.registry.get_or_create(id);
        info.last_sacrifice_gain = Some(now);
        let pending = info.has_pending(now);
        self.registry.settle(id, pending)
    }

    /// Starts an honor use unless the cooldown is still running.
    pub fn use_honor(&mut self, id: EntityId, now: DateTime<Utc>) -> bool {
        let (info, _) = self.registry.get_or_create(id);
        if !info.can_use_honor(now) {
            return false;
        }
        info.last_honor_use = Some(now);
        info.honor_active = true;
        let pending = info.has_pending(now);
        self.registry.settle(id, pending);
        true
    }

    pub fn end_honor(&mut self, id: EntityId, now: DateTime<Utc>) {
        if let Some(info) = self.registry.get_mut(id) {
            info.honor_active = false;
            let pending = info.has_pending(now);
            self.registry.settle(id, pending);
        }
    }

    pub fn grant_resurrects(&mut self, id: EntityId, count: u32) {
        let (info, _) = self.registry.get_or_create(id);
        info.available_resurrects = info.available_resurrects.saturating_add(count);
    }

    pub fn consume_resurrect(&mut self, id: EntityId, now: DateTime<Utc>) -> bool {
        let Some(info) = self.registry.get_mut(id) else {
            return false;
        };
        if info.available_resurrects == 0 {
            return false;
        }
        info.available_resurrects -= 1;
        let pending = info.has_pending(now);
        self.registry.settle(id, pending);
        true
    }

    pub fn on_removed(&mut self, id: EntityId) {
        self.registry.remove(id);
    }

    /// Drops players whose virtue record carries nothing worth keeping.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let pruned = self.registry.retain(|_, info| !info.is_unused(now));
        if pruned > 0 {
            debug!(pruned, "virtues_pruned");
        }
        pruned
    }

    /// Re-derives active index membership for every context, used after a
    /// load when the index is empty.
    pub fn reindex(&mut self, now: DateTime<Utc>) {
        for id in self.registry.keys_sorted() {
            let pending = self
                .registry
                .get(id)
                .is_some_and(|info| info.has_pending(now));
            self.registry.settle(id, pending);
        }
    }

    /// Drops index entries whose cooldowns have all run out.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepSummary {
        self.registry.for_each_active(|_, info| {
            if info.has_pending(now) {
                SweepAction::Keep
            } else if info.is_vacant() {
                SweepAction::Evict
            } else {
                SweepAction::Deactivate
            }
        })
    }
}

impl PersistentStore for VirtueSystem {
    fn store_name(&self) -> &'static str {
        VIRTUE_STORE
    }

    fn encode(&self) -> Vec<u8> {
        encode_registry(&VIRTUE_SCHEMA, &self.registry)
    }

    fn restore(
        &mut self,
        payload: &[u8],
        resolver: &dyn EntityResolver,
    ) -> Result<StoreLoadSummary, PersistenceError> {
        let decoded = decode_registry(&VIRTUE_SCHEMA, payload, resolver)?;
        let summary = decoded.summary(VIRTUE_STORE);
        self.registry.clear();
        for (id, info) in decoded.records {
            self.registry.insert(id, info);
        }
        Ok(summary)
    }
}

pub(crate) const VIRTUE_SCHEMA: Schema<VirtueInfo> = Schema {
    store: VIRTUE_STORE,
    groups: &[
        FieldGroup {
            introduced_in: 2,
            write: write_v2,
            read: read_v2,
            default: default_v2,
        },
        FieldGroup {
            introduced_in: 1,
            write: write_v1,
            read: read_v1,
            default: default_v1,
        },
        FieldGroup {
            introduced_in: 0,
            write: write_v0,
            read: read_v0,
            default: default_v0,
        },
    ],
};

fn write_v2(info: &VirtueInfo, writer: &mut RecordWriter) {
    writer.write_opt_datetime(info.last_honor_use);
    writer.write_bool(info.honor_active);
}

fn read_v2(reader: &mut RecordReader<'_>, info: &mut VirtueInfo) -> Result<(), CodecError> {
    info.last_honor_use = reader.read_opt_datetime()?;
    info.honor_active = reader.read_bool()?;
    Ok(())
}

fn default_v2(info: &mut VirtueInfo) {
    info.last_honor_use = None;
    info.honor_active = false;
}

fn write_v1(info: &VirtueInfo, writer: &mut RecordWriter) {
    writer.write_encoded_int(info.available_resurrects);
    writer.write_opt_datetime(info.last_sacrifice_gain);
}

fn read_v1(reader: &mut RecordReader<'_>, info: &mut VirtueInfo) -> Result<(), CodecError> {
    info.available_resurrects = reader.read_encoded_int()?;
    info.last_sacrifice_gain = reader.read_opt_datetime()?;
    Ok(())
}

fn default_v1(info: &mut VirtueInfo) {
    info.available_resurrects = 0;
    info.last_sacrifice_gain = None;
}

fn write_v0(info: &VirtueInfo, writer: &mut RecordWriter) {
    for value in info.values {
        writer.write_encoded_int(value);
    }
    writer.write_encoded_int(info.compassion_gains);
    writer.write_opt_datetime(info.next_compassion_day);
    writer.write_opt_datetime(info.last_compassion_loss);
    writer.write_opt_datetime(info.last_sacrifice_loss);
    writer.write_opt_datetime(info.last_justice_loss);
    writer.write_opt_datetime(info.last_valor_loss);
}

fn read_v0(reader: &mut RecordReader<'_>, info: &mut VirtueInfo) -> Result<(), CodecError> {
    for value in info.values.iter_mut() {
        *value = reader.read_encoded_int()?;
    }
    info.compassion_gains = reader.read_encoded_int()?;
    info.next_compassion_day = reader.read_opt_datetime()?;
    info.last_compassion_loss = reader.read_opt_datetime()?;
    info.last_sacrifice_loss = reader.read_opt_datetime()?;
    info.last_justice_loss = reader.read_opt_datetime()?;
    info.last_valor_loss = reader.read_opt_datetime()?;
    Ok(())
}

fn default_v0(_: &mut VirtueInfo) {}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct Everyone;

    impl EntityResolver for Everyone {
        fn resolve(&self, _: EntityId) -> bool {
            true
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn levels_follow_thresholds_and_maximums() {
        assert_eq!(VirtueLevel::for_value(VirtueName::Valor, 3_999), VirtueLevel::None);
        assert_eq!(VirtueLevel::for_value(VirtueName::Valor, 4_000), VirtueLevel::Seeker);
        assert_eq!(VirtueLevel::for_value(VirtueName::Valor, 10_000), VirtueLevel::Seeker);
        assert_eq!(VirtueLevel::for_value(VirtueName::Valor, 10_001), VirtueLevel::Follower);
        assert_eq!(VirtueLevel::for_value(VirtueName::Valor, 20_500), VirtueLevel::Knight);
        assert_eq!(VirtueLevel::for_value(VirtueName::Honor, 20_000), VirtueLevel::Knight);
        assert_eq!(VirtueLevel::for_value(VirtueName::Sacrifice, 21_999), VirtueLevel::Knight);
    }

    #[test]
    fn award_clamps_to_maximum_and_reports_paths() {
        let id = EntityId(1);
        let mut virtues = VirtueSystem::new();

        assert_eq!(
            virtues.award(id, VirtueName::Honor, 4_000, t0()),
            AwardOutcome::Gained { gained_path: true }
        );
        assert_eq!(
            virtues.award(id, VirtueName::Honor, 100, t0()),
            AwardOutcome::Gained { gained_path: false }
        );
        virtues.award(id, VirtueName::Honor, 50_000, t0());
        assert_eq!(virtues.value(id, VirtueName::Honor), 20_000);
        assert_eq!(virtues.award(id, VirtueName::Honor, 1, t0()), AwardOutcome::AtMaximum);
    }

    #[test]
    fn compassion_caps_daily_gains() {
        let id = EntityId(2);
        let mut virtues = VirtueSystem::new();
        for _ in 0..COMPASSION_DAILY_GAINS {
            assert!(matches!(
                virtues.award(id, VirtueName::Compassion, 100, t0()),
                AwardOutcome::Gained { .. }
            ));
        }
        assert_eq!(
            virtues.award(id, VirtueName::Compassion, 100, t0() + TimeDelta::hours(2)),
            AwardOutcome::CompassionCapped
        );
        assert!(virtues.registry().is_active(id));

        let next_day = t0() + TimeDelta::days(1) + TimeDelta::minutes(1);
        assert!(matches!(
            virtues.award(id, VirtueName::Compassion, 100, next_day),
            AwardOutcome::Gained { .. }
        ));
        assert_eq!(virtues.info(id).unwrap().compassion_gains, 1);
        assert_eq!(virtues.value(id, VirtueName::Compassion), 600);
    }

    #[test]
    fn atrophy_waits_for_delay_since_last_loss() {
        let id = EntityId(3);
        let mut virtues = VirtueSystem::new();
        virtues.award(id, VirtueName::Justice, 2_000, t0());

        assert!(virtues.check_atrophy(id, VirtueName::Justice, t0()));
        assert_eq!(virtues.value(id, VirtueName::Justice), 1_050);
        assert!(virtues.registry().is_active(id));

        assert!(!virtues.check_atrophy(id, VirtueName::Justice, t0() + TimeDelta::days(6)));
        assert_eq!(virtues.value(id, VirtueName::Justice), 1_050);

        assert!(virtues.check_atrophy(id, VirtueName::Justice, t0() + TimeDelta::days(8)));
        assert_eq!(virtues.value(id, VirtueName::Justice), 100);

        assert!(!virtues.check_atrophy(id, VirtueName::Honesty, t0() + TimeDelta::days(30)));
    }

    #[test]
    fn atrophy_floors_at_zero() {
        let id = EntityId(4);
        let mut virtues = VirtueSystem::new();
        virtues.award(id, VirtueName::Valor, 100, t0());
        assert!(virtues.atrophy(id, VirtueName::Valor, 250));
        assert_eq!(virtues.value(id, VirtueName::Valor), 0);
        assert!(!virtues.atrophy(id, VirtueName::Valor, 250));
    }

    #[test]
    fn honor_and_sacrifice_cooldowns() {
        let id = EntityId(5);
        let mut virtues = VirtueSystem::new();
        assert!(virtues.use_honor(id, t0()));
        assert!(!virtues.use_honor(id, t0() + TimeDelta::minutes(4)));
        assert!(virtues.use_honor(id, t0() + TimeDelta::minutes(6)));

        virtues.record_sacrifice_gain(id, t0());
        assert!(!virtues.can_gain_sacrifice(id, t0() + TimeDelta::hours(23)));
        assert!(virtues.can_gain_sacrifice(id, t0() + TimeDelta::hours(25)));
    }

    #[test]
    fn sweep_deactivates_once_cooldowns_lapse() {
        let id = EntityId(6);
        let mut virtues = VirtueSystem::new();
        virtues.award(id, VirtueName::Humility, 500, t0());
        virtues.use_honor(id, t0());
        assert!(virtues.registry().is_active(id));

        let summary = virtues.sweep(t0() + TimeDelta::minutes(10));
        assert_eq!(summary.deactivated, 1);
        assert!(!virtues.registry().is_active(id));
        assert_eq!(virtues.value(id, VirtueName::Humility), 500);
    }

    #[test]
    fn prune_drops_unused_records() {
        let mut virtues = VirtueSystem::new();
        virtues.use_honor(EntityId(7), t0());
        virtues.grant_resurrects(EntityId(8), 1);
        virtues.record_sacrifice_gain(EntityId(9), t0());

        assert_eq!(virtues.prune(t0() + TimeDelta::hours(1)), 1);
        assert!(virtues.info(EntityId(7)).is_none());
        assert!(virtues.info(EntityId(8)).is_some());
        assert!(virtues.info(EntityId(9)).is_some());
        assert!(virtues.consume_resurrect(EntityId(8), t0()));
        assert!(!virtues.consume_resurrect(EntityId(8), t0()));
    }

    #[test]
    fn store_roundtrip_then_reindex() {
        let mut virtues = VirtueSystem::new();
        virtues.award(EntityId(10), VirtueName::Compassion, 300, t0());
        virtues.award(EntityId(11), VirtueName::Spirituality, 9_000, t0());
        virtues.grant_resurrects(EntityId(11), 2);
        virtues.use_honor(EntityId(11), t0());

        let mut restored = VirtueSystem::new();
        let summary = restored.restore(&virtues.encode(), &Everyone).expect("restore");
        assert_eq!(summary.version, Some(2));
        assert_eq!(summary.loaded, 2);
        assert_eq!(restored.info(EntityId(10)), virtues.info(EntityId(10)));
        assert_eq!(restored.info(EntityId(11)), virtues.info(EntityId(11)));

        assert_eq!(restored.registry().active_len(), 0);
        restored.reindex(t0());
        assert_eq!(restored.registry().active_keys(), virtues.registry().active_keys());
    }

    #[test]
    fn older_layouts_take_defaults_for_newer_fields() {
        let info = VirtueInfo {
            values: [1, 2, 3, 4, 5, 6, 7, 8],
            compassion_gains: 2,
            next_compassion_day: Some(t0()),
            last_valor_loss: Some(t0()),
            available_resurrects: 3,
            last_sacrifice_gain: Some(t0()),
            last_honor_use: Some(t0()),
            honor_active: true,
            ..VirtueInfo::default()
        };

        for (version, expected) in [
            (
                1,
                VirtueInfo {
                    last_honor_use: None,
                    honor_active: false,
                    ..info.clone()
                },
            ),
            (
                0,
                VirtueInfo {
                    available_resurrects: 0,
                    last_sacrifice_gain: None,
                    last_honor_use: None,
                    honor_active: false,
                    ..info.clone()
                },
            ),
        ] {
            let mut writer = RecordWriter::new();
            writer.write_i32(version);
            writer.write_i32(1);
            writer.write_entity(EntityId(12));
            VIRTUE_SCHEMA.write_as(version, &info, &mut writer);

            let mut restored = VirtueSystem::new();
            restored
                .restore(&writer.into_bytes(), &Everyone)
                .expect("restore older layout");
            assert_eq!(restored.info(EntityId(12)), Some(&expected), "version {version}");
        }
    }

    #[test]
    fn schema_groups_are_newest_first() {
        assert!(VIRTUE_SCHEMA.is_well_ordered());
        assert_eq!(VIRTUE_SCHEMA.current_version(), 2);
    }
}
