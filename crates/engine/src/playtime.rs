use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::entity::{EntityId, EntityResolver};
use crate::persistence::{
    decode_registry, encode_registry, CodecError, FieldGroup, PersistenceError, PersistentStore,
    RecordReader, RecordWriter, Schema, StoreLoadSummary,
};
use crate::registry::{ContextRegistry, TrackedContext};

pub const PLAYTIME_STORE: &str = "Playtime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playtime {
    pub accumulated: TimeDelta,
    pub session_start: Option<DateTime<Utc>>,
    pub last_online: Option<DateTime<Utc>>,
}

impl Default for Playtime {
    fn default() -> Self {
        Self {
            accumulated: TimeDelta::zero(),
            session_start: None,
            last_online: None,
        }
    }
}

impl Playtime {
    pub fn game_time(&self, now: DateTime<Utc>) -> TimeDelta {
        match self.session_start {
            Some(start) => self.accumulated + session_length(start, now),
            None => self.accumulated,
        }
    }
}

impl TrackedContext for Playtime {
    fn is_vacant(&self) -> bool {
        self.accumulated.is_zero() && self.session_start.is_none() && self.last_online.is_none()
    }
}

/// Per-entity time spent connected. Decay windows measured in game time
/// stand still while their owner is offline.
///
/// The active index holds the entities with an open session.
#[derive(Debug)]
pub struct PlaytimeLedger {
    registry: ContextRegistry<Playtime>,
}

impl Default for PlaytimeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaytimeLedger {
    pub fn new() -> Self {
        Self {
            registry: ContextRegistry::new(PLAYTIME_STORE),
        }
    }

    pub fn connect(&mut self, id: EntityId, now: DateTime<Utc>) {
        let (playtime, _) = self.registry.get_or_create(id);
        if playtime.session_start.is_none() {
            playtime.session_start = Some(now);
        }
        self.registry.mark_active(id);
    }

    pub fn disconnect(&mut self, id: EntityId, now: DateTime<Utc>) {
        if let Some(playtime) = self.registry.get_mut(id) {
            if let Some(start) = playtime.session_start.take() {
                playtime.accumulated = playtime.accumulated + session_length(start, now);
            }
            playtime.last_online = Some(now);
            debug!(
                entity = %id,
                game_time_s = playtime.accumulated.num_seconds(),
                "playtime_session_closed"
            );
        }
        self.registry.mark_inactive(id);
    }

    pub fn is_online(&self, id: EntityId) -> bool {
        self.registry.is_active(id)
    }

    pub fn game_time(&self, id: EntityId, now: DateTime<Utc>) -> TimeDelta {
        self.registry
            .get(id)
            .map_or_else(TimeDelta::zero, |playtime| playtime.game_time(now))
    }

    /// Folds every open session into `accumulated` and restarts it at `now`,
    /// so the stored totals include time played up to the save.
    pub fn checkpoint(&mut self, now: DateTime<Utc>) {
        for id in self.registry.active_keys() {
            if let Some(playtime) = self.registry.get_mut(id) {
                if let Some(start) = playtime.session_start {
                    playtime.accumulated = playtime.accumulated + session_length(start, now);
                    playtime.session_start = Some(now);
                }
            }
        }
    }

    pub fn remove(&mut self, id: EntityId) {
        self.registry.remove(id);
    }

    pub fn registry(&self) -> &ContextRegistry<Playtime> {
        &self.registry
    }
}

/// Open sessions are not stored; call `checkpoint` first so the saved
/// totals include them.
impl PersistentStore for PlaytimeLedger {
    fn store_name(&self) -> &'static str {
        PLAYTIME_STORE
    }

    fn encode(&self) -> Vec<u8> {
        encode_registry(&PLAYTIME_SCHEMA, &self.registry)
    }

    fn restore(
        &mut self,
        payload: &[u8],
        resolver: &dyn EntityResolver,
    ) -> Result<StoreLoadSummary, PersistenceError> {
        let decoded = decode_registry(&PLAYTIME_SCHEMA, payload, resolver)?;
        let summary = decoded.summary(PLAYTIME_STORE);
        self.registry.clear();
        for (id, playtime) in decoded.records {
            self.registry.insert(id, playtime);
        }
        Ok(summary)
    }
}

pub(crate) const PLAYTIME_SCHEMA: Schema<Playtime> = Schema {
    store: PLAYTIME_STORE,
    groups: &[
        FieldGroup {
            introduced_in: 1,
            write: write_last_online,
            read: read_last_online,
            default: default_last_online,
        },
        FieldGroup {
            introduced_in: 0,
            write: write_accumulated,
            read: read_accumulated,
            default: no_default,
        },
    ],
};

fn write_last_online(playtime: &Playtime, writer: &mut RecordWriter) {
    writer.write_opt_datetime(playtime.last_online);
}

fn default_last_online(playtime: &mut Playtime) {
    playtime.last_online = None;
}

fn write_accumulated(playtime: &Playtime, writer: &mut RecordWriter) {
    writer.write_time_delta(playtime.accumulated);
}

fn no_default(_: &mut Playtime) {}

fn read_last_online(reader: &mut RecordReader<'_>, playtime: &mut Playtime) -> Result<(), CodecError> {
    playtime.last_online = reader.read_opt_datetime()?;
    Ok(())
}

fn read_accumulated(reader: &mut RecordReader<'_>, playtime: &mut Playtime) -> Result<(), CodecError> {
    playtime.accumulated = reader.read_time_delta()?;
    Ok(())
}

fn session_length(start: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    now.signed_duration_since(start).max(TimeDelta::zero())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn game_time_only_counts_connected_time() {
        let mut ledger = PlaytimeLedger::new();
        let id = EntityId(1);

        ledger.connect(id, t0());
        assert!(ledger.is_online(id));
        assert_eq!(ledger.game_time(id, t0() + TimeDelta::hours(2)), TimeDelta::hours(2));

        ledger.disconnect(id, t0() + TimeDelta::hours(3));
        assert!(!ledger.is_online(id));
        assert_eq!(ledger.game_time(id, t0() + TimeDelta::hours(30)), TimeDelta::hours(3));

        ledger.connect(id, t0() + TimeDelta::hours(30));
        assert_eq!(ledger.game_time(id, t0() + TimeDelta::hours(31)), TimeDelta::hours(4));
    }

    #[test]
    fn reconnect_without_disconnect_keeps_original_session() {
        let mut ledger = PlaytimeLedger::new();
        let id = EntityId(2);
        ledger.connect(id, t0());
        ledger.connect(id, t0() + TimeDelta::hours(1));
        assert_eq!(ledger.game_time(id, t0() + TimeDelta::hours(2)), TimeDelta::hours(2));
    }

    #[test]
    fn checkpoint_preserves_game_time() {
        let mut ledger = PlaytimeLedger::new();
        let id = EntityId(3);
        ledger.connect(id, t0());

        let save_at = t0() + TimeDelta::minutes(90);
        ledger.checkpoint(save_at);
        let playtime = ledger.registry().get(id).unwrap();
        assert_eq!(playtime.accumulated, TimeDelta::minutes(90));
        assert_eq!(playtime.session_start, Some(save_at));
        assert_eq!(ledger.game_time(id, save_at + TimeDelta::minutes(10)), TimeDelta::minutes(100));
    }

    #[test]
    fn checkpointed_ledger_restores_offline() {
        struct Everyone;
        impl EntityResolver for Everyone {
            fn resolve(&self, _: EntityId) -> bool {
                true
            }
        }

        let mut ledger = PlaytimeLedger::new();
        ledger.connect(EntityId(4), t0());
        ledger.connect(EntityId(5), t0());
        ledger.disconnect(EntityId(5), t0() + TimeDelta::hours(1));
        let save_at = t0() + TimeDelta::hours(2);
        ledger.checkpoint(save_at);

        let mut restored = PlaytimeLedger::new();
        let summary = restored.restore(&ledger.encode(), &Everyone).expect("restore");
        assert_eq!(summary.loaded, 2);
        assert_eq!(restored.game_time(EntityId(4), save_at), TimeDelta::hours(2));
        assert!(!restored.is_online(EntityId(4)));
        assert_eq!(
            restored.registry().get(EntityId(5)).unwrap().last_online,
            Some(t0() + TimeDelta::hours(1))
        );
    }

    #[test]
    fn version_zero_record_has_no_last_online() {
        let playtime = Playtime {
            accumulated: TimeDelta::minutes(45),
            session_start: None,
            last_online: Some(t0()),
        };
        let mut writer = RecordWriter::new();
        PLAYTIME_SCHEMA.write_as(0, &playtime, &mut writer);
        let bytes = writer.into_bytes();

        let decoded = PLAYTIME_SCHEMA
            .read(0, &mut RecordReader::new(&bytes))
            .expect("read v0");
        assert_eq!(decoded.accumulated, TimeDelta::minutes(45));
        assert_eq!(decoded.last_online, None);
    }

    #[test]
    fn unknown_entity_has_zero_game_time() {
        let ledger = PlaytimeLedger::new();
        assert_eq!(ledger.game_time(EntityId(99), t0()), TimeDelta::zero());
        assert!(!ledger.is_online(EntityId(99)));
    }
}
