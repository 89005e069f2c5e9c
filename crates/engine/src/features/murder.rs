use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::entity::{EntityId, EntityResolver};
use crate::persistence::{
    decode_registry, encode_registry, CodecError, FieldGroup, PersistenceError, PersistentStore,
    RecordReader, RecordWriter, Schema, StoreLoadSummary, MAX_TIME_SPAN,
};
use crate::playtime::PlaytimeLedger;
use crate::registry::{ContextRegistry, Residency, SweepAction, SweepSummary, TrackedContext};
use crate::scheduler::{Scheduler, TimerHandle};

pub const MURDER_STORE: &str = "PlayerMurders";
pub const DEFAULT_SHORT_TERM_WINDOW: TimeDelta = TimeDelta::hours(8);
pub const DEFAULT_LONG_TERM_WINDOW: TimeDelta = TimeDelta::hours(40);
pub const DEFAULT_SWEEP_INTERVAL: TimeDelta = TimeDelta::minutes(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MurderWindows {
    pub short_term: TimeDelta,
    pub long_term: TimeDelta,
}

impl Default for MurderWindows {
    fn default() -> Self {
        Self {
            short_term: DEFAULT_SHORT_TERM_WINDOW,
            long_term: DEFAULT_LONG_TERM_WINDOW,
        }
    }
}

/// Murder counts and their decay deadlines, in owner game time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MurderContext {
    pub short_term_murders: u32,
    pub kills: u32,
    pub short_term_elapse: Option<TimeDelta>,
    pub long_term_elapse: Option<TimeDelta>,
    pub last_murder_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayStep {
    pub short_term: bool,
    pub long_term: bool,
}

impl MurderContext {
    pub fn reset_kill_time(
        &mut self,
        game_time: TimeDelta,
        windows: MurderWindows,
        short_term: bool,
        long_term: bool,
    ) {
        if short_term {
            self.short_term_elapse = Some(game_time + windows.short_term);
        }
        if long_term {
            self.long_term_elapse = Some(game_time + windows.long_term);
        }
    }

    /// One decay step per window whose deadline has passed. The next
    /// deadline is the missed one plus the window, so a long absence is
    /// worked off one step per check.
    pub fn decay(&mut self, game_time: TimeDelta, windows: MurderWindows) -> DecayStep {
        let short_term = decay_window(
            &mut self.short_term_murders,
            &mut self.short_term_elapse,
            game_time,
            windows.short_term,
        );
        let long_term = decay_window(
            &mut self.kills,
            &mut self.long_term_elapse,
            game_time,
            windows.long_term,
        );
        DecayStep {
            short_term,
            long_term,
        }
    }

    /// Wall-clock instant of the earliest pending decay for an owner who is
    /// online now with `game_time` played.
    pub fn next_elapse(&self, now: DateTime<Utc>, game_time: TimeDelta) -> Option<DateTime<Utc>> {
        let short = (self.short_term_murders > 0)
            .then_some(self.short_term_elapse)
            .flatten();
        let long = (self.kills > 0).then_some(self.long_term_elapse).flatten();
        [short, long]
            .into_iter()
            .flatten()
            .filter_map(|elapse| {
                elapse
                    .checked_sub(&game_time)
                    .and_then(|remaining| now.checked_add_signed(remaining))
            })
            .min()
    }
}

fn decay_window(
    count: &mut u32,
    elapse: &mut Option<TimeDelta>,
    game_time: TimeDelta,
    window: TimeDelta,
) -> bool {
    let Some(deadline) = *elapse else {
        return false;
    };
    if deadline >= game_time {
        return false;
    }

    *count = count.saturating_sub(1);
    *elapse = if *count > 0 {
        deadline.checked_add(&window)
    } else {
        None
    };
    true
}

impl TrackedContext for MurderContext {
    fn is_vacant(&self) -> bool {
        self.short_term_murders == 0 && self.kills == 0
    }
}

/// Murder decay for every player, driven by one shared sweep timer.
///
/// The active index holds contexts whose owner is online with at least one
/// window running. Offline owners keep their context but leave the index.
#[derive(Debug)]
pub struct MurderSystem {
    registry: ContextRegistry<MurderContext>,
    windows: MurderWindows,
    sweep_timer: Option<TimerHandle>,
}

impl MurderSystem {
    pub fn new(windows: MurderWindows) -> Self {
        Self {
            registry: ContextRegistry::new(MURDER_STORE),
            windows,
            sweep_timer: None,
        }
    }

    pub fn windows(&self) -> MurderWindows {
        self.windows
    }

    pub fn start_sweep<T: Clone>(
        &mut self,
        scheduler: &mut Scheduler<T>,
        interval: TimeDelta,
        payload: T,
    ) -> TimerHandle {
        if let Some(previous) = self.sweep_timer.take() {
            scheduler.cancel(previous);
        }
        let handle = scheduler.schedule_repeating(interval, interval, payload);
        self.sweep_timer = Some(handle);
        info!(interval_s = interval.num_seconds(), "murder_sweep_started");
        handle
    }

    pub fn stop_sweep<T: Clone>(&mut self, scheduler: &mut Scheduler<T>) {
        if let Some(handle) = self.sweep_timer.take() {
            scheduler.cancel(handle);
        }
    }

    pub fn sweep_timer(&self) -> Option<TimerHandle> {
        self.sweep_timer
    }

    pub fn context(&self, id: EntityId) -> Option<&MurderContext> {
        self.registry.get(id)
    }

    pub fn counts(&self, id: EntityId) -> (u32, u32) {
        self.registry
            .get(id)
            .map_or((0, 0), |context| (context.short_term_murders, context.kills))
    }

    pub fn registry(&self) -> &ContextRegistry<MurderContext> {
        &self.registry
    }

    pub fn record_murder(
        &mut self,
        id: EntityId,
        now: DateTime<Utc>,
        playtime: &PlaytimeLedger,
    ) -> Residency {
        let (short, kills) = self.counts(id);
        let residency = self.set_counts(
            id,
            short.saturating_add(1),
            kills.saturating_add(1),
            true,
            now,
            playtime,
        );
        if let Some(context) = self.registry.get_mut(id) {
            context.last_murder_at = Some(now);
        }
        residency
    }

    /// Applies new murder counts. With `restart_windows` every running
    /// count gets a fresh window; without it only counts whose window is
    /// not yet running start one.
    pub fn set_counts(
        &mut self,
        id: EntityId,
        short_term_murders: u32,
        kills: u32,
        restart_windows: bool,
        now: DateTime<Utc>,
        playtime: &PlaytimeLedger,
    ) -> Residency {
        if short_term_murders == 0 && kills == 0 {
            self.registry.remove(id);
            return Residency::Evicted;
        }

        let game_time = playtime.game_time(id, now);
        let windows = self.windows;
        let (context, _) = self.registry.get_or_create(id);
        context.short_term_murders = short_term_murders;
        context.kills = kills;
        if short_term_murders == 0 {
            context.short_term_elapse = None;
        }
        if kills == 0 {
            context.long_term_elapse = None;
        }
        context.reset_kill_time(
            game_time,
            windows,
            short_term_murders > 0 && (restart_windows || context.short_term_elapse.is_none()),
            kills > 0 && (restart_windows || context.long_term_elapse.is_none()),
        );

        let pending = playtime.is_online(id) && context.next_elapse(now, game_time).is_some();
        self.registry.settle(id, pending)
    }

    pub fn on_connected(
        &mut self,
        id: EntityId,
        now: DateTime<Utc>,
        playtime: &PlaytimeLedger,
    ) -> Residency {
        let game_time = playtime.game_time(id, now);
        let Some(context) = self.registry.get(id) else {
            return Residency::Evicted;
        };
        let pending = context.next_elapse(now, game_time).is_some();
        self.registry.settle(id, pending)
    }

    pub fn on_disconnected(&mut self, id: EntityId) {
        self.registry.mark_inactive(id);
    }

    pub fn on_removed(&mut self, id: EntityId) {
        self.registry.remove(id);
    }

    /// One decay pass over the active index.
    pub fn sweep(&mut self, now: DateTime<Utc>, playtime: &PlaytimeLedger) -> SweepSummary {
        let windows = self.windows;
        let summary = self.registry.for_each_active(|id, context| {
            let game_time = playtime.game_time(id, now);
            let step = context.decay(game_time, windows);
            if step.short_term || step.long_term {
                debug!(
                    entity = %id,
                    short_term_murders = context.short_term_murders,
                    kills = context.kills,
                    "murder_counts_decayed"
                );
            }

            if context.is_vacant() {
                SweepAction::Evict
            } else if playtime.is_online(id) && context.next_elapse(now, game_time).is_some() {
                SweepAction::Keep
            } else {
                SweepAction::Deactivate
            }
        });
        if summary.visited > 0 {
            debug!(
                visited = summary.visited,
                evicted = summary.evicted,
                deactivated = summary.deactivated,
                "murder_sweep"
            );
        }
        summary
    }

    /// Seeds decay deadlines carried over from an older save layout.
    /// Deadlines beyond `MAX_TIME_SPAN` are treated as never running.
    pub fn import_legacy_windows(
        &mut self,
        id: EntityId,
        short_term_elapse: Option<TimeDelta>,
        long_term_elapse: Option<TimeDelta>,
    ) -> bool {
        match self.registry.get_mut(id) {
            Some(context) => {
                context.short_term_elapse = bounded_elapse(id, short_term_elapse);
                context.long_term_elapse = bounded_elapse(id, long_term_elapse);
                true
            }
            None => false,
        }
    }

    pub fn next_elapse(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
        playtime: &PlaytimeLedger,
    ) -> Option<DateTime<Utc>> {
        if !playtime.is_online(id) {
            return None;
        }
        self.registry
            .get(id)?
            .next_elapse(now, playtime.game_time(id, now))
    }
}

fn bounded_elapse(id: EntityId, elapse: Option<TimeDelta>) -> Option<TimeDelta> {
    elapse.filter(|elapse| {
        let in_range = elapse.abs() <= MAX_TIME_SPAN;
        if !in_range {
            warn!(entity = %id, elapse_ms = elapse.num_milliseconds(), "legacy_window_out_of_range");
        }
        in_range
    })
}

impl PersistentStore for MurderSystem {
    fn store_name(&self) -> &'static str {
        MURDER_STORE
    }

    fn encode(&self) -> Vec<u8> {
        encode_registry(&MURDER_SCHEMA, &self.registry)
    }

    fn restore(
        &mut self,
        payload: &[u8],
        resolver: &dyn EntityResolver,
    ) -> Result<StoreLoadSummary, PersistenceError> {
        let decoded = decode_registry(&MURDER_SCHEMA, payload, resolver)?;
        let summary = decoded.summary(MURDER_STORE);
        self.registry.clear();
        for (id, context) in decoded.records {
            if context.is_vacant() {
                continue;
            }
            self.registry.insert(id, context);
        }
        Ok(summary)
    }
}

pub(crate) const MURDER_SCHEMA: Schema<MurderContext> = Schema {
    store: MURDER_STORE,
    groups: &[
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

fn write_v1(context: &MurderContext, writer: &mut RecordWriter) {
    writer.write_opt_datetime(context.last_murder_at);
}

fn read_v1(reader: &mut RecordReader<'_>, context: &mut MurderContext) -> Result<(), CodecError> {
    context.last_murder_at = reader.read_opt_datetime()?;
    Ok(())
}

fn default_v1(context: &mut MurderContext) {
    context.last_murder_at = None;
}

fn write_v0(context: &MurderContext, writer: &mut RecordWriter) {
    writer.write_encoded_int(context.short_term_murders);
    writer.write_encoded_int(context.kills);
    writer.write_opt_time_delta(context.short_term_elapse);
    writer.write_opt_time_delta(context.long_term_elapse);
}

fn read_v0(reader: &mut RecordReader<'_>, context: &mut MurderContext) -> Result<(), CodecError> {
    context.short_term_murders = reader.read_encoded_int()?;
    context.kills = reader.read_encoded_int()?;
    context.short_term_elapse = reader.read_opt_time_delta()?;
    context.long_term_elapse = reader.read_opt_time_delta()?;
    Ok(())
}

fn default_v0(_: &mut MurderContext) {}
