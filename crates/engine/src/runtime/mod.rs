use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::entity::{EntityId, EntityResolver, LifecycleEvent, MobileHost};
use crate::features::mount_block::{MountBlockReason, MountBlockSystem};
use crate::features::murder::{
    MurderSystem, MurderWindows, DEFAULT_LONG_TERM_WINDOW, DEFAULT_SHORT_TERM_WINDOW,
    DEFAULT_SWEEP_INTERVAL,
};
use crate::features::stat_mods::{Stat, StatModSystem};
use crate::features::transform::{CastOutcome, TransformSpec, TransformSystem};
use crate::features::virtue::{AwardOutcome, VirtueName, VirtueSystem};
use crate::persistence::{
    load_stores, save_stores, PersistenceError, PersistentStore, SaveManifest, StoreLoadSummary,
};
use crate::playtime::PlaytimeLedger;
use crate::registry::Residency;
use crate::scheduler::{CallbackError, Scheduler, TickReport, TimerHandle};


/// What a scheduled timer is for. Every timer in the engine carries one of
/// these and is routed through `FeatureSystems::dispatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    DecaySweep,
    TransformTick(EntityId),
    MountBlockExpired(EntityId),
    StatModExpired { entity: EntityId, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub short_term_window_minutes: u32,
    pub long_term_window_minutes: u32,
    pub sweep_interval_secs: u32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            short_term_window_minutes: DEFAULT_SHORT_TERM_WINDOW.num_minutes() as u32,
            long_term_window_minutes: DEFAULT_LONG_TERM_WINDOW.num_minutes() as u32,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.num_seconds() as u32,
        }
    }
}

impl DecayConfig {
    pub fn windows(&self) -> MurderWindows {
        MurderWindows {
            short_term: non_zero_or(
                TimeDelta::minutes(self.short_term_window_minutes.into()),
                DEFAULT_SHORT_TERM_WINDOW,
            ),
            long_term: non_zero_or(
                TimeDelta::minutes(self.long_term_window_minutes.into()),
                DEFAULT_LONG_TERM_WINDOW,
            ),
        }
    }

    pub fn sweep_interval(&self) -> TimeDelta {
        non_zero_or(
            TimeDelta::seconds(self.sweep_interval_secs.into()),
            DEFAULT_SWEEP_INTERVAL,
        )
    }
}

fn non_zero_or(value: TimeDelta, fallback: TimeDelta) -> TimeDelta {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

/// Every per-entity system, kept apart from the scheduler so a timer
/// callback can borrow both at once.
#[derive(Debug)]
pub struct FeatureSystems {
    pub playtime: PlaytimeLedger,
    pub murders: MurderSystem,
    pub virtues: VirtueSystem,
    pub transforms: TransformSystem,
    pub mount_blocks: MountBlockSystem,
    pub stat_mods: StatModSystem,
}

impl FeatureSystems {
    pub fn new(windows: MurderWindows) -> Self {
        Self {
            playtime: PlaytimeLedger::new(),
            murders: MurderSystem::new(windows),
            virtues: VirtueSystem::new(),
            transforms: TransformSystem::new(),
            mount_blocks: MountBlockSystem::new(),
            stat_mods: StatModSystem::new(),
        }
    }

    pub fn dispatch(
        &mut self,
        scheduler: &mut Scheduler<TimerEvent>,
        handle: TimerHandle,
        event: &TimerEvent,
        host: &mut dyn MobileHost,
    ) -> Result<(), CallbackError> {
        let now = scheduler.now();
        match event {
            TimerEvent::DecaySweep => {
                if self.murders.sweep_timer() != Some(handle) {
                    scheduler.cancel(handle);
                    return Ok(());
                }
                let murders = self.murders.sweep(now, &self.playtime);
                let virtues = self.virtues.sweep(now);
                let healed = murders.orphans_healed + virtues.orphans_healed;
                if healed > 0 {
                    return Err(CallbackError::new(
                        "decay_sweep",
                        format!("healed {healed} active entries without a context"),
                    ));
                }
            }
            TimerEvent::TransformTick(id) => {
                self.transforms.on_tick(*id, handle, host, scheduler);
            }
            TimerEvent::MountBlockExpired(id) => {
                self.mount_blocks.on_expired(*id, handle);
            }
            TimerEvent::StatModExpired { entity, name } => {
                self.stat_mods.on_expired(*entity, name, handle);
            }
        }
        Ok(())
    }

    /// Contexts currently in an active index, across every system.
    pub fn active_contexts(&self) -> usize {
        self.murders.registry().active_len()
            + self.virtues.registry().active_len()
            + self.transforms.registry().active_len()
            + self.mount_blocks.registry().active_len()
            + self.stat_mods.registry().active_len()
    }
}

/// The temporal state engine: one scheduler, every feature system, and the
/// load/save boundary. Time only moves when `tick` is called; gameplay
/// entry points act at the time of the latest tick.
#[derive(Debug)]
pub struct DecayEngine {
    scheduler: Scheduler<TimerEvent>,
    systems: FeatureSystems,
    config: DecayConfig,
    totals: TickReport,
}

impl DecayEngine {
    pub fn new(config: DecayConfig, start: DateTime<Utc>) -> Self {
        Self {
            scheduler: Scheduler::new(start),
            systems: FeatureSystems::new(config.windows()),
            config,
            totals: TickReport::default(),
        }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.scheduler.now()
    }

    pub fn scheduler(&self) -> &Scheduler<TimerEvent> {
        &self.scheduler
    }

    pub fn systems(&self) -> &FeatureSystems {
        &self.systems
    }

    pub fn totals(&self) -> TickReport {
        self.totals
    }

    pub fn start(&mut self) -> TimerHandle {
        let interval = self.config.sweep_interval();
        self.systems
            .murders
            .start_sweep(&mut self.scheduler, interval, TimerEvent::DecaySweep)
    }

    pub fn stop(&mut self) {
        self.systems.murders.stop_sweep(&mut self.scheduler);
    }

    pub fn tick(&mut self, now: DateTime<Utc>, host: &mut dyn MobileHost) -> TickReport {
        let systems = &mut self.systems;
        let report = self.scheduler.tick(now, |scheduler, handle, event| {
            systems.dispatch(scheduler, handle, event, &mut *host)
        });
        self.totals.merge(report);
        report
    }

    pub fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        let now = self.now();
        let systems = &mut self.systems;
        match event {
            LifecycleEvent::Connected(id) => {
                systems.playtime.connect(id, now);
                systems.murders.on_connected(id, now, &systems.playtime);
            }
            LifecycleEvent::Disconnected(id) => {
                systems.playtime.disconnect(id, now);
                systems.murders.on_disconnected(id);
            }
            LifecycleEvent::Removed(id) => {
                systems.playtime.remove(id);
                systems.murders.on_removed(id);
                systems.virtues.on_removed(id);
                systems.transforms.forget(id, &mut self.scheduler);
                systems.mount_blocks.clear_block(id, &mut self.scheduler);
                systems.stat_mods.clear(id, &mut self.scheduler);
                info!(entity = %id, "entity_contexts_evicted");
            }
        }
    }

    pub fn record_murder(&mut self, id: EntityId) -> Residency {
        let now = self.now();
        let systems = &mut self.systems;
        systems.murders.record_murder(id, now, &systems.playtime)
    }

    pub fn set_murder_counts(
        &mut self,
        id: EntityId,
        short_term_murders: u32,
        kills: u32,
        keep_running_windows: bool,
    ) -> Residency {
        let now = self.now();
        let systems = &mut self.systems;
        systems.murders.set_counts(
            id,
            short_term_murders,
            kills,
            !keep_running_windows,
            now,
            &systems.playtime,
        )
    }

    pub fn murder_counts(&self, id: EntityId) -> (u32, u32) {
        self.systems.murders.counts(id)
    }

    pub fn award_virtue(&mut self, id: EntityId, virtue: VirtueName, amount: u32) -> AwardOutcome {
        let now = self.now();
        self.systems.virtues.award(id, virtue, amount, now)
    }

    pub fn check_virtue_atrophy(&mut self, id: EntityId, virtue: VirtueName) -> bool {
        let now = self.now();
        self.systems.virtues.check_atrophy(id, virtue, now)
    }

    /// Starts an honor use; `false` while the five minute cooldown runs.
    pub fn use_honor(&mut self, id: EntityId) -> bool {
        let now = self.now();
        self.systems.virtues.use_honor(id, now)
    }

    pub fn end_honor(&mut self, id: EntityId) {
        let now = self.now();
        self.systems.virtues.end_honor(id, now);
    }

    pub fn can_gain_sacrifice(&self, id: EntityId) -> bool {
        self.systems.virtues.can_gain_sacrifice(id, self.now())
    }

    pub fn record_sacrifice_gain(&mut self, id: EntityId) -> Residency {
        let now = self.now();
        self.systems.virtues.record_sacrifice_gain(id, now)
    }

    pub fn grant_resurrects(&mut self, id: EntityId, count: u32) {
        self.systems.virtues.grant_resurrects(id, count);
    }

    pub fn consume_resurrect(&mut self, id: EntityId) -> bool {
        let now = self.now();
        self.systems.virtues.consume_resurrect(id, now)
    }

    pub fn cast_transform(
        &mut self,
        id: EntityId,
        spec: &TransformSpec,
        host: &mut dyn MobileHost,
    ) -> CastOutcome {
        self.systems.transforms.cast(
            id,
            spec,
            host,
            &mut self.scheduler,
            TimerEvent::TransformTick(id),
        )
    }

    pub fn remove_transform(
        &mut self,
        id: EntityId,
        reset_graphics: bool,
        host: &mut dyn MobileHost,
    ) -> bool {
        self.systems
            .transforms
            .remove(id, reset_graphics, host, &mut self.scheduler)
    }

    /// Blocks mounting for `duration` (`None` until cleared). With
    /// `dismount` the rider is put on foot first; a mobile that was not
    /// riding but wears a non-humanoid form loses the form instead.
    pub fn set_mount_block(
        &mut self,
        id: EntityId,
        reason: MountBlockReason,
        duration: Option<TimeDelta>,
        dismount: bool,
        host: &mut dyn MobileHost,
    ) -> bool {
        if dismount && !host.dismount(id) {
            let animal_form = self
                .systems
                .transforms
                .context(id)
                .is_some_and(|context| !context.spec.is_humanoid());
            if animal_form {
                self.systems
                    .transforms
                    .remove(id, true, host, &mut self.scheduler);
            }
        }
        self.systems.mount_blocks.set_block(
            id,
            reason,
            duration,
            &mut self.scheduler,
            TimerEvent::MountBlockExpired(id),
        )
    }

    pub fn clear_mount_block(&mut self, id: EntityId) -> bool {
        self.systems
            .mount_blocks
            .clear_block(id, &mut self.scheduler)
    }

    pub fn mount_block_reason(&self, id: EntityId) -> Option<MountBlockReason> {
        self.systems.mount_blocks.reason(id, self.now())
    }

    pub fn add_stat_bonus(&mut self, id: EntityId, stat: Stat, bonus: i32, duration: TimeDelta) -> bool {
        self.systems
            .stat_mods
            .add_stat_bonus(id, stat, bonus, duration, &mut self.scheduler, |name| {
                stat_mod_event(id, name)
            })
    }

    pub fn add_stat_curse(&mut self, id: EntityId, stat: Stat, curse: i32, duration: TimeDelta) -> bool {
        self.systems
            .stat_mods
            .add_stat_curse(id, stat, curse, duration, &mut self.scheduler, |name| {
                stat_mod_event(id, name)
            })
    }

    pub fn add_stat_offset(&mut self, id: EntityId, stat: Stat, offset: i32, duration: TimeDelta) -> bool {
        self.systems
            .stat_mods
            .add_stat_offset(id, stat, offset, duration, &mut self.scheduler, |name| {
                stat_mod_event(id, name)
            })
    }

    pub fn remove_stat_mod(&mut self, id: EntityId, name: &str) -> bool {
        self.systems
            .stat_mods
            .remove_stat_mod(id, name, &mut self.scheduler)
    }

    pub fn stat_offset(&self, id: EntityId, stat: Stat) -> i32 {
        self.systems.stat_mods.offset(id, stat)
    }

    /// Writes every persisted store to `data_dir`. Open play sessions are
    /// folded into the playtime totals first. Unused virtue records are only
    /// dropped on load, so live cooldowns survive an autosave.
    pub fn save(&mut self, data_dir: &Path) -> Result<SaveManifest, PersistenceError> {
        let now = self.now();
        self.systems.playtime.checkpoint(now);

        let systems = &self.systems;
        let stores: [&dyn PersistentStore; 3] =
            [&systems.murders, &systems.virtues, &systems.playtime];
        save_stores(data_dir, &stores, now)
    }

    /// Replaces every persisted store with the contents of `data_dir`.
    /// Meant for startup, before any entity has connected.
    pub fn load(
        &mut self,
        data_dir: &Path,
        resolver: &dyn EntityResolver,
    ) -> Result<Vec<StoreLoadSummary>, PersistenceError> {
        let now = self.now();
        if self.systems.playtime.registry().active_len() > 0 {
            warn!(
                online = self.systems.playtime.registry().active_len(),
                "load_with_entities_online; sessions will be dropped"
            );
        }

        let systems = &mut self.systems;
        let mut stores: [&mut dyn PersistentStore; 3] = [
            &mut systems.murders,
            &mut systems.virtues,
            &mut systems.playtime,
        ];
        let summaries = load_stores(data_dir, &mut stores, resolver)?;

        systems.virtues.prune(now);
        systems.virtues.reindex(now);
        Ok(summaries)
    }
}

fn stat_mod_event(entity: EntityId, name: &str) -> TimerEvent {
    TimerEvent::StatModExpired {
        entity,
        name: name.to_string(),
    }
}
