use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::entity::{LifecycleEvent, MobileHost};
use crate::persistence::PersistenceError;
use crate::runtime::DecayEngine;
use crate::scheduler::TickReport;
use crate::StartupError;

use super::metrics::MetricsAccumulator;
use super::MetricsHandle;

pub const AUTOSAVE_ENV_VAR: &str = "SHARD_AUTOSAVE_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta_ms: u64,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval_secs: u64,
    /// Zero disables autosave; state is still saved on shutdown.
    pub autosave_interval_secs: u64,
    pub run_duration_secs: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 20,
            max_frame_delta_ms: 250,
            max_ticks_per_frame: 5,
            metrics_log_interval_secs: 30,
            autosave_interval_secs: 300,
            run_duration_secs: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to load persisted state: {0}")]
    Load(#[source] PersistenceError),
    #[error("failed to save persisted state: {0}")]
    Save(#[source] PersistenceError),
}

/// The live world as seen by the server loop.
pub trait ShardWorld: MobileHost {
    /// Lifecycle events raised since the previous call, oldest first.
    fn drain_lifecycle(&mut self) -> Vec<LifecycleEvent>;

    /// Runs once per simulation step before timers fire.
    fn update(&mut self, _engine: &mut DecayEngine) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerSummary {
    pub ticks: u64,
    pub autosaves: u32,
    pub autosave_failures: u32,
    pub timers: TickReport,
}

/// Drives `engine` at a fixed step until `shutdown` is raised or the
/// configured run duration has passed, then saves one last time.
pub fn run_server<W: ShardWorld>(
    config: &LoopConfig,
    engine: &mut DecayEngine,
    world: &mut W,
    clock: &dyn Clock,
    data_dir: &Path,
    shutdown: &AtomicBool,
    metrics_handle: &MetricsHandle,
) -> Result<ServerSummary, AppError> {
    let target_tps = config.target_tps.max(1);
    let max_frame_delta = normalize_non_zero_duration(
        Duration::from_millis(config.max_frame_delta_ms),
        Duration::from_millis(250),
    );
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval = normalize_non_zero_duration(
        Duration::from_secs(config.metrics_log_interval_secs),
        Duration::from_secs(30),
    );
    let fixed_dt = Duration::from_secs_f64(1.0 / target_tps as f64);
    let autosave_interval = resolve_autosave_interval(config.autosave_interval_secs);
    let run_duration = config.run_duration_secs.map(Duration::from_secs);

    info!(
        target_tps,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        autosave_interval_s = autosave_interval.map_or(0, |interval| interval.as_secs()),
        run_duration_s = run_duration.map(|duration| duration.as_secs()),
        "loop_config"
    );

    let started = Instant::now();
    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = started;
    let mut last_save_instant = started;
    let mut metrics_accumulator = MetricsAccumulator::new(metrics_log_interval);
    let mut summary = ServerSummary::default();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!(reason = "shutdown_flag", "shutdown_requested");
            break;
        }
        if run_duration.is_some_and(|limit| started.elapsed() >= limit) {
            info!(reason = "run_duration", "shutdown_requested");
            break;
        }

        let now = Instant::now();
        let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
        last_frame_instant = now;

        let clamped_frame_dt = clamp_frame_delta(raw_frame_dt, max_frame_delta);
        accumulator = accumulator.saturating_add(clamped_frame_dt);

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for _ in 0..step_plan.ticks_to_run {
            let tick_started = Instant::now();
            for event in world.drain_lifecycle() {
                engine.handle_lifecycle(event);
            }
            world.update(engine);
            let report = engine.tick(clock.now(), world);
            summary.ticks += 1;
            summary.timers.merge(report);
            metrics_accumulator.record_tick(tick_started.elapsed(), report);
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }

        if autosave_interval.is_some_and(|interval| now.saturating_duration_since(last_save_instant) >= interval) {
            last_save_instant = now;
            match engine.save(data_dir) {
                Ok(manifest) => {
                    summary.autosaves += 1;
                    info!(stores = manifest.stores.len(), "autosave_complete");
                }
                Err(err) => {
                    summary.autosave_failures += 1;
                    error!(error = %err, "autosave_failed");
                }
            }
        }

        if let Some(snapshot) = metrics_accumulator.maybe_snapshot(
            now,
            engine.scheduler().pending_count(),
            engine.systems().active_contexts(),
        ) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                timers_fired = snapshot.timers_fired,
                timer_failures = snapshot.timer_failures,
                pending_timers = snapshot.pending_timers,
                active_contexts = snapshot.active_contexts,
                "loop_metrics"
            );
        }

        let sleep = compute_step_sleep(Instant::now().saturating_duration_since(now), fixed_dt);
        if sleep > Duration::ZERO {
            thread::sleep(sleep);
        }
    }

    engine.stop();
    engine.save(data_dir).map_err(AppError::Save)?;
    info!(
        ticks = summary.ticks,
        timers_fired = summary.timers.fired,
        timer_failures = summary.timers.failed,
        autosaves = summary.autosaves,
        "shutdown"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn compute_step_sleep(elapsed: Duration, fixed_dt: Duration) -> Duration {
    fixed_dt.saturating_sub(elapsed)
}

fn autosave_interval_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn resolve_autosave_interval(config_secs: u64) -> Option<Duration> {
    match env::var(AUTOSAVE_ENV_VAR) {
        Ok(value) => match value.parse::<u64>() {
            Ok(secs) => autosave_interval_from_secs(secs),
            Err(_) => {
                warn!(
                    env_var = AUTOSAVE_ENV_VAR,
                    value = value.as_str(),
                    "invalid autosave env var value; falling back to config"
                );
                autosave_interval_from_secs(config_secs)
            }
        },
        Err(env::VarError::NotPresent) => autosave_interval_from_secs(config_secs),
        Err(err) => {
            warn!(
                env_var = AUTOSAVE_ENV_VAR,
                error = %err,
                "unable to read autosave env var; falling back to config"
            );
            autosave_interval_from_secs(config_secs)
        }
    }
}
