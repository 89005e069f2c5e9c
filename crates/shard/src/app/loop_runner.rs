use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use engine::{run_server, MetricsHandle, SystemClock};
use tracing::{error, info, warn};

use super::bootstrap::AppWiring;
use super::shutdown::{shutdown_signal, spawn_shutdown_watcher};

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        mut engine,
        mut world,
        data_dir,
    } = app;
    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(err) = spawn_shutdown_watcher(Arc::clone(&shutdown), shutdown_signal()) {
        warn!(error = %err, "shutdown_signal_unavailable; stop with run_duration_secs");
    }
    let metrics = MetricsHandle::default();

    let result = run_server(
        &config,
        &mut engine,
        &mut world,
        &SystemClock,
        &data_dir,
        &shutdown,
        &metrics,
    );
    let last = metrics.snapshot();
    info!(
        tps = last.tps,
        tick_time_ms = last.tick_time_ms,
        pending_timers = last.pending_timers,
        active_contexts = last.active_contexts,
        "final_loop_metrics"
    );

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server_failed");
            ExitCode::FAILURE
        }
    }
}
