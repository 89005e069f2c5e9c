mod loop_runner;
mod metrics;

pub use loop_runner::{run_server, AppError, LoopConfig, ServerSummary, ShardWorld, AUTOSAVE_ENV_VAR};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
