use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod app;
pub mod clock;
pub mod entity;
pub mod features;
pub mod persistence;
pub mod playtime;
pub mod registry;
pub mod runtime;
pub mod scheduler;

pub use app::{
    run_server, AppError, LoopConfig, LoopMetricsSnapshot, MetricsHandle, ServerSummary,
    ShardWorld, AUTOSAVE_ENV_VAR,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{EntityId, EntityResolver, LifecycleEvent, MobileHost};
pub use persistence::{PersistenceError, SaveManifest, StoreLoadSummary};
pub use registry::{ContextRegistry, Residency, SweepAction, SweepSummary, TrackedContext};
pub use runtime::{DecayConfig, DecayEngine, FeatureSystems, TimerEvent};
pub use scheduler::{CallbackError, Scheduler, TickReport, TimerHandle};

pub const ROOT_ENV_VAR: &str = "SHARD_ROOT";
pub const DATA_DIR_ENV_VAR: &str = "SHARD_DATA_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error("failed to create data directory at {path}: {source}")]
    CreateDataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "SHARD_ROOT is set but does not point to a valid shard root: {path}\n\
A valid root must contain Cargo.toml and either crates/ or data/."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error(
        "Could not detect shard root by walking upward from executable directory: {start_dir}\n\
Expected a directory containing Cargo.toml and either crates/ or data/.\n\
Set {env_var} explicitly, for example:\n\
Bash/zsh: export {env_var}=\"/srv/shard\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
    #[error("failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path} at `{field}`: {message}")]
    InvalidConfig {
        path: PathBuf,
        field: String,
        message: String,
    },
}

/// Resolves the shard root and its save directory, creating the latter.
/// `configured_data_dir` is relative to the root unless absolute;
/// `SHARD_DATA_DIR` overrides it.
pub fn resolve_app_paths(configured_data_dir: Option<&Path>) -> Result<AppPaths, StartupError> {
    let root = resolve_root()?;
    let data_dir = match env::var(DATA_DIR_ENV_VAR) {
        Ok(value) => PathBuf::from(value),
        Err(env::VarError::NotPresent) => configured_data_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("data")),
        Err(source) => {
            return Err(StartupError::EnvVar {
                var: DATA_DIR_ENV_VAR,
                source,
            })
        }
    };

    Ok(AppPaths {
        data_dir: prepare_data_dir(&root, &data_dir)?,
        root,
    })
}

fn prepare_data_dir(root: &Path, data_dir: &Path) -> Result<PathBuf, StartupError> {
    let data_dir = if data_dir.is_absolute() {
        data_dir.to_path_buf()
    } else {
        root.join(data_dir)
    };

    fs::create_dir_all(&data_dir).map_err(|source| StartupError::CreateDataDir {
        path: data_dir.clone(),
        source,
    })?;
    Ok(normalize_path(&data_dir))
}

fn resolve_root() -> Result<PathBuf, StartupError> {
    match env::var(ROOT_ENV_VAR) {
        Ok(value) => {
            let raw = PathBuf::from(value);
            let normalized = normalize_path(&raw);
            if is_root_marker(&normalized) {
                Ok(normalized)
            } else {
                Err(StartupError::InvalidEnvRoot { path: normalized })
            }
        }
        Err(env::VarError::NotPresent) => {
            let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
            let exe_dir = exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

            for candidate in exe_dir.ancestors() {
                if is_root_marker(candidate) {
                    return Ok(normalize_path(candidate));
                }
            }

            Err(StartupError::RootNotFound {
                start_dir: normalize_path(&exe_dir),
                env_var: ROOT_ENV_VAR,
            })
        }
        Err(source) => Err(StartupError::EnvVar {
            var: ROOT_ENV_VAR,
            source,
        }),
    }
}

fn is_root_marker(path: &Path) -> bool {
    let cargo_toml = path.join("Cargo.toml").is_file();
    let has_crates = path.join("crates").is_dir();
    let has_data = path.join("data").is_dir();

    cargo_toml && (has_crates || has_data)
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
