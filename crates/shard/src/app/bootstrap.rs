use std::path::{Path, PathBuf};

use engine::persistence::{read_manifest, ManifestReadState};
use engine::{resolve_app_paths, AppError, Clock, DecayEngine, LoopConfig, SystemClock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::config::{load_config_from_env, ShardConfig};
use super::world::WorldState;

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) engine: DecayEngine,
    pub(crate) world: WorldState,
    pub(crate) data_dir: PathBuf,
}

pub(crate) fn build_app() -> Result<AppWiring, AppError> {
    init_tracing();
    info!("=== Shard Startup ===");

    let config = load_config_from_env()?;
    let paths = resolve_app_paths(config.data_dir.as_deref())?;
    info!(
        root = %paths.root.display(),
        data_dir = %paths.data_dir.display(),
        "app_paths"
    );
    wire(config, &paths.data_dir)
}

fn wire(config: ShardConfig, data_dir: &Path) -> Result<AppWiring, AppError> {
    log_previous_save(data_dir);

    let world = WorldState::from_roster(&config.roster);
    let mut engine = DecayEngine::new(config.decay, SystemClock.now());
    let summaries = engine.load(data_dir, &world).map_err(AppError::Load)?;
    engine.start();
    info!(
        mobiles = world.len(),
        stores_restored = summaries.iter().filter(|summary| !summary.is_missing()).count(),
        "world_ready"
    );

    Ok(AppWiring {
        config: config.loop_config,
        engine,
        world,
        data_dir: data_dir.to_path_buf(),
    })
}

fn log_previous_save(data_dir: &Path) {
    match read_manifest(data_dir) {
        Ok(ManifestReadState::Present(manifest)) => info!(
            saved_at = %manifest.saved_at,
            stores = manifest.stores.len(),
            "previous_save_found"
        ),
        Ok(ManifestReadState::Missing) => info!("no_previous_save"),
        Ok(ManifestReadState::Unreadable) => {
            warn!("save manifest unreadable; loading store files directly")
        }
        Err(err) => warn!(error = %err, "save manifest read failed"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use engine::features::murder::MURDER_STORE;
    use engine::persistence::{manifest_path, store_path};
    use engine::EntityId;
    use tempfile::TempDir;

    use super::*;
    use crate::app::config::RosterEntry;

    fn roster_config() -> ShardConfig {
        ShardConfig {
            roster: vec![RosterEntry { id: 1, body: 0x190, online: false }],
            ..ShardConfig::default()
        }
    }

    #[test]
    fn wire_starts_sweep_on_empty_data_dir() {
        let temp = TempDir::new().expect("temp");
        let wiring = wire(roster_config(), temp.path()).expect("wire");

        assert!(wiring.engine.systems().murders.sweep_timer().is_some());
        assert_eq!(wiring.world.len(), 1);
        assert_eq!(wiring.data_dir, temp.path());
    }

    #[test]
    fn wire_restores_previous_save() {
        let temp = TempDir::new().expect("temp");
        {
            let mut wiring = wire(roster_config(), temp.path()).expect("wire");
            wiring.engine.set_murder_counts(EntityId(1), 3, 7, false);
            wiring.engine.save(temp.path()).expect("save");
        }
        assert!(manifest_path(temp.path()).exists());

        let wiring = wire(roster_config(), temp.path()).expect("rewire");
        assert_eq!(wiring.engine.murder_counts(EntityId(1)), (3, 7));
    }

    #[test]
    fn wire_fails_on_corrupt_store() {
        let temp = TempDir::new().expect("temp");
        std::fs::write(
            store_path(temp.path(), MURDER_STORE),
            b"garbage",
        )
        .expect("write");

        let err = wire(roster_config(), temp.path())
            .err()
            .expect("corrupt store should fail");
        assert!(matches!(err, AppError::Load(ref source) if source.is_corruption()));
    }
}
