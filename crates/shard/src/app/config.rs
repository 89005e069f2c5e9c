use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use engine::{DecayConfig, LoopConfig, StartupError};
use serde::Deserialize;

pub(crate) const CONFIG_ENV_VAR: &str = "SHARD_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct ShardConfig {
    #[serde(rename = "loop")]
    pub(crate) loop_config: LoopConfig,
    pub(crate) decay: DecayConfig,
    pub(crate) data_dir: Option<PathBuf>,
    pub(crate) roster: Vec<RosterEntry>,
}

/// A mobile present in the world at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct RosterEntry {
    pub(crate) id: u64,
    #[serde(default = "default_body")]
    pub(crate) body: u16,
    #[serde(default)]
    pub(crate) online: bool,
}

fn default_body() -> u16 {
    0x190
}

/// Reads the file named by `SHARD_CONFIG`, or returns defaults when the
/// variable is unset.
pub(crate) fn load_config_from_env() -> Result<ShardConfig, StartupError> {
    match env::var(CONFIG_ENV_VAR) {
        Ok(value) => load_config(Path::new(&value)),
        Err(env::VarError::NotPresent) => Ok(ShardConfig::default()),
        Err(source) => Err(StartupError::EnvVar {
            var: CONFIG_ENV_VAR,
            source,
        }),
    }
}

pub(crate) fn load_config(path: &Path) -> Result<ShardConfig, StartupError> {
    let raw = fs::read_to_string(path).map_err(|source| StartupError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw).map_err(|(field, message)| StartupError::InvalidConfig {
        path: path.to_path_buf(),
        field,
        message,
    })
}

fn parse_config(raw: &str) -> Result<ShardConfig, (String, String)> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, ShardConfig>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        (path, source.to_string())
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = parse_config("{}").expect("parse");
        assert_eq!(config, ShardConfig::default());
    }

    #[test]
    fn nested_sections_override_defaults() {
        let config = parse_config(
            r#"{
                "loop": { "target_tps": 10, "autosave_interval_secs": 0 },
                "decay": { "sweep_interval_secs": 60 },
                "data_dir": "saves",
                "roster": [ { "id": 7, "online": true }, { "id": 9, "body": 217 } ]
            }"#,
        )
        .expect("parse");

        assert_eq!(config.loop_config.target_tps, 10);
        assert_eq!(config.loop_config.autosave_interval_secs, 0);
        assert_eq!(config.decay.sweep_interval_secs, 60);
        assert_eq!(config.decay.short_term_window_minutes, 480);
        assert_eq!(config.data_dir, Some(PathBuf::from("saves")));
        assert_eq!(
            config.roster,
            vec![
                RosterEntry { id: 7, body: 0x190, online: true },
                RosterEntry { id: 9, body: 217, online: false },
            ]
        );
    }

    #[test]
    fn type_error_reports_field_path() {
        let (field, _) = parse_config(r#"{ "decay": { "sweep_interval_secs": "often" } }"#)
            .expect_err("should fail");
        assert_eq!(field, "decay.sweep_interval_secs");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let temp = TempDir::new().expect("temp");
        let err = load_config(&temp.path().join("absent.json")).expect_err("should fail");
        assert!(matches!(err, StartupError::ReadConfig { .. }));
    }

    #[test]
    fn invalid_file_is_reported_with_path() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join("shard.json");
        fs::write(&path, r#"{ "roster": [ { "body": 1 } ] }"#).expect("write");

        let err = load_config(&path).expect_err("should fail");
        match err {
            StartupError::InvalidConfig { field, .. } => assert!(field.starts_with("roster[0]")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
