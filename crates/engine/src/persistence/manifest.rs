use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::atomic_io::write_text_atomic;
use super::store::PersistenceError;

pub(crate) const SAVE_MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SaveManifest {
    pub frame_version: u16,
    pub saved_at: DateTime<Utc>,
    pub stores: Vec<StoreManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreManifestEntry {
    pub store: String,
    pub version: i32,
    pub records: u32,
    pub payload_sha256_hex: String,
    pub bytes: u64,
}

/// The manifest is informational; a missing or garbled one never blocks a
/// load, the store files are authoritative.
#[derive(Debug, Clone)]
pub enum ManifestReadState {
    Missing,
    Unreadable,
    Present(SaveManifest),
}

pub fn manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SAVE_MANIFEST_FILE)
}

pub fn read_manifest(data_dir: &Path) -> Result<ManifestReadState, PersistenceError> {
    let path = manifest_path(data_dir);
    if !path.exists() {
        return Ok(ManifestReadState::Missing);
    }

    let raw = fs::read_to_string(&path).map_err(|source| PersistenceError::Io {
        path: path.clone(),
        source,
    })?;
    match serde_json::from_str::<SaveManifest>(&raw) {
        Ok(manifest) => Ok(ManifestReadState::Present(manifest)),
        Err(_) => Ok(ManifestReadState::Unreadable),
    }
}

pub(crate) fn write_manifest_atomic(
    path: &Path,
    manifest: &SaveManifest,
) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(manifest).map_err(|error| {
        PersistenceError::Manifest {
            path: path.to_path_buf(),
            message: format!("failed to encode manifest json: {error}"),
        }
    })?;
    write_text_atomic(path, &text).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn manifest_roundtrip_and_missing_state() {
        let temp = TempDir::new().expect("temp");
        assert!(matches!(
            read_manifest(temp.path()).expect("read"),
            ManifestReadState::Missing
        ));

        let manifest = SaveManifest {
            frame_version: 1,
            saved_at: Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap(),
            stores: vec![StoreManifestEntry {
                store: "PlayerMurders".to_string(),
                version: 1,
                records: 3,
                payload_sha256_hex: "ab".repeat(32),
                bytes: 120,
            }],
        };
        write_manifest_atomic(&manifest_path(temp.path()), &manifest).expect("write");

        match read_manifest(temp.path()).expect("read") {
            ManifestReadState::Present(read_back) => assert_eq!(read_back, manifest),
            other => panic!("expected manifest, got {other:?}"),
        }
    }

    #[test]
    fn garbled_manifest_is_unreadable_not_an_error() {
        let temp = TempDir::new().expect("temp");
        fs::write(manifest_path(temp.path()), "{ not json").expect("write");
        assert!(matches!(
            read_manifest(temp.path()).expect("read"),
            ManifestReadState::Unreadable
        ));
    }
}
