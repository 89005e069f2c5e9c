use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::entity::{EntityId, EntityResolver};
use crate::registry::ContextRegistry;

use super::atomic_io::write_bytes_atomic;
use super::codec::{CodecError, RecordReader, RecordWriter};
use super::manifest::{manifest_path, write_manifest_atomic, SaveManifest, StoreManifestEntry};
use super::schema::Schema;

const MAGIC: &[u8; 4] = b"TSST";
pub const STORE_FRAME_VERSION: u16 = 1;
const STORE_FILE_EXTENSION: &str = "bin";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read/write store file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store file {path} has invalid frame: {message}")]
    InvalidFrame { path: PathBuf, message: String },
    #[error("store {store} header is unreadable: {source}")]
    Header {
        store: &'static str,
        #[source]
        source: CodecError,
    },
    #[error("store {store} was saved at version {found}; this build reads versions 0..={current}")]
    UnsupportedVersion {
        store: &'static str,
        found: i32,
        current: i32,
    },
    #[error("store {store} declares a negative record count ({count})")]
    NegativeCount { store: &'static str, count: i32 },
    #[error("store {store} record {index} is unreadable: {source}")]
    Record {
        store: &'static str,
        index: usize,
        #[source]
        source: CodecError,
    },
    #[error("store {store} has {trailing} unread bytes after its last record")]
    TrailingBytes { store: &'static str, trailing: usize },
    #[error("failed to write save manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },
}

impl PersistenceError {
    /// Format problems as opposed to I/O failures. Either refuses startup.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io { .. } | Self::Manifest { .. })
    }
}

/// A registry that can be flushed to and rebuilt from a store payload.
pub trait PersistentStore {
    fn store_name(&self) -> &'static str;
    fn encode(&self) -> Vec<u8>;
    /// Replaces the in-memory contents with the decoded payload.
    fn restore(
        &mut self,
        payload: &[u8],
        resolver: &dyn EntityResolver,
    ) -> Result<StoreLoadSummary, PersistenceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLoadSummary {
    pub store: &'static str,
    pub version: Option<i32>,
    pub loaded: usize,
    pub skipped_missing_entity: usize,
}

impl StoreLoadSummary {
    pub fn missing(store: &'static str) -> Self {
        Self {
            store,
            version: None,
            loaded: 0,
            skipped_missing_entity: 0,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.version.is_none()
    }
}

#[derive(Debug)]
pub struct DecodedStore<C> {
    pub version: i32,
    pub records: Vec<(EntityId, C)>,
    pub skipped_missing_entity: usize,
}

impl<C> DecodedStore<C> {
    pub fn summary(&self, store: &'static str) -> StoreLoadSummary {
        StoreLoadSummary {
            store,
            version: Some(self.version),
            loaded: self.records.len(),
            skipped_missing_entity: self.skipped_missing_entity,
        }
    }
}

/// `i32 version | i32 count | (entity, fields)*` with keys in ascending
/// order, so equal registries always produce equal bytes.
pub fn encode_registry<C: 'static>(schema: &Schema<C>, registry: &ContextRegistry<C>) -> Vec<u8> {
    encode_records(
        schema,
        registry
            .keys_sorted()
            .into_iter()
            .filter_map(|key| registry.get(key).map(|context| (key, context))),
    )
}

pub fn encode_records<'a, C: 'static>(
    schema: &Schema<C>,
    records: impl IntoIterator<Item = (EntityId, &'a C)>,
) -> Vec<u8> {
    let records = records.into_iter().collect::<Vec<_>>();
    let mut writer = RecordWriter::new();
    writer.write_i32(schema.current_version());
    writer.write_i32(records.len() as i32);
    for (key, context) in records {
        writer.write_entity(key);
        schema.write(context, &mut writer);
    }
    writer.into_bytes()
}

pub fn decode_registry<C: Default + 'static>(
    schema: &Schema<C>,
    payload: &[u8],
    resolver: &dyn EntityResolver,
) -> Result<DecodedStore<C>, PersistenceError> {
    let store = schema.store;
    let mut reader = RecordReader::new(payload);
    let (version, count) = read_header(&mut reader)
        .map_err(|source| PersistenceError::Header { store, source })?;
    if !schema.supports(version) {
        return Err(PersistenceError::UnsupportedVersion {
            store,
            found: version,
            current: schema.current_version(),
        });
    }
    let count = usize::try_from(count)
        .map_err(|_| PersistenceError::NegativeCount { store, count })?;

    let mut records = Vec::with_capacity(count.min(reader.remaining()));
    let mut skipped_missing_entity = 0usize;
    for index in 0..count {
        let owner = reader
            .read_entity()
            .map_err(|source| PersistenceError::Record { store, index, source })?;
        let context = schema
            .read(version, &mut reader)
            .map_err(|source| PersistenceError::Record { store, index, source })?;
        if !resolver.resolve(owner) {
            warn!(store, entity = %owner, "store_record_owner_missing; skipping");
            skipped_missing_entity += 1;
            continue;
        }
        records.push((owner, context));
    }

    if reader.remaining() > 0 {
        return Err(PersistenceError::TrailingBytes {
            store,
            trailing: reader.remaining(),
        });
    }

    Ok(DecodedStore {
        version,
        records,
        skipped_missing_entity,
    })
}

fn read_header(reader: &mut RecordReader<'_>) -> Result<(i32, i32), CodecError> {
    let version = reader.read_i32()?;
    let count = reader.read_i32()?;
    Ok((version, count))
}

pub fn store_path(data_dir: &Path, store: &str) -> PathBuf {
    data_dir.join(format!("{store}.{STORE_FILE_EXTENSION}"))
}

/// Frames `payload` as `magic | frame version | store name | length |
/// sha256 | payload` and writes it atomically.
pub fn write_store_file(path: &Path, store: &str, payload: &[u8]) -> Result<[u8; 32], PersistenceError> {
    let name = store.as_bytes();
    if name.len() > u16::MAX as usize {
        return Err(invalid_frame(path, "store name too long for u16 length"));
    }
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| invalid_frame(path, "payload larger than u32 length"))?;
    let payload_hash = sha256_bytes(payload);

    let mut bytes = Vec::<u8>::with_capacity(payload.len() + name.len() + 44);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&STORE_FRAME_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
    bytes.extend_from_slice(name);
    bytes.extend_from_slice(&payload_len.to_le_bytes());
    bytes.extend_from_slice(&payload_hash);
    bytes.extend_from_slice(payload);

    write_bytes_atomic(path, &bytes).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(payload_hash)
}

/// `Ok(None)` when the file does not exist: a store that was never saved
/// is an empty store, not an error.
pub fn read_store_file(path: &Path, store: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut reader = RecordReader::new(&bytes);
    let frame_err = |error: CodecError| invalid_frame(path, &error.to_string());

    if reader.read_exact(4).map_err(frame_err)? != MAGIC {
        return Err(invalid_frame(path, "invalid magic"));
    }
    let frame_version = u16::from_le_bytes(
        reader
            .read_exact(2)
            .map_err(frame_err)?
            .try_into()
            .map_err(|_| invalid_frame(path, "invalid u16 encoding"))?,
    );
    if frame_version != STORE_FRAME_VERSION {
        return Err(invalid_frame(
            path,
            &format!("unsupported frame version {frame_version}"),
        ));
    }
    let name_len = u16::from_le_bytes(
        reader
            .read_exact(2)
            .map_err(frame_err)?
            .try_into()
            .map_err(|_| invalid_frame(path, "invalid u16 encoding"))?,
    ) as usize;
    let name = reader.read_exact(name_len).map_err(frame_err)?;
    if name != store.as_bytes() {
        return Err(invalid_frame(
            path,
            &format!(
                "file belongs to store {:?}, expected {store:?}",
                String::from_utf8_lossy(name)
            ),
        ));
    }
    let payload_len = u32::from_le_bytes(
        reader
            .read_exact(4)
            .map_err(frame_err)?
            .try_into()
            .map_err(|_| invalid_frame(path, "invalid u32 encoding"))?,
    ) as usize;
    let expected_hash = reader.read_exact(32).map_err(frame_err)?;
    let payload = reader.read_exact(payload_len).map_err(frame_err)?;
    if reader.remaining() > 0 {
        return Err(invalid_frame(path, "unexpected trailing bytes"));
    }
    if expected_hash != sha256_bytes(payload) {
        return Err(invalid_frame(path, "payload hash mismatch"));
    }

    Ok(Some(payload.to_vec()))
}

/// Writes every store, then the manifest describing them.
pub fn save_stores(
    data_dir: &Path,
    stores: &[&dyn PersistentStore],
    saved_at: DateTime<Utc>,
) -> Result<SaveManifest, PersistenceError> {
    let mut entries = Vec::with_capacity(stores.len());
    for store in stores {
        let name = store.store_name();
        let payload = store.encode();
        let path = store_path(data_dir, name);
        let hash = write_store_file(&path, name, &payload)?;

        let (version, records) = read_header(&mut RecordReader::new(&payload))
            .map_err(|source| PersistenceError::Header { store: name, source })?;
        entries.push(StoreManifestEntry {
            store: name.to_string(),
            version,
            records: records.max(0) as u32,
            payload_sha256_hex: to_hex_lower(&hash),
            bytes: payload.len() as u64,
        });
        info!(store = name, version, records, bytes = payload.len(), "store_saved");
    }

    let manifest = SaveManifest {
        frame_version: STORE_FRAME_VERSION,
        saved_at,
        stores: entries,
    };
    write_manifest_atomic(&manifest_path(data_dir), &manifest)?;
    Ok(manifest)
}

/// Rebuilds every store from `data_dir`. The first store that fails to
/// decode aborts the load.
pub fn load_stores(
    data_dir: &Path,
    stores: &mut [&mut dyn PersistentStore],
    resolver: &dyn EntityResolver,
) -> Result<Vec<StoreLoadSummary>, PersistenceError> {
    let mut summaries = Vec::with_capacity(stores.len());
    for store in stores.iter_mut() {
        let name = store.store_name();
        let path = store_path(data_dir, name);
        let summary = match read_store_file(&path, name)? {
            Some(payload) => store.restore(&payload, resolver)?,
            None => {
                info!(store = name, path = %path.display(), "store_missing; starting empty");
                StoreLoadSummary::missing(name)
            }
        };
        if !summary.is_missing() {
            info!(
                store = name,
                version = summary.version,
                loaded = summary.loaded,
                skipped_missing_entity = summary.skipped_missing_entity,
                "store_loaded"
            );
        }
        summaries.push(summary);
    }
    Ok(summaries)
}

fn sha256_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

fn invalid_frame(path: &Path, message: &str) -> PersistenceError {
    PersistenceError::InvalidFrame {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}
