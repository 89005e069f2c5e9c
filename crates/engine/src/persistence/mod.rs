mod atomic_io;
mod codec;
mod manifest;
mod schema;
mod store;

pub use codec::{CodecError, RecordReader, RecordWriter, MAX_TIME_SPAN};
pub use manifest::{manifest_path, read_manifest, ManifestReadState, SaveManifest, StoreManifestEntry};
pub use schema::{FieldGroup, Schema};
pub use store::{
    decode_registry, encode_records, encode_registry, load_stores, read_store_file, save_stores,
    store_path, write_store_file, DecodedStore, PersistenceError, PersistentStore,
    StoreLoadSummary, STORE_FRAME_VERSION,
};
