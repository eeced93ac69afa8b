//! Content-addressed model store for cpack.
//!
//! Models are stored once per sha256 digest under `<root>/store/models/<digest>`.
//! Writes go through a hashing [`StagingFile`] in the store's staging directory and
//! are published with a no-clobber rename, so readers never observe a partial
//! entry. Entries are made read-only once published and materialized into
//! workspaces by symlink, hard link, or (as a last resort) copy.

pub mod hash_cache;
pub mod hasher;
pub mod integrity;
pub mod layout;
pub mod link;
pub mod models;
pub mod staging;

pub use hash_cache::HashCache;
pub use hasher::{hash_bytes, hash_file, hash_reader, CHUNK_SIZE};
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use link::{LinkMode, LinkOutcome};
pub use models::{ModelStore, PutMode};
pub use staging::{StagedModel, StagingFile};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding rename into it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("integrity check failed for model '{digest}': expected {expected}, got {actual}")]
    Integrity {
        digest: String,
        expected: String,
        actual: String,
    },
    #[error("model not found in store: {0}")]
    NotFound(String),
    #[error("{} is occupied by a different file and will not be overwritten", path.display())]
    DestinationOccupied { path: PathBuf },
    #[error("invalid digest '{0}'")]
    InvalidDigest(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
