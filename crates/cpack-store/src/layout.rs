use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";
const HASH_CACHE_FILE: &str = "hash-cache.json";

/// Directory layout of the machine-wide model store.
///
/// Everything lives under `<root>/store`. Directories are created lazily on
/// [`initialize`](Self::initialize) and never deleted by cpack.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn models_dir(&self) -> PathBuf {
        self.store_dir().join("models")
    }

    #[inline]
    pub fn model_path(&self, digest: &str) -> PathBuf {
        self.models_dir().join(digest)
    }

    /// Uniquely named in-progress writes. Same filesystem as `models_dir`.
    #[inline]
    pub fn staging_dir(&self) -> PathBuf {
        self.store_dir().join("staging")
    }

    #[inline]
    pub fn hash_cache_path(&self) -> PathBuf {
        self.store_dir().join(HASH_CACHE_FILE)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        for dir in [self.models_dir(), self.staging_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.store_dir();
            let io = |e| StoreError::io(&version_path, e);
            let mut tmp = NamedTempFile::new_in(&store_dir).map_err(io)?;
            tmp.write_all(content.as_bytes()).map_err(io)?;
            tmp.as_file().sync_all().map_err(io)?;
            // A concurrent initializer may have won; its file is identical.
            if let Err(e) = tmp.persist_noclobber(&version_path) {
                if e.error.kind() != std::io::ErrorKind::AlreadyExists {
                    return Err(io(e.error));
                }
            }
            crate::fsync_dir(&store_dir).map_err(|e| StoreError::io(&store_dir, e))?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content =
            fs::read_to_string(&version_path).map_err(|e| StoreError::io(&version_path, e))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
