use crate::hasher::hash_file;
use crate::{fsync_dir, StoreError};
use cpack_schema::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    size: u64,
    mtime_ns: u64,
    digest: Digest,
}

/// Persistent map from absolute file path to its last known digest.
///
/// An entry is trusted only while both size and modification time are unchanged.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
    hits: usize,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, CacheEntry>,
}

fn stat(path: &Path) -> Result<(u64, u64), StoreError> {
    let meta = fs::metadata(path).map_err(|e| StoreError::io(path, e))?;
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos() as u64);
    Ok((meta.len(), mtime_ns))
}

impl HashCache {
    /// Load the cache at `path`. A missing file yields an empty cache; an
    /// unreadable one is discarded with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CacheFile>(&content) {
                Ok(file) => file.entries,
                Err(e) => {
                    warn!("ignoring corrupt hash cache {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries,
            dirty: false,
            hits: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups served without rehashing since load.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Digest of `file`, from the cache when size and mtime still match.
    pub fn digest_for(&mut self, file: &Path) -> Result<Digest, StoreError> {
        let abs = file
            .canonicalize()
            .map_err(|e| StoreError::io(file, e))?;
        let key = abs.to_string_lossy().into_owned();
        let (size, mtime_ns) = stat(&abs)?;

        if let Some(entry) = self.entries.get(&key) {
            if entry.size == size && entry.mtime_ns == mtime_ns {
                self.hits += 1;
                return Ok(entry.digest.clone());
            }
        }

        debug!("hashing {}", abs.display());
        let digest = hash_file(&abs)?;
        self.entries.insert(
            key,
            CacheEntry {
                size,
                mtime_ns,
                digest: digest.clone(),
            },
        );
        self.dirty = true;
        Ok(digest)
    }

    /// Write the cache back atomically if anything changed.
    pub fn save(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let content = serde_json::to_string(&CacheFile {
            entries: self.entries.clone(),
        })?;
        let io = |e| StoreError::io(&self.path, e);
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io)?;
        tmp.write_all(content.as_bytes()).map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(&self.path).map_err(|e| io(e.error))?;
        fsync_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;
    use std::time::{Duration, SystemTime};

    #[test]
    fn second_lookup_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.bin");
        fs::write(&file, b"weights").unwrap();

        let mut cache = HashCache::load(dir.path().join("cache.json"));
        assert_eq!(cache.digest_for(&file).unwrap(), hash_bytes(b"weights"));
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.digest_for(&file).unwrap(), hash_bytes(b"weights"));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.bin");
        fs::write(&file, b"weights").unwrap();
        let cache_path = dir.path().join("cache.json");

        let mut cache = HashCache::load(&cache_path);
        cache.digest_for(&file).unwrap();
        cache.save().unwrap();

        let mut reloaded = HashCache::load(&cache_path);
        assert_eq!(reloaded.len(), 1);
        reloaded.digest_for(&file).unwrap();
        assert_eq!(reloaded.hits(), 1);
    }

    #[test]
    fn changed_file_is_rehashed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.bin");
        fs::write(&file, b"weights").unwrap();

        let mut cache = HashCache::load(dir.path().join("cache.json"));
        cache.digest_for(&file).unwrap();

        fs::write(&file, b"new weights!").unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(
            cache.digest_for(&file).unwrap(),
            hash_bytes(b"new weights!")
        );
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn corrupt_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        fs::write(&cache_path, b"{not json").unwrap();
        let cache = HashCache::load(&cache_path);
        assert!(cache.is_empty());
    }
}
