use crate::hasher::hash_file;
use crate::layout::StoreLayout;
use crate::link::{materialize, LinkMode, LinkOutcome};
use crate::staging::{StagedModel, StagingFile};
use crate::{fsync_dir, StoreError};
use cpack_schema::Digest;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How [`ModelStore::put`] takes ownership of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Source stays where it is.
    Copy,
    /// Source is consumed. Falls back to copy-then-delete across filesystems.
    Move,
}

/// Content-addressed model store keyed by sha256.
///
/// An entry is written once through a staging file, published with a no-clobber
/// rename, and made read-only. Existing entries are never rewritten or repaired.
#[derive(Debug, Clone)]
pub struct ModelStore {
    layout: StoreLayout,
}

impl ModelStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Open the store at `root`, creating it on first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn entry_path(&self, digest: &Digest) -> Result<PathBuf, StoreError> {
        if !digest.is_valid() {
            return Err(StoreError::InvalidDigest(digest.to_string()));
        }
        Ok(self.layout.model_path(digest))
    }

    pub fn has(&self, digest: &Digest) -> bool {
        digest.is_valid() && self.layout.model_path(digest).is_file()
    }

    /// Path of an existing entry.
    pub fn get(&self, digest: &Digest) -> Result<PathBuf, StoreError> {
        let path = self.entry_path(digest)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(digest.to_string()));
        }
        Ok(path)
    }

    pub fn size_of(&self, digest: &Digest) -> Result<u64, StoreError> {
        let path = self.get(digest)?;
        let meta = fs::metadata(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(meta.len())
    }

    /// Begin a streaming write. Pair with [`commit`](Self::commit).
    pub fn stage(&self) -> Result<StagingFile, StoreError> {
        StagingFile::new_in(&self.layout.staging_dir())
    }

    /// Publish a staged file as the entry for `expected`.
    ///
    /// The staged digest must equal `expected`. If the entry already exists (another
    /// writer won the race), the staged copy is discarded.
    pub fn commit(&self, staged: StagedModel, expected: &Digest) -> Result<PathBuf, StoreError> {
        let dest = self.entry_path(expected)?;
        if staged.digest() != expected {
            return Err(StoreError::Integrity {
                digest: expected.to_string(),
                expected: expected.to_string(),
                actual: staged.digest().to_string(),
            });
        }

        if dest.is_file() {
            debug!("model {} already stored, discarding staged copy", expected.short());
            return Ok(dest);
        }

        set_read_only(&staged.path)?;
        let size = staged.size();
        match staged.path.persist_noclobber(&dest) {
            Ok(()) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("model {} committed concurrently", expected.short());
                return Ok(dest);
            }
            Err(e) => return Err(StoreError::io(&dest, e.error)),
        }
        let dir = self.layout.models_dir();
        fsync_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        info!("stored model {} ({size} bytes)", expected.short());
        Ok(dest)
    }

    /// Insert the file at `src` under `digest`.
    ///
    /// The source is hashed and must match `digest`. When the entry already exists
    /// `src` is left untouched.
    pub fn put(&self, digest: &Digest, src: &Path, mode: PutMode) -> Result<PathBuf, StoreError> {
        let dest = self.entry_path(digest)?;
        let src_len = fs::metadata(src)
            .map_err(|e| StoreError::io(src, e))?
            .len();

        if dest.is_file() {
            let existing = self.size_of(digest)?;
            if existing != src_len {
                return Err(StoreError::Integrity {
                    digest: digest.to_string(),
                    expected: format!("{existing} bytes"),
                    actual: format!("{src_len} bytes"),
                });
            }
            let actual = hash_file(src)?;
            if &actual != digest {
                return Err(StoreError::Integrity {
                    digest: digest.to_string(),
                    expected: digest.to_string(),
                    actual: actual.to_string(),
                });
            }
            debug!("model {} already stored", digest.short());
            return Ok(dest);
        }

        let staged = match mode {
            PutMode::Copy => self.stage_copy(src)?,
            PutMode::Move => self.stage_move(digest, src, src_len)?,
        };
        self.commit(staged, digest)
    }

    fn stage_copy(&self, src: &Path) -> Result<StagedModel, StoreError> {
        let mut input = fs::File::open(src).map_err(|e| StoreError::io(src, e))?;
        let mut staging = self.stage()?;
        io::copy(&mut input, &mut staging).map_err(|e| StoreError::io(src, e))?;
        staging.finish()
    }

    fn stage_move(
        &self,
        digest: &Digest,
        src: &Path,
        src_len: u64,
    ) -> Result<StagedModel, StoreError> {
        let actual = hash_file(src)?;
        if &actual != digest {
            return Err(StoreError::Integrity {
                digest: digest.to_string(),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        // Reserve a unique staging name, then rename the source over it.
        let staging = self.stage()?;
        let slot = staging.finish()?;
        match fs::rename(src, slot.path()) {
            Ok(()) => Ok(StagedModel::from_parts(slot.path, actual, src_len)),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                drop(slot);
                let staged = self.stage_copy(src)?;
                fs::remove_file(src).map_err(|e| StoreError::io(src, e))?;
                Ok(staged)
            }
            Err(e) => Err(StoreError::io(src, e)),
        }
    }

    /// Place the entry at `dest`. See [`LinkOutcome`] for the possible results.
    pub fn link(
        &self,
        digest: &Digest,
        dest: &Path,
        mode: LinkMode,
    ) -> Result<LinkOutcome, StoreError> {
        let entry = self.get(digest)?;
        let entry = entry
            .canonicalize()
            .map_err(|e| StoreError::io(&entry, e))?;
        materialize(&entry, digest, dest, mode)
    }

    /// Rehash an entry. A mismatch is reported, never repaired.
    pub fn verify(&self, digest: &Digest) -> Result<(), StoreError> {
        let path = self.get(digest)?;
        let actual = hash_file(&path)?;
        if &actual != digest {
            return Err(StoreError::Integrity {
                digest: digest.to_string(),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// All stored digests, sorted.
    pub fn list(&self) -> Result<Vec<Digest>, StoreError> {
        let dir = self.layout.models_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut digests = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if let Some(digest) = entry.file_name().to_str().and_then(Digest::parse) {
                digests.push(digest);
            }
        }
        digests.sort();
        Ok(digests)
    }
}

fn set_read_only(path: &Path) -> Result<(), StoreError> {
    let mut perms = fs::metadata(path)
        .map_err(|e| StoreError::io(path, e))?
        .permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).map_err(|e| StoreError::io(path, e))
}
