use crate::hasher::finalize;
use crate::StoreError;
use cpack_schema::Digest;
use sha2::{Digest as _, Sha256};
use std::io::{self, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};

/// An in-progress store write that hashes bytes as they arrive.
///
/// Dropping it without calling [`finish`](Self::finish) deletes the temp file.
pub struct StagingFile {
    file: NamedTempFile,
    hasher: Sha256,
    written: u64,
}

/// A fully written staging file with its computed digest, ready to be committed.
///
/// Dropping it deletes the temp file.
#[derive(Debug)]
pub struct StagedModel {
    pub(crate) path: TempPath,
    digest: Digest,
    size: u64,
}

impl StagingFile {
    pub(crate) fn new_in(dir: &Path) -> Result<Self, StoreError> {
        let file = tempfile::Builder::new()
            .prefix(".stage-")
            .tempfile_in(dir)
            .map_err(|e| StoreError::io(dir, e))?;
        Ok(Self {
            file,
            hasher: Sha256::new(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush to disk and compute the digest.
    pub fn finish(mut self) -> Result<StagedModel, StoreError> {
        let path = self.file.path().to_path_buf();
        self.file.flush().map_err(|e| StoreError::io(&path, e))?;
        self.file
            .as_file()
            .sync_all()
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(StagedModel {
            path: self.file.into_temp_path(),
            digest: finalize(self.hasher),
            size: self.written,
        })
    }
}

impl Write for StagingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl StagedModel {
    pub(crate) fn from_parts(path: TempPath, digest: Digest, size: u64) -> Self {
        Self { path, digest, size }
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
