//! Materialize store entries into workspaces.

use crate::hasher::hash_file;
use crate::StoreError;
use cpack_schema::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// How a store entry is placed at its usage path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    #[default]
    Symlink,
    Hardlink,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMode::Symlink => f.write_str("symlink"),
            LinkMode::Hardlink => f.write_str("hardlink"),
        }
    }
}

impl FromStr for LinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symlink" => Ok(LinkMode::Symlink),
            "hardlink" => Ok(LinkMode::Hardlink),
            other => Err(format!(
                "unknown link mode '{other}' (expected symlink or hardlink)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Hardlinked,
    Symlinked,
    /// Neither link kind was possible; the bytes were duplicated.
    Copied,
    /// The destination already provides this entry.
    AlreadyPresent,
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkOutcome::Hardlinked => "hardlinked",
            LinkOutcome::Symlinked => "symlinked",
            LinkOutcome::Copied => "copied",
            LinkOutcome::AlreadyPresent => "already present",
        })
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(unix)]
fn symlink_file(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

#[cfg(not(unix))]
fn symlink_file(_src: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    false
}

/// Place `src` (an absolute store entry path holding `digest`) at `dest`.
///
/// An existing link to `src` or a regular file whose bytes hash to `digest` counts
/// as present. A symlink pointing anywhere else is replaced. Anything else at `dest`
/// is left alone and reported as [`StoreError::DestinationOccupied`].
pub(crate) fn materialize(
    src: &Path,
    digest: &Digest,
    dest: &Path,
    mode: LinkMode,
) -> Result<LinkOutcome, StoreError> {
    let src_meta = fs::metadata(src).map_err(|e| StoreError::io(src, e))?;

    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_symlink() => {
            if fs::read_link(dest).is_ok_and(|target| target == src) {
                return Ok(LinkOutcome::AlreadyPresent);
            }
            debug!("replacing stale link {}", dest.display());
            fs::remove_file(dest).map_err(|e| StoreError::io(dest, e))?;
        }
        Ok(meta) if meta.is_file() => {
            if same_file(&meta, &src_meta) {
                return Ok(LinkOutcome::AlreadyPresent);
            }
            if meta.len() == src_meta.len() && &hash_file(dest)? == digest {
                debug!("{} already holds {}", dest.display(), digest.short());
                return Ok(LinkOutcome::AlreadyPresent);
            }
            return Err(StoreError::DestinationOccupied {
                path: dest.to_path_buf(),
            });
        }
        Ok(_) => {
            return Err(StoreError::DestinationOccupied {
                path: dest.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(dest, e)),
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    if mode == LinkMode::Hardlink {
        match fs::hard_link(src, dest) {
            Ok(()) => return Ok(LinkOutcome::Hardlinked),
            Err(e) if is_cross_device(&e) => {
                debug!(
                    "{} is on another device than the store, using a symlink",
                    dest.display()
                );
            }
            Err(e) => {
                debug!("hard link to {} failed: {e}", dest.display());
            }
        }
    }

    match symlink_file(src, dest) {
        Ok(()) => Ok(LinkOutcome::Symlinked),
        Err(e) => {
            warn!(
                "cannot link {} ({e}); copying {} bytes instead",
                dest.display(),
                src_meta.len()
            );
            copy_into_place(src, dest)?;
            Ok(LinkOutcome::Copied)
        }
    }
}

fn copy_into_place(src: &Path, dest: &Path) -> Result<(), StoreError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".cpack-copy-")
        .tempfile_in(dir)
        .map_err(|e| StoreError::io(dir, e))?;
    let mut input = fs::File::open(src).map_err(|e| StoreError::io(src, e))?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(|e| StoreError::io(dest, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(dest, e))?;
    tmp.persist_noclobber(dest)
        .map_err(|e| StoreError::io(dest, e.error))?;
    Ok(())
}
