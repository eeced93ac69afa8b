//! The `*.cpack.zip` container: manifest, graphs, derived requirements, and input assets.
//!
//! Entries are written in a fixed order with fixed timestamps and permissions, so
//! equal inputs produce byte-identical archives. Model weights never travel in the
//! archive.

use cpack_schema::{
    is_safe_relative_path, parse_manifest_str, GraphRef, Manifest, ManifestError, MANIFEST_FILE,
    REQUIREMENTS_FILE,
};
use cpack_store::hash_bytes;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

pub use cpack_schema::INPUT_DIR;

pub const MANIFEST_ENTRY: &str = MANIFEST_FILE;
pub const REQUIREMENTS_ENTRY: &str = REQUIREMENTS_FILE;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive has no '{0}' entry")]
    MissingEntry(String),
    #[error("graph digest mismatch: manifest records {expected}, archive holds {actual}")]
    GraphDigestMismatch { expected: String, actual: String },
    #[error("editor graph bytes present but the manifest records none")]
    UnrecordedEditorGraph,
    #[error("unsafe archive entry '{0}'")]
    UnsafeEntry(String),
    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),
}

/// Everything an archive carries, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub manifest: Manifest,
    /// The graph document, stored at `manifest.graph.file`.
    pub graph: Vec<u8>,
    /// The editor-form graph, stored at `manifest.editor_graph.file`.
    pub editor_graph: Option<Vec<u8>>,
    /// Auxiliary assets keyed by path relative to `input/`.
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl Artifact {
    fn check(&self) -> Result<(), ArtifactError> {
        self.manifest.validate()?;
        check_graph(&self.manifest.graph, &self.graph)?;
        match (&self.manifest.editor_graph, &self.editor_graph) {
            (Some(graph_ref), Some(bytes)) => check_graph(graph_ref, bytes)?,
            (Some(graph_ref), None) => {
                return Err(ArtifactError::MissingEntry(graph_ref.file.clone()))
            }
            (None, Some(_)) => return Err(ArtifactError::UnrecordedEditorGraph),
            (None, None) => {}
        }
        for name in self.assets.keys() {
            if !is_safe_relative_path(name) {
                return Err(ArtifactError::UnsafeEntry(format!("{INPUT_DIR}/{name}")));
            }
        }
        Ok(())
    }
}

fn check_graph(graph_ref: &GraphRef, bytes: &[u8]) -> Result<(), ArtifactError> {
    let actual = hash_bytes(bytes);
    if actual != graph_ref.digest {
        return Err(ArtifactError::GraphDigestMismatch {
            expected: graph_ref.digest.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Write `artifact` to `path` atomically, replacing any existing file.
pub fn write_artifact(path: &Path, artifact: &Artifact) -> Result<(), ArtifactError> {
    artifact.check()?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".cpack-artifact-")
        .tempfile_in(dir)?;

    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let options = entry_options();

        zip.start_file(MANIFEST_ENTRY, options)?;
        zip.write_all(artifact.manifest.to_toml_string()?.as_bytes())?;

        zip.start_file(artifact.manifest.graph.file.as_str(), options)?;
        zip.write_all(&artifact.graph)?;

        if let (Some(graph_ref), Some(bytes)) =
            (&artifact.manifest.editor_graph, &artifact.editor_graph)
        {
            zip.start_file(graph_ref.file.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        zip.start_file(REQUIREMENTS_ENTRY, options)?;
        zip.write_all(artifact.manifest.requirements_txt().as_bytes())?;

        for (name, bytes) in &artifact.assets {
            zip.start_file(format!("{INPUT_DIR}/{name}"), options)?;
            zip.write_all(bytes)?;
        }
        zip.finish()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ArtifactError::Io(e.error))?;
    info!(
        "wrote {} ({} packages, {} extensions, {} models, {} assets)",
        path.display(),
        artifact.manifest.packages.len(),
        artifact.manifest.extensions.len(),
        artifact.manifest.models.len(),
        artifact.assets.len()
    );
    Ok(())
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>, ArtifactError> {
    let mut entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ArtifactError::MissingEntry(name.to_owned()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read and verify an archive.
pub fn read_artifact(path: &Path) -> Result<Artifact, ArtifactError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_owned();
        if entry.is_dir() {
            continue;
        }
        if !is_safe_relative_path(&name) || entry.enclosed_name().is_none() {
            return Err(ArtifactError::UnsafeEntry(name));
        }
        names.push(name);
    }

    let manifest_bytes = read_entry(&mut archive, MANIFEST_ENTRY)?;
    let manifest_text = String::from_utf8(manifest_bytes)
        .map_err(|_| ArtifactError::UnsafeEntry(format!("{MANIFEST_ENTRY} is not UTF-8")))?;
    let manifest = parse_manifest_str(&manifest_text)?;

    let graph = read_entry(&mut archive, &manifest.graph.file)?;
    let editor_graph = match &manifest.editor_graph {
        Some(graph_ref) => Some(read_entry(&mut archive, &graph_ref.file)?),
        None => None,
    };

    let prefix = format!("{INPUT_DIR}/");
    let mut assets = BTreeMap::new();
    for name in &names {
        if let Some(rel) = name.strip_prefix(&prefix) {
            assets.insert(rel.to_owned(), read_entry(&mut archive, name)?);
        } else if name != MANIFEST_ENTRY
            && name != REQUIREMENTS_ENTRY
            && name != &manifest.graph.file
            && !manifest
                .editor_graph
                .as_ref()
                .is_some_and(|graph_ref| name == &graph_ref.file)
        {
            debug!("ignoring unknown archive entry {name}");
        }
    }

    let artifact = Artifact {
        manifest,
        graph,
        editor_graph,
        assets,
    };
    artifact.check()?;
    Ok(artifact)
}
