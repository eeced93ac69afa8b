use crate::origin::OriginHint;
use crate::types::Digest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path};
use thiserror::Error;

/// Current manifest schema major version. Readers reject any other value.
pub const SCHEMA_VERSION: u32 = 1;

/// Default archive path of the workflow graph document.
pub const GRAPH_FILE: &str = "workflow_api.json";

/// Archive path of the editor-form graph, when one is packed.
pub const EDITOR_GRAPH_FILE: &str = "workflow.json";

/// Archive entries owned by the container layout. Graph documents may not use them.
pub const MANIFEST_FILE: &str = "manifest.toml";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
/// Archive directory for auxiliary assets; also their workspace directory.
pub const INPUT_DIR: &str = "input";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("unsupported schema_version: {found}, expected {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("duplicate package '{0}'")]
    DuplicatePackage(String),
    #[error("duplicate extension path '{0}'")]
    DuplicateExtensionPath(String),
    #[error("model key '{key}' does not match entry digest '{digest}'")]
    DigestKeyMismatch { key: String, digest: String },
    #[error("invalid sha256 digest '{0}'")]
    InvalidDigest(String),
    #[error("path '{0}' must be relative and stay inside the workspace")]
    UnsafePath(String),
    #[error("path '{0}' collides with a reserved archive entry")]
    ReservedPath(String),
    #[error("editor graph and graph share the path '{0}'")]
    GraphPathCollision(String),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("invalid origin hint '{0}' (expected hf:<owner>/<repo>/<path>[@rev], civitai:<id>, or an http(s) URL)")]
    InvalidOrigin(String),
}

/// Versioned description of a workflow's packages, extensions and models.
///
/// Field order matters for TOML output: scalar fields first, then tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    pub graph: GraphRef,
    /// Editor-form graph document, restored next to `graph` on unpack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_graph: Option<GraphRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<CoreEntry>,
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
    #[serde(default)]
    pub extensions: Vec<ExtensionEntry>,
    #[serde(default)]
    pub models: BTreeMap<Digest, ModelEntry>,
}

/// Reference to the workflow graph stored next to the manifest in the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphRef {
    pub file: String,
    pub digest: Digest,
}

/// The host editor's own checkout, placed at the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreEntry {
    pub repo_url: String,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionEntry {
    pub repo_url: String,
    pub revision: String,
    pub relative_path: String,
    /// The working tree had uncommitted changes when captured; `revision` is HEAD.
    #[serde(default, skip_serializing_if = "is_false")]
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    pub digest: Digest,
    pub size_bytes: u64,
    /// Workspace-relative path the workflow expects the model at.
    pub filename: String,
    /// Copied into the local store at pack time. Never embedded in the artifact.
    #[serde(default)]
    pub included_inline: bool,
    /// Failure to materialize this model does not block a full unpack.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    /// The workflow graph names this file directly.
    #[serde(default, skip_serializing_if = "is_false")]
    pub referenced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OriginHint>,
}

/// A model named by content, without its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelRef {
    pub digest: Digest,
    pub size_bytes: u64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl PackageEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source_index: None,
        }
    }

    /// Name normalized the way package indexes compare names
    /// (lowercase, runs of `-`, `_`, `.` collapsed to `-`).
    pub fn normalized_name(&self) -> String {
        normalize_package_name(&self.name)
    }

    /// Exact pin in requirements syntax.
    pub fn requirement(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }
}

pub fn normalize_package_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

impl ModelEntry {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef {
            digest: self.digest.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// True for non-empty relative paths made only of normal components.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\\') {
        return false;
    }
    let p = Path::new(path);
    p.components().all(|c| matches!(c, Component::Normal(_)))
}

/// True when `path` is, or sits under, an entry the archive layout reserves.
pub fn is_reserved_entry(path: &str) -> bool {
    let mut components = Path::new(path).components();
    match components.next() {
        Some(Component::Normal(first)) => {
            let rest = components.next().is_some();
            first == INPUT_DIR || (!rest && (first == MANIFEST_FILE || first == REQUIREMENTS_FILE))
        }
        _ => false,
    }
}

impl GraphRef {
    fn validate(&self) -> Result<(), ManifestError> {
        if !is_safe_relative_path(&self.file) {
            return Err(ManifestError::UnsafePath(self.file.clone()));
        }
        if is_reserved_entry(&self.file) {
            return Err(ManifestError::ReservedPath(self.file.clone()));
        }
        if !self.digest.is_valid() {
            return Err(ManifestError::InvalidDigest(self.digest.to_string()));
        }
        Ok(())
    }
}

impl Manifest {
    /// Check every structural invariant of the manifest.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        self.graph.validate()?;
        if let Some(editor) = &self.editor_graph {
            editor.validate()?;
            if editor.file == self.graph.file {
                return Err(ManifestError::GraphPathCollision(editor.file.clone()));
            }
        }

        if let Some(core) = &self.core {
            if core.repo_url.trim().is_empty() {
                return Err(ManifestError::EmptyField("core.repo_url"));
            }
            if core.revision.trim().is_empty() {
                return Err(ManifestError::EmptyField("core.revision"));
            }
        }

        let mut names = HashSet::new();
        for pkg in &self.packages {
            if pkg.name.trim().is_empty() {
                return Err(ManifestError::EmptyField("package name"));
            }
            if pkg.version.trim().is_empty() {
                return Err(ManifestError::EmptyField("package version"));
            }
            if !names.insert(pkg.normalized_name()) {
                return Err(ManifestError::DuplicatePackage(pkg.name.clone()));
            }
        }

        let mut paths = HashSet::new();
        for ext in &self.extensions {
            if ext.repo_url.trim().is_empty() {
                return Err(ManifestError::EmptyField("extension repo_url"));
            }
            if ext.revision.trim().is_empty() {
                return Err(ManifestError::EmptyField("extension revision"));
            }
            if !is_safe_relative_path(&ext.relative_path) {
                return Err(ManifestError::UnsafePath(ext.relative_path.clone()));
            }
            if !paths.insert(ext.relative_path.as_str()) {
                return Err(ManifestError::DuplicateExtensionPath(
                    ext.relative_path.clone(),
                ));
            }
        }

        for (key, entry) in &self.models {
            if key != &entry.digest {
                return Err(ManifestError::DigestKeyMismatch {
                    key: key.to_string(),
                    digest: entry.digest.to_string(),
                });
            }
            if !entry.digest.is_valid() {
                return Err(ManifestError::InvalidDigest(entry.digest.to_string()));
            }
            if !is_safe_relative_path(&entry.filename) {
                return Err(ManifestError::UnsafePath(entry.filename.clone()));
            }
        }

        Ok(())
    }

    /// Sort packages by name and extensions by path.
    pub fn canonicalize(&mut self) {
        self.packages
            .sort_by(|a, b| a.normalized_name().cmp(&b.normalized_name()));
        self.extensions
            .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    }

    /// Compact JSON of the canonicalized manifest, the input to pack identity.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        let mut copy = self.clone();
        copy.canonicalize();
        serde_json::to_string(&copy)
    }

    pub fn to_toml_string(&self) -> Result<String, ManifestError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn model_refs(&self) -> Vec<ModelRef> {
        self.models.values().map(ModelEntry::model_ref).collect()
    }

    /// Pins in requirements.txt syntax, one per line.
    pub fn requirements_txt(&self) -> String {
        let mut out = String::new();
        for pkg in &self.packages {
            out.push_str(&pkg.requirement());
            out.push('\n');
        }
        out
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

/// Parse a manifest, rejecting unknown schema versions before the structural parse
/// so a newer manifest reports its version rather than an unknown field.
pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let probe: VersionProbe = toml::from_str(input)?;
    if probe.schema_version != SCHEMA_VERSION {
        return Err(ManifestError::UnsupportedVersion {
            found: probe.schema_version,
            supported: SCHEMA_VERSION,
        });
    }
    let manifest: Manifest = toml::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn digest_of(seed: &str) -> Digest {
        let hex = blake3::hash(seed.as_bytes()).to_hex().to_string();
        Digest::new(hex)
    }

    pub(crate) fn sample_manifest() -> Manifest {
        let d = digest_of("model-a");
        let mut models = BTreeMap::new();
        models.insert(
            d.clone(),
            ModelEntry {
                digest: d,
                size_bytes: 123,
                filename: "models/checkpoints/m.safetensors".to_owned(),
                included_inline: false,
                optional: false,
                referenced: true,
                origin: Some(OriginHint::HuggingFace {
                    repo: "org/repo".to_owned(),
                    revision: "main".to_owned(),
                    path: "m.safetensors".to_owned(),
                }),
            },
        );
        Manifest {
            schema_version: SCHEMA_VERSION,
            python: Some("3.11".to_owned()),
            graph: GraphRef {
                file: GRAPH_FILE.to_owned(),
                digest: digest_of("graph"),
            },
            editor_graph: None,
            core: Some(CoreEntry {
                repo_url: "https://example/editor.git".to_owned(),
                revision: "0123456789abcdef".to_owned(),
            }),
            packages: vec![PackageEntry::new("numpy", "1.26.4")],
            extensions: vec![ExtensionEntry {
                repo_url: "https://example/repo".to_owned(),
                revision: "abcd123".to_owned(),
                relative_path: "custom_nodes/x".to_owned(),
                dirty: false,
            }],
            models,
        }
    }

    #[test]
    fn toml_roundtrip_preserves_manifest() {
        let m = sample_manifest();
        let text = m.to_toml_string().unwrap();
        let back = parse_manifest_str(&text).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn toml_is_human_readable() {
        let text = sample_manifest().to_toml_string().unwrap();
        assert!(text.contains("schema_version = 1"));
        assert!(text.contains("numpy"));
        assert!(text.contains("custom_nodes/x"));
        assert!(text.contains("registry = \"huggingface\""));
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let text = sample_manifest()
            .to_toml_string()
            .unwrap()
            .replace("schema_version = 1", "schema_version = 2");
        match parse_manifest_str(&text) {
            Err(ManifestError::UnsupportedVersion { found, supported }) => {
                assert_eq!(found, 2);
                assert_eq!(supported, 1);
            }
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut text = sample_manifest().to_toml_string().unwrap();
        text = text.replacen(
            "schema_version = 1",
            "schema_version = 1\nmystery = true",
            1,
        );
        assert!(matches!(
            parse_manifest_str(&text),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn rejects_duplicate_packages_after_normalization() {
        let mut m = sample_manifest();
        m.packages.push(PackageEntry::new("NumPy", "1.25.0"));
        assert!(matches!(
            m.validate(),
            Err(ManifestError::DuplicatePackage(_))
        ));
    }

    #[test]
    fn rejects_duplicate_extension_paths() {
        let mut m = sample_manifest();
        let dup = m.extensions[0].clone();
        m.extensions.push(dup);
        assert!(matches!(
            m.validate(),
            Err(ManifestError::DuplicateExtensionPath(_))
        ));
    }

    #[test]
    fn rejects_digest_key_mismatch() {
        let mut m = sample_manifest();
        let (_, mut entry) = m.models.pop_first().unwrap();
        entry.digest = digest_of("other");
        m.models.insert(digest_of("model-a"), entry);
        assert!(matches!(
            m.validate(),
            Err(ManifestError::DigestKeyMismatch { .. })
        ));
    }

    #[test]
    fn rejects_escaping_paths() {
        let mut m = sample_manifest();
        m.extensions[0].relative_path = "../outside".to_owned();
        assert!(matches!(m.validate(), Err(ManifestError::UnsafePath(_))));

        let mut m = sample_manifest();
        m.graph.file = "/etc/passwd".to_owned();
        assert!(matches!(m.validate(), Err(ManifestError::UnsafePath(_))));
    }

    #[test]
    fn rejects_graph_on_reserved_entries() {
        for file in ["manifest.toml", "requirements.txt", "input/g.json", "input"] {
            let mut m = sample_manifest();
            m.graph.file = file.to_owned();
            assert!(
                matches!(m.validate(), Err(ManifestError::ReservedPath(_))),
                "{file} must be rejected"
            );
        }
        let mut m = sample_manifest();
        m.graph.file = "graphs/manifest.toml".to_owned();
        m.validate().unwrap();
    }

    #[test]
    fn editor_graph_roundtrips_and_is_checked() {
        let mut m = sample_manifest();
        m.editor_graph = Some(GraphRef {
            file: EDITOR_GRAPH_FILE.to_owned(),
            digest: digest_of("editor"),
        });
        let back = parse_manifest_str(&m.to_toml_string().unwrap()).unwrap();
        assert_eq!(back, m);

        let mut clash = m.clone();
        if let Some(editor) = clash.editor_graph.as_mut() {
            editor.file = GRAPH_FILE.to_owned();
        }
        assert!(matches!(
            clash.validate(),
            Err(ManifestError::GraphPathCollision(_))
        ));

        let mut reserved = m;
        if let Some(editor) = reserved.editor_graph.as_mut() {
            editor.file = "requirements.txt".to_owned();
        }
        assert!(matches!(
            reserved.validate(),
            Err(ManifestError::ReservedPath(_))
        ));
    }

    #[test]
    fn safe_path_rules() {
        assert!(is_safe_relative_path("models/a.safetensors"));
        assert!(!is_safe_relative_path(""));
        assert!(!is_safe_relative_path("a/../b"));
        assert!(!is_safe_relative_path("./a"));
        assert!(!is_safe_relative_path("a\\b"));
    }

    #[test]
    fn normalized_package_names() {
        assert_eq!(normalize_package_name("Foo_Bar.baz"), "foo-bar-baz");
        assert_eq!(normalize_package_name("a--_b"), "a-b");
    }

    #[test]
    fn canonical_json_ignores_input_order() {
        let mut a = sample_manifest();
        a.packages = vec![PackageEntry::new("torch", "2.3.0"), PackageEntry::new("numpy", "1.26.4")];
        let mut b = a.clone();
        b.packages.reverse();
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    }

    #[test]
    fn requirements_txt_lists_pins() {
        let m = sample_manifest();
        assert_eq!(m.requirements_txt(), "numpy==1.26.4\n");
    }
}
