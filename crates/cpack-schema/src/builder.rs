//! Turn a live environment snapshot plus scanned models into a canonical manifest.

use crate::manifest::{
    CoreEntry, ExtensionEntry, GraphRef, Manifest, ManifestError, ModelEntry, PackageEntry,
    SCHEMA_VERSION,
};
use crate::origin::OriginHint;
use crate::types::Digest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Interpreter and extension state captured at pack time. Never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub python: Option<String>,
    pub core: Option<CoreEntry>,
    pub packages: Vec<PackageEntry>,
    pub extensions: Vec<ExtensionEntry>,
    /// Things that could not be captured faithfully (duplicates, unpinnable checkouts).
    pub anomalies: Vec<String>,
}

/// A model file found in the workspace, already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModel {
    pub digest: Digest,
    pub size_bytes: u64,
    /// Workspace-relative path, `/`-separated.
    pub filename: String,
    pub referenced: bool,
    pub origin: Option<OriginHint>,
}

impl LocalModel {
    pub fn basename(&self) -> &str {
        self.filename
            .rsplit('/')
            .next()
            .unwrap_or(self.filename.as_str())
    }
}

/// What to do with one model at pack time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelInclusion {
    /// Left out of the manifest.
    Exclude,
    /// Recorded; a failed materialization does not block a full unpack.
    Optional,
    /// Recorded and required.
    Reference,
    /// Recorded, required, and copied into the local store at pack time.
    Store,
}

impl fmt::Display for ModelInclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelInclusion::Exclude => "exclude",
            ModelInclusion::Optional => "optional",
            ModelInclusion::Reference => "reference",
            ModelInclusion::Store => "store",
        })
    }
}

impl FromStr for ModelInclusion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclude" => Ok(ModelInclusion::Exclude),
            "optional" => Ok(ModelInclusion::Optional),
            "reference" => Ok(ModelInclusion::Reference),
            "store" => Ok(ModelInclusion::Store),
            other => Err(format!(
                "unknown inclusion '{other}' (expected exclude, optional, reference or store)"
            )),
        }
    }
}

/// Per-model inclusion decision. Overrides are keyed by digest, by
/// workspace-relative filename, or by bare file name, checked in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionPolicy {
    pub default: ModelInclusion,
    #[serde(default)]
    pub overrides: BTreeMap<String, ModelInclusion>,
}

impl Default for InclusionPolicy {
    fn default() -> Self {
        Self {
            default: ModelInclusion::Reference,
            overrides: BTreeMap::new(),
        }
    }
}

impl InclusionPolicy {
    pub fn with_default(default: ModelInclusion) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, inclusion: ModelInclusion) -> Self {
        self.overrides.insert(key.into(), inclusion);
        self
    }

    pub fn decide(&self, model: &LocalModel) -> ModelInclusion {
        self.overrides
            .get(model.digest.as_str())
            .or_else(|| self.overrides.get(&model.filename))
            .or_else(|| self.overrides.get(model.basename()))
            .copied()
            .unwrap_or(self.default)
    }
}

/// Result of [`build_manifest`]: the manifest plus everything the caller must act on.
#[derive(Debug, Clone)]
pub struct BuiltManifest {
    pub manifest: Manifest,
    /// Models the policy marked `Store`; the caller copies these into the local store.
    pub store_inline: Vec<LocalModel>,
    /// Snapshot anomalies plus anything the builder itself had to resolve.
    pub anomalies: Vec<String>,
}

/// Build a canonical manifest.
///
/// Packages are deduplicated by normalized name with last-write-wins. Models with
/// the same digest collapse into one entry under the first filename in sorted order.
pub fn build_manifest(
    snapshot: &EnvironmentSnapshot,
    models: &[LocalModel],
    graph: GraphRef,
    policy: &InclusionPolicy,
) -> Result<BuiltManifest, ManifestError> {
    let mut anomalies = snapshot.anomalies.clone();

    let mut by_name: BTreeMap<String, PackageEntry> = BTreeMap::new();
    for pkg in &snapshot.packages {
        let key = pkg.normalized_name();
        if let Some(previous) = by_name.insert(key, pkg.clone()) {
            warn!(
                "duplicate package '{}': {} replaced by {}",
                pkg.name, previous.version, pkg.version
            );
            anomalies.push(format!(
                "duplicate package '{}' ({} replaced by {})",
                pkg.name, previous.version, pkg.version
            ));
        }
    }
    let packages: Vec<PackageEntry> = by_name.into_values().collect();

    let mut extensions = snapshot.extensions.clone();
    extensions.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut sorted: Vec<&LocalModel> = models.iter().collect();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));

    let mut entries: BTreeMap<Digest, ModelEntry> = BTreeMap::new();
    let mut store_inline: HashMap<Digest, LocalModel> = HashMap::new();
    for model in sorted {
        let inclusion = policy.decide(model);
        if inclusion == ModelInclusion::Exclude {
            continue;
        }
        if let Some(existing) = entries.get_mut(&model.digest) {
            warn!(
                "model {} appears as both '{}' and '{}'; keeping '{}'",
                model.digest.short(),
                existing.filename,
                model.filename,
                existing.filename
            );
            existing.referenced |= model.referenced;
            if existing.origin.is_none() {
                existing.origin.clone_from(&model.origin);
            }
            continue;
        }
        if inclusion == ModelInclusion::Store {
            store_inline.insert(model.digest.clone(), model.clone());
        }
        entries.insert(
            model.digest.clone(),
            ModelEntry {
                digest: model.digest.clone(),
                size_bytes: model.size_bytes,
                filename: model.filename.clone(),
                included_inline: inclusion == ModelInclusion::Store,
                optional: inclusion == ModelInclusion::Optional,
                referenced: model.referenced,
                origin: model.origin.clone(),
            },
        );
    }

    let manifest = Manifest {
        schema_version: SCHEMA_VERSION,
        python: snapshot.python.clone(),
        graph,
        editor_graph: None,
        core: snapshot.core.clone(),
        packages,
        extensions,
        models: entries,
    };
    manifest.validate()?;

    let mut store_inline: Vec<LocalModel> = store_inline.into_values().collect();
    store_inline.sort_by(|a, b| a.digest.cmp(&b.digest));

    Ok(BuiltManifest {
        manifest,
        store_inline,
        anomalies,
    })
}
