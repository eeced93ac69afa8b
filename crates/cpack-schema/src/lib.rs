//! Manifest data model, canonical ordering, and pack identity for cpack.
//!
//! This crate defines the schema layer: the TOML `Manifest` that describes a captured
//! workflow environment (packages, extensions, models, graph reference), registry
//! origin hints for models, deterministic pack identity (`compute_pack_id`), and the
//! manifest builder that turns an environment snapshot plus scanned models into a
//! canonical manifest under an inclusion policy.

pub mod builder;
pub mod identity;
pub mod manifest;
pub mod origin;
pub mod types;

pub use builder::{
    build_manifest, BuiltManifest, EnvironmentSnapshot, InclusionPolicy, LocalModel,
    ModelInclusion,
};
pub use identity::{compute_pack_id, PackIdentity};
pub use manifest::{
    is_reserved_entry, is_safe_relative_path, normalize_package_name, parse_manifest_file,
    parse_manifest_str, CoreEntry, ExtensionEntry, GraphRef, Manifest, ManifestError, ModelEntry,
    ModelRef, PackageEntry, EDITOR_GRAPH_FILE, GRAPH_FILE, INPUT_DIR, MANIFEST_FILE,
    REQUIREMENTS_FILE, SCHEMA_VERSION,
};
pub use origin::OriginHint;
pub use types::{Digest, PackId, ShortId, DIGEST_HEX_LEN};
