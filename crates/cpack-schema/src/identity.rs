use crate::manifest::Manifest;
use crate::types::{PackId, ShortId};
use serde::Serialize;

/// Deterministic identity of a pack, derived from its canonical manifest.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackIdentity {
    pub pack_id: PackId,
    pub short_id: ShortId,
}

/// Compute the pack identity: blake3 over the canonical JSON of the manifest.
///
/// Package and extension order do not matter; every other field does,
/// including model origins and the graph digest.
pub fn compute_pack_id(manifest: &Manifest) -> Result<PackIdentity, serde_json::Error> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"cpack:v");
    hasher.update(manifest.schema_version.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(manifest.canonical_json()?.as_bytes());

    let hex = hasher.finalize().to_hex().to_string();
    let short = hex[..12].to_owned();

    Ok(PackIdentity {
        pack_id: PackId::new(hex),
        short_id: ShortId::new(short),
    })
}
