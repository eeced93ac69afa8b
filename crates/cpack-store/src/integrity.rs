use crate::layout::StoreLayout;
use crate::models::ModelStore;
use crate::StoreError;
use serde::Serialize;
use std::fs;

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
    /// Leftover staging files from interrupted writes. Harmless.
    pub stale_staging: usize,
}

#[derive(Debug, Serialize)]
pub struct IntegrityFailure {
    pub digest: String,
    pub reason: String,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Rehash every entry in the store and report mismatches.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let store = ModelStore::new(layout.clone());
    let all = store.list()?;

    let mut report = IntegrityReport {
        checked: all.len(),
        ..Default::default()
    };

    for digest in &all {
        match store.verify(digest) {
            Ok(()) => report.passed += 1,
            Err(StoreError::Integrity { actual, .. }) => {
                report.failed.push(IntegrityFailure {
                    digest: digest.to_string(),
                    reason: format!("content hash mismatch: got {actual}"),
                });
            }
            Err(e) => {
                report.failed.push(IntegrityFailure {
                    digest: digest.to_string(),
                    reason: format!("read error: {e}"),
                });
            }
        }
    }

    let staging = layout.staging_dir();
    if staging.is_dir() {
        report.stale_staging = fs::read_dir(&staging)
            .map_err(|e| StoreError::io(&staging, e))?
            .filter_map(Result::ok)
            .count();
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;
    use crate::models::PutMode;

    fn put(store: &ModelStore, dir: &std::path::Path, bytes: &[u8]) -> cpack_schema::Digest {
        let src = dir.join("src.bin");
        fs::write(&src, bytes).unwrap();
        let digest = hash_bytes(bytes);
        store.put(&digest, &src, PutMode::Copy).unwrap();
        digest
    }

    #[test]
    fn clean_store_passes_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path().join("home")).unwrap();
        put(&store, dir.path(), b"data1");
        put(&store, dir.path(), b"data2");

        let report = verify_store_integrity(store.layout()).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.passed, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn corrupted_entry_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path().join("home")).unwrap();
        let digest = put(&store, dir.path(), b"original");

        let path = store.get(&digest).unwrap();
        fs::remove_file(&path).unwrap();
        fs::write(&path, b"corrupted").unwrap();

        let report = verify_store_integrity(store.layout()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].digest, digest.as_str());
    }

    #[test]
    fn empty_store_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::open(dir.path()).unwrap();
        let report = verify_store_integrity(store.layout()).unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(report.stale_staging, 0);
        assert!(report.is_clean());
    }
}
