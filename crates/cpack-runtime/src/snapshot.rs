//! Capture the live environment: interpreter, pinned packages, core and extension checkouts.

use crate::backend::RuntimeBackend;
use crate::handle::{EnvironmentHandle, EXTENSIONS_DIR};
use crate::RuntimeError;
use cpack_schema::{normalize_package_name, CoreEntry, EnvironmentSnapshot, ExtensionEntry, PackageEntry};
use std::collections::HashSet;
use std::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// Package names left out of the snapshot (compared normalized).
    pub exclude_packages: Vec<String>,
    /// Recorded as every package's `source_index` when set.
    pub index_url: Option<String>,
}

fn anomaly(anomalies: &mut Vec<String>, message: String) {
    warn!("{message}");
    anomalies.push(message);
}

pub fn snapshot(
    backend: &dyn RuntimeBackend,
    env: &EnvironmentHandle,
    options: &SnapshotOptions,
) -> Result<EnvironmentSnapshot, RuntimeError> {
    let mut anomalies = Vec::new();
    let python = backend.python_version(env)?;

    let excluded: HashSet<String> = options
        .exclude_packages
        .iter()
        .map(|n| normalize_package_name(n))
        .collect();
    let mut packages = Vec::new();
    for pkg in backend.list_packages(env)? {
        if pkg.editable {
            debug!("skipping editable install {}", pkg.name);
            continue;
        }
        if excluded.contains(&normalize_package_name(&pkg.name)) {
            debug!("skipping excluded package {}", pkg.name);
            continue;
        }
        let mut entry = PackageEntry::new(pkg.name, pkg.version);
        entry.source_index.clone_from(&options.index_url);
        packages.push(entry);
    }

    let core = match backend.inspect_checkout(&env.root)? {
        None => None,
        Some(state) => match (state.remote_url, state.revision) {
            (Some(repo_url), Some(revision)) => {
                if state.dirty {
                    anomaly(
                        &mut anomalies,
                        format!("core checkout at {revision} has local modifications"),
                    );
                }
                Some(CoreEntry { repo_url, revision })
            }
            _ => {
                anomaly(
                    &mut anomalies,
                    "core checkout has no remote or no commit; not pinned".to_owned(),
                );
                None
            }
        },
    };

    let extensions = scan_extensions(backend, env, &mut anomalies)?;

    Ok(EnvironmentSnapshot {
        python,
        core,
        packages,
        extensions,
        anomalies,
    })
}

fn scan_extensions(
    backend: &dyn RuntimeBackend,
    env: &EnvironmentHandle,
    anomalies: &mut Vec<String>,
) -> Result<Vec<ExtensionEntry>, RuntimeError> {
    let dir = env.extensions_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') || name == "__pycache__" => {}
            Ok(name) => names.push(name),
            Err(raw) => anomaly(
                anomalies,
                format!("extension directory {raw:?} has a non UTF-8 name; skipped"),
            ),
        }
    }
    names.sort();

    let mut extensions = Vec::new();
    for name in names {
        let relative_path = format!("{EXTENSIONS_DIR}/{name}");
        let Some(state) = backend.inspect_checkout(&dir.join(&name))? else {
            anomaly(
                anomalies,
                format!("{relative_path} is not a version-controlled checkout; skipped"),
            );
            continue;
        };
        let (Some(repo_url), Some(revision)) = (state.remote_url, state.revision) else {
            anomaly(
                anomalies,
                format!("{relative_path} has no remote or no commit; skipped"),
            );
            continue;
        };
        if state.dirty {
            warn!("{relative_path} has local modifications; recording {revision} as dirty");
        }
        extensions.push(ExtensionEntry {
            repo_url,
            revision,
            relative_path,
            dirty: state.dirty,
        });
    }
    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CheckoutState, InstalledPackage};
    use crate::mock::MockBackend;
    use std::path::Path;

    fn checkout(url: Option<&str>, rev: Option<&str>, dirty: bool) -> CheckoutState {
        CheckoutState {
            remote_url: url.map(str::to_owned),
            revision: rev.map(str::to_owned),
            dirty,
        }
    }

    fn pkg(name: &str, version: &str, editable: bool) -> InstalledPackage {
        InstalledPackage {
            name: name.to_owned(),
            version: version.to_owned(),
            editable,
        }
    }

    fn workspace(root: &Path) -> EnvironmentHandle {
        let env = EnvironmentHandle::for_workspace(root);
        MockBackend::seed_env(
            &env,
            "3.11",
            &[
                pkg("numpy", "1.26.4", false),
                pkg("my-node", "0.1.0", true),
                pkg("pip", "24.0", false),
            ],
        )
        .unwrap();
        env
    }

    #[test]
    fn captures_packages_without_editables_or_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let env = workspace(dir.path());
        let options = SnapshotOptions {
            exclude_packages: vec!["PIP".to_owned()],
            index_url: Some("https://pypi.example/simple".to_owned()),
        };
        let snap = snapshot(&MockBackend::new(), &env, &options).unwrap();
        assert_eq!(snap.python.as_deref(), Some("3.11"));
        assert_eq!(snap.packages.len(), 1);
        assert_eq!(snap.packages[0].name, "numpy");
        assert_eq!(
            snap.packages[0].source_index.as_deref(),
            Some("https://pypi.example/simple")
        );
    }

    #[test]
    fn captures_core_and_extensions_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let env = workspace(dir.path());
        MockBackend::seed_checkout(
            &env.root,
            &checkout(Some("https://example/core"), Some("c0ffee0"), false),
        )
        .unwrap();
        let nodes = env.extensions_dir();
        MockBackend::seed_checkout(
            &nodes.join("zeta"),
            &checkout(Some("https://example/zeta"), Some("1111111"), false),
        )
        .unwrap();
        MockBackend::seed_checkout(
            &nodes.join("alpha"),
            &checkout(Some("https://example/alpha"), Some("2222222"), true),
        )
        .unwrap();
        fs::create_dir_all(nodes.join("__pycache__")).unwrap();
        fs::create_dir_all(nodes.join(".disabled")).unwrap();
        fs::write(nodes.join("loose.py"), "").unwrap();

        let snap = snapshot(&MockBackend::new(), &env, &SnapshotOptions::default()).unwrap();
        let core = snap.core.unwrap();
        assert_eq!(core.revision, "c0ffee0");
        let paths: Vec<&str> = snap
            .extensions
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["custom_nodes/alpha", "custom_nodes/zeta"]);
        assert!(snap.extensions[0].dirty);
        assert!(snap.anomalies.is_empty());
    }

    #[test]
    fn unpinnable_checkouts_become_anomalies() {
        let dir = tempfile::tempdir().unwrap();
        let env = workspace(dir.path());
        let nodes = env.extensions_dir();
        fs::create_dir_all(nodes.join("plain")).unwrap();
        MockBackend::seed_checkout(
            &nodes.join("local-only"),
            &checkout(None, Some("3333333"), false),
        )
        .unwrap();
        MockBackend::seed_checkout(
            &nodes.join("empty"),
            &checkout(Some("https://example/empty"), None, false),
        )
        .unwrap();

        let snap = snapshot(&MockBackend::new(), &env, &SnapshotOptions::default()).unwrap();
        assert!(snap.extensions.is_empty());
        assert_eq!(snap.anomalies.len(), 3);
        assert!(snap.anomalies.iter().any(|a| a.contains("custom_nodes/plain")));
    }

    #[test]
    fn snapshot_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let env = workspace(dir.path());
        MockBackend::seed_checkout(
            &env.extensions_dir().join("x"),
            &checkout(Some("https://example/repo"), Some("abcd123"), false),
        )
        .unwrap();
        let backend = MockBackend::new();
        let a = snapshot(&backend, &env, &SnapshotOptions::default()).unwrap();
        let b = snapshot(&backend, &env, &SnapshotOptions::default()).unwrap();
        assert_eq!(a, b);
    }
}
