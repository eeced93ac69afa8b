//! Reconstruct an environment from a manifest, one idempotent phase at a time.

use crate::backend::RuntimeBackend;
use crate::handle::EnvironmentHandle;
use crate::RuntimeError;
use cpack_schema::Manifest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Run an extension's `install.py` after it is cloned or moved.
    pub run_install_scripts: bool,
    /// Primary package index; recorded per-package indexes are added as extras.
    pub index_url: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            run_install_scripts: true,
            index_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutAction {
    Cloned,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagePhase {
    Installed,
    AlreadyInstalled,
}

pub struct EnvironmentBuilder<'a> {
    backend: &'a dyn RuntimeBackend,
    env: EnvironmentHandle,
    options: BuildOptions,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(backend: &'a dyn RuntimeBackend, target: &Path, options: BuildOptions) -> Self {
        Self {
            backend,
            env: EnvironmentHandle::for_workspace(target),
            options,
        }
    }

    pub fn env(&self) -> &EnvironmentHandle {
        &self.env
    }

    /// Check out the core repository at the workspace root.
    pub fn prepare_core(&self, manifest: &Manifest) -> Result<Option<CheckoutAction>, RuntimeError> {
        let Some(core) = &manifest.core else {
            return Ok(None);
        };
        let action = self.checkout(&core.repo_url, &core.revision, &self.env.root)?;
        info!("core at {}: {action:?}", core.revision);
        Ok(Some(action))
    }

    /// Create the environment and install every pin, unless the marker says this
    /// exact set is already installed.
    pub fn install_packages(&self, manifest: &Manifest) -> Result<PackagePhase, RuntimeError> {
        let index_urls = self.index_urls(manifest);
        let fingerprint = package_fingerprint(manifest, &index_urls);
        let marker = self.env.packages_marker();
        if self.env.python.exists()
            && fs::read_to_string(&marker).is_ok_and(|m| m.trim() == fingerprint)
        {
            debug!("package set {} already installed", &fingerprint[..12]);
            return Ok(PackagePhase::AlreadyInstalled);
        }

        self.backend
            .create_env(&self.env, manifest.python.as_deref())?;
        self.backend
            .install_packages(&self.env, &manifest.packages, &index_urls)?;
        fs::write(&marker, &fingerprint)?;
        info!("installed {} packages", manifest.packages.len());
        Ok(PackagePhase::Installed)
    }

    /// Bring every extension to its recorded revision. Returns one action per
    /// extension, in manifest order.
    pub fn checkout_extensions(
        &self,
        manifest: &Manifest,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<Vec<(String, CheckoutAction)>, RuntimeError> {
        let mut actions = Vec::with_capacity(manifest.extensions.len());
        for ext in &manifest.extensions {
            if should_stop() {
                return Err(RuntimeError::Cancelled);
            }
            if ext.dirty {
                warn!(
                    "{} had local modifications when packed; checking out clean {}",
                    ext.relative_path, ext.revision
                );
            }
            let dir = self.env.resolve(&ext.relative_path);
            let action = self.checkout(&ext.repo_url, &ext.revision, &dir)?;
            if action != CheckoutAction::Unchanged && self.options.run_install_scripts {
                self.backend.run_install_hook(&self.env, &dir)?;
            }
            actions.push((ext.relative_path.clone(), action));
        }
        Ok(actions)
    }

    /// Run every phase in order.
    pub fn build(
        &self,
        manifest: &Manifest,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<EnvironmentHandle, RuntimeError> {
        self.prepare_core(manifest)?;
        self.install_packages(manifest)?;
        self.checkout_extensions(manifest, should_stop)?;
        Ok(self.env.clone())
    }

    fn checkout(&self, url: &str, revision: &str, dir: &Path) -> Result<CheckoutAction, RuntimeError> {
        match self.backend.inspect_checkout(dir)? {
            None => {
                self.backend.clone_at(url, revision, dir)?;
                Ok(CheckoutAction::Cloned)
            }
            Some(state) if state.is_at(revision) => {
                if state.dirty {
                    warn!("{} has local modifications; leaving them in place", dir.display());
                }
                Ok(CheckoutAction::Unchanged)
            }
            Some(state) => {
                if state.remote_url.as_deref() != Some(url) {
                    debug!(
                        "{} points at {:?}; switching to {url}",
                        dir.display(),
                        state.remote_url
                    );
                }
                self.backend.fetch_checkout(url, revision, dir)?;
                Ok(CheckoutAction::Updated)
            }
        }
    }

    fn index_urls(&self, manifest: &Manifest) -> Vec<String> {
        let mut urls: Vec<String> = self.options.index_url.iter().cloned().collect();
        for pkg in &manifest.packages {
            if let Some(index) = &pkg.source_index {
                if !urls.contains(index) {
                    urls.push(index.clone());
                }
            }
        }
        urls
    }
}

fn package_fingerprint(manifest: &Manifest, index_urls: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"python:");
    hasher.update(manifest.python.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"\n");
    for pkg in &manifest.packages {
        hasher.update(pkg.requirement().as_bytes());
        hasher.update(b"\n");
    }
    for url in index_urls {
        hasher.update(b"index:");
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
