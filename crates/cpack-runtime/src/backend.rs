use crate::handle::EnvironmentHandle;
use crate::RuntimeError;
use cpack_schema::PackageEntry;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a version-controlled directory currently points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutState {
    /// `None` when the checkout has no `origin` remote.
    pub remote_url: Option<String>,
    /// Full HEAD revision. `None` before the first commit.
    pub revision: Option<String>,
    /// Modified or untracked files present.
    pub dirty: bool,
}

impl CheckoutState {
    /// Whether HEAD is `revision`. Abbreviated revisions match by prefix.
    pub fn is_at(&self, revision: &str) -> bool {
        let wanted = revision.trim().to_ascii_lowercase();
        match &self.revision {
            Some(head) if wanted.len() >= 7 => head.to_ascii_lowercase().starts_with(&wanted),
            Some(head) => head.eq_ignore_ascii_case(&wanted),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub editable: bool,
}

pub trait RuntimeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// `major.minor` of the environment's interpreter, if it exists.
    fn python_version(&self, env: &EnvironmentHandle) -> Result<Option<String>, RuntimeError>;

    fn list_packages(&self, env: &EnvironmentHandle)
        -> Result<Vec<InstalledPackage>, RuntimeError>;

    /// Create the isolated environment if it does not exist yet.
    fn create_env(&self, env: &EnvironmentHandle, python: Option<&str>)
        -> Result<(), RuntimeError>;

    /// Install exactly these pins. Never substitutes a version.
    fn install_packages(
        &self,
        env: &EnvironmentHandle,
        packages: &[PackageEntry],
        index_urls: &[String],
    ) -> Result<(), RuntimeError>;

    /// `None` when `dir` is not a checkout at all.
    fn inspect_checkout(&self, dir: &Path) -> Result<Option<CheckoutState>, RuntimeError>;

    /// Create a checkout of `url` at `revision` in `dir` (which may already hold
    /// unrelated files).
    fn clone_at(&self, url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError>;

    /// Move an existing checkout to `revision`, fetching from `url` if needed.
    fn fetch_checkout(&self, url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError>;

    /// Run the extension's own setup hook (`install.py`) if it has one.
    fn run_install_hook(
        &self,
        _env: &EnvironmentHandle,
        _dir: &Path,
    ) -> Result<bool, RuntimeError> {
        Ok(false)
    }
}

pub fn select_backend(name: &str) -> Result<Box<dyn RuntimeBackend>, RuntimeError> {
    match name {
        "uv" => Ok(Box::new(crate::uv::UvBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
