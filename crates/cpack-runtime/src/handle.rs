use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding extension checkouts, relative to the workspace root.
pub const EXTENSIONS_DIR: &str = "custom_nodes";
const VENV_DIR: &str = ".venv";
const PACKAGES_MARKER: &str = ".cpack-packages";

/// A prepared workspace: its root, isolated environment, and interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    pub root: PathBuf,
    pub venv: PathBuf,
    pub python: PathBuf,
}

impl EnvironmentHandle {
    /// Conventional layout: `<root>/.venv` with its interpreter inside.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let venv = root.join(VENV_DIR);
        let python = venv_python(&venv);
        Self { root, venv, python }
    }

    /// Use an existing interpreter instead of the workspace venv.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.root.join(EXTENSIONS_DIR)
    }

    /// Fingerprint of the last successful package install.
    pub fn packages_marker(&self) -> PathBuf {
        self.venv.join(PACKAGES_MARKER)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

#[cfg(windows)]
fn venv_python(venv: &Path) -> PathBuf {
    venv.join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_python(venv: &Path) -> PathBuf {
    venv.join("bin").join("python")
}
