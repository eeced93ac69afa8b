//! Backend driving `uv` for interpreter environments and `git` for checkouts.

use crate::backend::{CheckoutState, InstalledPackage, RuntimeBackend};
use crate::command::Tool;
use crate::git;
use crate::handle::EnvironmentHandle;
use crate::RuntimeError;
use cpack_schema::PackageEntry;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const REQUIREMENTS_FILE: &str = ".cpack-requirements.txt";
const VERSION_SCRIPT: &str = "import sys;print(f'{sys.version_info[0]}.{sys.version_info[1]}')";
const INSTALL_HOOK: &str = "install.py";

pub struct UvBackend {
    uv: String,
}

impl Default for UvBackend {
    fn default() -> Self {
        Self { uv: "uv".to_owned() }
    }
}

impl UvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `uv` executable instead of the one on PATH.
    pub fn with_executable(uv: impl Into<String>) -> Self {
        Self { uv: uv.into() }
    }

    fn uv(&self) -> Tool<'_> {
        Tool::new(&self.uv)
    }
}

#[derive(Deserialize)]
struct ListedPackage {
    name: String,
    version: String,
    #[serde(default)]
    editable_project_location: Option<String>,
}

/// Parse `uv pip list --format json` output.
fn parse_package_list(json: &str) -> Result<Vec<InstalledPackage>, RuntimeError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let listed: Vec<ListedPackage> =
        serde_json::from_str(json).map_err(|e| RuntimeError::Parse(format!("uv pip list: {e}")))?;
    Ok(listed
        .into_iter()
        .map(|p| InstalledPackage {
            name: p.name,
            version: p.version,
            editable: p.editable_project_location.is_some(),
        })
        .collect())
}

/// Reject two pins for the same normalized name before the installer sees them.
pub(crate) fn check_duplicate_pins(packages: &[PackageEntry]) -> Result<(), RuntimeError> {
    let mut seen: BTreeMap<String, &PackageEntry> = BTreeMap::new();
    let mut clashing = Vec::new();
    for pkg in packages {
        if let Some(first) = seen.insert(pkg.normalized_name(), pkg) {
            clashing.push(first.requirement());
            clashing.push(pkg.requirement());
        }
    }
    if clashing.is_empty() {
        return Ok(());
    }
    clashing.dedup();
    Err(RuntimeError::DependencyConflict {
        packages: clashing,
        detail: "the same package is pinned more than once".to_owned(),
    })
}

/// Package-name tokens of resolver output, normalized the way pins are.
fn mentioned_names(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .map(cpack_schema::normalize_package_name)
        .map(|t| t.trim_matches('-').to_owned())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Map a resolver failure onto the pins it mentions by name.
fn conflict_from_stderr(packages: &[PackageEntry], stderr: &str) -> Option<RuntimeError> {
    let lowered = stderr.to_ascii_lowercase();
    if !lowered.contains("no solution found") && !lowered.contains("unsatisfiable") {
        return None;
    }
    let mentioned = mentioned_names(&lowered);
    let mut named: Vec<String> = packages
        .iter()
        .filter(|p| mentioned.contains(&p.normalized_name()))
        .map(PackageEntry::requirement)
        .collect();
    if named.is_empty() {
        named = packages.iter().map(PackageEntry::requirement).collect();
    }
    Some(RuntimeError::DependencyConflict {
        packages: named,
        detail: stderr.trim().to_owned(),
    })
}

fn index_args(index_urls: &[String]) -> Vec<String> {
    let mut args = Vec::new();
    for (i, url) in index_urls.iter().enumerate() {
        args.push(if i == 0 { "--index-url" } else { "--extra-index-url" }.to_owned());
        args.push(url.clone());
    }
    args
}

impl RuntimeBackend for UvBackend {
    fn name(&self) -> &'static str {
        "uv"
    }

    fn available(&self) -> bool {
        self.uv().arg("--version").succeeds() && git::available()
    }

    fn python_version(&self, env: &EnvironmentHandle) -> Result<Option<String>, RuntimeError> {
        if !env.python.exists() {
            return Ok(None);
        }
        let program = env.python.to_string_lossy();
        let out = Tool::new(&program).args(["-c", VERSION_SCRIPT]).run()?;
        if out.split('.').count() != 2 {
            return Err(RuntimeError::Parse(format!(
                "interpreter reported version '{out}'"
            )));
        }
        Ok(Some(out))
    }

    fn list_packages(
        &self,
        env: &EnvironmentHandle,
    ) -> Result<Vec<InstalledPackage>, RuntimeError> {
        if !env.python.exists() {
            return Ok(Vec::new());
        }
        let out = self
            .uv()
            .args(["pip", "list", "--format", "json", "--python"])
            .arg(&env.python)
            .run()?;
        parse_package_list(&out)
    }

    fn create_env(
        &self,
        env: &EnvironmentHandle,
        python: Option<&str>,
    ) -> Result<(), RuntimeError> {
        if env.python.exists() {
            debug!("environment {} already exists", env.venv.display());
            return Ok(());
        }
        info!(
            "creating environment {} (python {})",
            env.venv.display(),
            python.unwrap_or("default")
        );
        let mut cmd = self.uv().args(["venv", "-q"]);
        if let Some(version) = python {
            cmd = cmd.args(["--python", version]);
        }
        cmd.arg(&env.venv).run()?;
        Ok(())
    }

    fn install_packages(
        &self,
        env: &EnvironmentHandle,
        packages: &[PackageEntry],
        index_urls: &[String],
    ) -> Result<(), RuntimeError> {
        check_duplicate_pins(packages)?;
        if packages.is_empty() {
            return Ok(());
        }
        let mut requirements = String::new();
        for pkg in packages {
            requirements.push_str(&pkg.requirement());
            requirements.push('\n');
        }
        fs::create_dir_all(&env.venv)?;
        let req_file = env.venv.join(REQUIREMENTS_FILE);
        fs::write(&req_file, requirements)?;

        info!("installing {} pinned packages", packages.len());
        let output = self
            .uv()
            .args(["pip", "install", "--no-deps", "--python"])
            .arg(&env.python)
            .arg("-r")
            .arg(&req_file)
            .args(index_args(index_urls))
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(
            conflict_from_stderr(packages, &stderr).unwrap_or_else(|| RuntimeError::CommandFailed {
                command: format!("{} pip install", self.uv),
                status: output.status.to_string(),
                stderr: stderr.trim().to_owned(),
            }),
        )
    }

    fn inspect_checkout(&self, dir: &Path) -> Result<Option<CheckoutState>, RuntimeError> {
        git::inspect(dir)
    }

    fn clone_at(&self, url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError> {
        git::clone_at(url, revision, dir)
    }

    fn fetch_checkout(&self, url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError> {
        git::fetch_checkout(url, revision, dir)
    }

    fn run_install_hook(&self, env: &EnvironmentHandle, dir: &Path) -> Result<bool, RuntimeError> {
        if !dir.join(INSTALL_HOOK).is_file() {
            return Ok(false);
        }
        info!("running {INSTALL_HOOK} in {}", dir.display());
        let program = env.python.to_string_lossy();
        Tool::new(&program).arg(INSTALL_HOOK).cwd(dir).run()?;
        Ok(true)
    }
}
