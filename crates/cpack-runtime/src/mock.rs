use crate::backend::{CheckoutState, InstalledPackage, RuntimeBackend};
use crate::handle::EnvironmentHandle;
use crate::RuntimeError;
use cpack_schema::PackageEntry;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const CHECKOUT_MARKER: &str = ".mock-checkout";
const PYTHON_MARKER: &str = "mock-python";
const PACKAGES_FILE: &str = "mock-packages.json";

/// A backend that never spawns a process. Checkouts and environments are
/// recorded as small files so state survives across backend instances, and
/// every mutating call is counted.
pub struct MockBackend {
    default_python: String,
    conflicting: Vec<String>,
    unreachable: Mutex<BTreeSet<String>>,
    clones: AtomicUsize,
    fetches: AtomicUsize,
    installs: AtomicUsize,
    envs_created: AtomicUsize,
    hooks_run: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            default_python: "3.11".to_owned(),
            conflicting: Vec::new(),
            unreachable: Mutex::new(BTreeSet::new()),
            clones: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
            envs_created: AtomicUsize::new(0),
            hooks_run: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installing any of these names fails with a dependency conflict.
    #[must_use]
    pub fn with_conflict(mut self, packages: &[&str]) -> Self {
        self.conflicting = packages
            .iter()
            .map(|p| cpack_schema::normalize_package_name(p))
            .collect();
        self
    }

    /// Clones and fetches from `url` fail from now on.
    pub fn make_unreachable(&self, url: &str) {
        if let Ok(mut set) = self.unreachable.lock() {
            set.insert(url.to_owned());
        }
    }

    /// Pretend `dir` is a checkout in the given state.
    pub fn seed_checkout(dir: &Path, state: &CheckoutState) -> Result<(), RuntimeError> {
        fs::create_dir_all(dir)?;
        write_state(dir, state)
    }

    /// Pretend `env` exists with these packages installed.
    pub fn seed_env(
        env: &EnvironmentHandle,
        python: &str,
        packages: &[InstalledPackage],
    ) -> Result<(), RuntimeError> {
        write_env(env, python)?;
        write_packages(env, packages)
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn envs_created(&self) -> usize {
        self.envs_created.load(Ordering::SeqCst)
    }

    pub fn hooks_run(&self) -> usize {
        self.hooks_run.load(Ordering::SeqCst)
    }

    pub fn total_operations(&self) -> usize {
        self.clones() + self.fetches() + self.installs() + self.envs_created() + self.hooks_run()
    }

    fn check_reachable(&self, url: &str, dir: &Path) -> Result<(), RuntimeError> {
        let blocked = self
            .unreachable
            .lock()
            .map_err(|e| RuntimeError::Parse(format!("mutex poisoned: {e}")))?
            .contains(url);
        if blocked {
            return Err(RuntimeError::Checkout {
                path: dir.to_path_buf(),
                detail: format!("could not reach {url}"),
            });
        }
        Ok(())
    }
}

fn write_state(dir: &Path, state: &CheckoutState) -> Result<(), RuntimeError> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| RuntimeError::Parse(e.to_string()))?;
    fs::write(dir.join(CHECKOUT_MARKER), json)?;
    Ok(())
}

fn write_env(env: &EnvironmentHandle, python: &str) -> Result<(), RuntimeError> {
    if let Some(parent) = env.python.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&env.python, "#!/bin/sh\n")?;
    fs::write(env.venv.join(PYTHON_MARKER), python)?;
    Ok(())
}

fn write_packages(env: &EnvironmentHandle, packages: &[InstalledPackage]) -> Result<(), RuntimeError> {
    fs::create_dir_all(&env.venv)?;
    let json = serde_json::to_string_pretty(packages)
        .map_err(|e| RuntimeError::Parse(e.to_string()))?;
    fs::write(env.venv.join(PACKAGES_FILE), json)?;
    Ok(())
}

impl RuntimeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn python_version(&self, env: &EnvironmentHandle) -> Result<Option<String>, RuntimeError> {
        match fs::read_to_string(env.venv.join(PYTHON_MARKER)) {
            Ok(v) => Ok(Some(v.trim().to_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_packages(
        &self,
        env: &EnvironmentHandle,
    ) -> Result<Vec<InstalledPackage>, RuntimeError> {
        match fs::read_to_string(env.venv.join(PACKAGES_FILE)) {
            Ok(json) => serde_json::from_str(&json).map_err(|e| RuntimeError::Parse(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn create_env(
        &self,
        env: &EnvironmentHandle,
        python: Option<&str>,
    ) -> Result<(), RuntimeError> {
        if env.python.exists() {
            return Ok(());
        }
        self.envs_created.fetch_add(1, Ordering::SeqCst);
        write_env(env, python.unwrap_or(&self.default_python))
    }

    fn install_packages(
        &self,
        env: &EnvironmentHandle,
        packages: &[PackageEntry],
        _index_urls: &[String],
    ) -> Result<(), RuntimeError> {
        crate::uv::check_duplicate_pins(packages)?;
        let conflicting: Vec<String> = packages
            .iter()
            .filter(|p| self.conflicting.contains(&p.normalized_name()))
            .map(PackageEntry::requirement)
            .collect();
        if !conflicting.is_empty() {
            return Err(RuntimeError::DependencyConflict {
                packages: conflicting,
                detail: "mock resolver found no solution".to_owned(),
            });
        }
        self.installs.fetch_add(1, Ordering::SeqCst);
        let mut installed = self.list_packages(env)?;
        for pkg in packages {
            installed.retain(|p| {
                cpack_schema::normalize_package_name(&p.name) != pkg.normalized_name()
            });
            installed.push(InstalledPackage {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                editable: false,
            });
        }
        installed.sort_by(|a, b| a.name.cmp(&b.name));
        write_packages(env, &installed)
    }

    fn inspect_checkout(&self, dir: &Path) -> Result<Option<CheckoutState>, RuntimeError> {
        match fs::read_to_string(dir.join(CHECKOUT_MARKER)) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| RuntimeError::Parse(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clone_at(&self, url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError> {
        self.check_reachable(url, dir)?;
        self.clones.fetch_add(1, Ordering::SeqCst);
        Self::seed_checkout(
            dir,
            &CheckoutState {
                remote_url: Some(url.to_owned()),
                revision: Some(revision.to_owned()),
                dirty: false,
            },
        )
    }

    fn fetch_checkout(&self, url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError> {
        self.check_reachable(url, dir)?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let dirty = self
            .inspect_checkout(dir)?
            .is_some_and(|state| state.dirty);
        write_state(
            dir,
            &CheckoutState {
                remote_url: Some(url.to_owned()),
                revision: Some(revision.to_owned()),
                dirty,
            },
        )
    }

    fn run_install_hook(&self, _env: &EnvironmentHandle, dir: &Path) -> Result<bool, RuntimeError> {
        if !dir.join("install.py").is_file() {
            return Ok(false);
        }
        self.hooks_run.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
