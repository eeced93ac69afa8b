use crate::CoreError;
use cpack_remote::RegistryConfig;
use cpack_store::LinkMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the cpack home directory (store and config).
pub const CPACK_HOME_ENV: &str = "CPACK_HOME";
pub const CONFIG_FILE: &str = "config.json";

/// User configuration, read from `$CPACK_HOME/config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpackConfig {
    /// Models materialized in parallel during unpack.
    pub concurrency: usize,
    pub link_mode: LinkMode,
    /// Run an extension's `install.py` after checkout.
    pub run_install_scripts: bool,
    /// Package names never captured by pack.
    pub exclude_packages: Vec<String>,
    pub index_url: Option<String>,
    pub registry: RegistryConfig,
}

impl Default for CpackConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            link_mode: LinkMode::default(),
            run_install_scripts: true,
            exclude_packages: Vec::new(),
            index_url: None,
            registry: RegistryConfig::default(),
        }
    }
}

impl CpackConfig {
    /// Load `$CPACK_HOME/config.json`, or defaults when it does not exist.
    pub fn load_default() -> Result<Self, CoreError> {
        Self::load(&cpack_home()?.join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.concurrency == 0 {
            return Err(CoreError::Config("concurrency must be at least 1".to_owned()));
        }
        self.registry
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))
    }
}

/// `$CPACK_HOME`, else `~/.cpack`.
pub fn cpack_home() -> Result<PathBuf, CoreError> {
    if let Some(home) = std::env::var_os(CPACK_HOME_ENV).filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let home = std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CoreError::Config(format!("neither {CPACK_HOME_ENV} nor HOME is set")))?;
    Ok(PathBuf::from(home).join(".cpack"))
}
