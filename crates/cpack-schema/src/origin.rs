use crate::manifest::ManifestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a model can be fetched from, one variant per known registry.
///
/// Compact form (CLI and display):
/// - `hf:<owner>/<repo>/<path/in/repo>[@<revision>]`
/// - `civitai:<model version id>`
/// - `https://...` (any direct URL)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "registry")]
pub enum OriginHint {
    #[serde(rename = "huggingface")]
    HuggingFace {
        repo: String,
        #[serde(default = "default_revision")]
        revision: String,
        path: String,
    },
    #[serde(rename = "civitai")]
    Civitai { version_id: u64 },
    #[serde(rename = "url")]
    Url { url: String },
}

fn default_revision() -> String {
    "main".to_owned()
}

impl OriginHint {
    pub fn registry_name(&self) -> &'static str {
        match self {
            OriginHint::HuggingFace { .. } => "huggingface",
            OriginHint::Civitai { .. } => "civitai",
            OriginHint::Url { .. } => "url",
        }
    }
}

impl FromStr for OriginHint {
    type Err = ManifestError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        let invalid = || ManifestError::InvalidOrigin(input.to_owned());

        if let Some(rest) = s.strip_prefix("hf:") {
            let (spec, revision) = match rest.rsplit_once('@') {
                Some((spec, rev)) if !rev.is_empty() => (spec, rev.to_owned()),
                Some(_) => return Err(invalid()),
                None => (rest, default_revision()),
            };
            let mut parts = spec.splitn(3, '/');
            let owner = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
            let name = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
            let path = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
            return Ok(OriginHint::HuggingFace {
                repo: format!("{owner}/{name}"),
                revision,
                path: path.to_owned(),
            });
        }

        if let Some(rest) = s.strip_prefix("civitai:") {
            let version_id = rest.trim().parse::<u64>().map_err(|_| invalid())?;
            return Ok(OriginHint::Civitai { version_id });
        }

        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(OriginHint::Url { url: s.to_owned() });
        }

        Err(invalid())
    }
}

impl fmt::Display for OriginHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginHint::HuggingFace {
                repo,
                revision,
                path,
            } => write!(f, "hf:{repo}/{path}@{revision}"),
            OriginHint::Civitai { version_id } => write!(f, "civitai:{version_id}"),
            OriginHint::Url { url } => f.write_str(url),
        }
    }
}
