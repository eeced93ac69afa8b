//! Candidate URLs from origin hints and mirror templates.

use cpack_schema::{Digest, OriginHint};
use serde::Serialize;

const HF_HOST: &str = "https://huggingface.co";
const CIVITAI_DOWNLOAD: &str = "https://civitai.com/api/download/models";
const SEARCH_BASE: &str = "https://www.google.com/search";

fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'/') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Direct download URL for an origin hint.
pub fn origin_url(hint: &OriginHint) -> String {
    match hint {
        OriginHint::HuggingFace {
            repo,
            revision,
            path,
        } => format!(
            "{HF_HOST}/{}/resolve/{}/{}",
            encode_path(repo),
            encode_path(revision),
            encode_path(path.trim_start_matches('/'))
        ),
        OriginHint::Civitai { version_id } => format!("{CIVITAI_DOWNLOAD}/{version_id}"),
        OriginHint::Url { url } => url.clone(),
    }
}

/// Expand a mirror template. `None` when the template lacks `{digest}`.
pub fn mirror_url(template: &str, digest: &Digest, filename: &str) -> Option<String> {
    if !template.contains("{digest}") {
        return None;
    }
    let basename = filename.rsplit('/').next().unwrap_or(filename);
    Some(
        template
            .replace("{digest}", digest.as_str())
            .replace("{filename}", &encode_path(basename)),
    )
}

/// Hugging Face needs the bearer token; nothing else should see it.
pub fn wants_hf_token(url: &str) -> bool {
    url.starts_with(HF_HOST) && url[HF_HOST.len()..].starts_with('/')
}

/// A web search that may locate a model by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHint {
    pub site: &'static str,
    pub url: String,
}

/// Search links for a model nobody knows where to get.
pub fn search_hints(digest: &Digest) -> Vec<SearchHint> {
    let upper = digest.as_str().to_ascii_uppercase();
    ["huggingface.co", "civitai.com"]
        .into_iter()
        .map(|site| SearchHint {
            site,
            url: format!("{SEARCH_BASE}?q=site%3A{site}+{upper}"),
        })
        .collect()
}
