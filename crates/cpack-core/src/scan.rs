//! Find the models, graph references and input assets of a live workspace.

use crate::artifact::INPUT_DIR;
use crate::CoreError;
use cpack_schema::{is_safe_relative_path, LocalModel, OriginHint};
use cpack_store::HashCache;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Workspace directory holding model weights.
pub const MODELS_DIR: &str = "models";

/// Suffix the editor appends to input file names in some widgets.
const INPUT_ANNOTATION: &str = " [input]";

fn collect_strings(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) if !s.is_empty() => {
            out.insert(s.replace('\\', "/"));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Every string input value in a graph document.
///
/// Understands both the API form (`{id: {class_type, inputs}}`) and the editor
/// form (`{nodes: [{widgets_values: [...]}]}`). Nothing else in the graph is
/// interpreted.
pub fn graph_string_inputs(graph: &[u8]) -> Result<BTreeSet<String>, CoreError> {
    let doc: Value = serde_json::from_slice(graph)?;
    let mut out = BTreeSet::new();
    let Value::Object(top) = &doc else {
        return Ok(out);
    };
    if let Some(Value::Array(nodes)) = top.get("nodes") {
        for node in nodes {
            if let Some(values) = node.get("widgets_values") {
                collect_strings(values, &mut out);
            }
        }
    }
    for node in top.values() {
        if let Some(Value::Object(inputs)) = node.get("inputs") {
            inputs.values().for_each(|v| collect_strings(v, &mut out));
        }
    }
    Ok(out)
}

/// `a/b/c` yields `a/b/c`, `b/c`, `c`.
fn path_suffixes(path: &str) -> impl Iterator<Item = &str> {
    std::iter::once(path).chain(path.match_indices('/').map(move |(i, _)| &path[i + 1..]))
}

/// Whether the graph names this workspace-relative file (by any trailing sub-path).
pub fn is_referenced(filename: &str, refs: &BTreeSet<String>) -> bool {
    path_suffixes(filename).any(|s| refs.contains(s))
}

fn lookup_origin(
    filename: &str,
    digest: &str,
    origins: &BTreeMap<String, OriginHint>,
) -> Option<OriginHint> {
    path_suffixes(filename)
        .find_map(|s| origins.get(s))
        .or_else(|| origins.get(digest))
        .cloned()
}

fn walk(dir: &Path, rel: &str, files: &mut Vec<(String, std::path::PathBuf)>) -> Result<(), CoreError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let Ok(name) = entry.file_name().into_string() else {
            debug!("skipping non UTF-8 name in {}", dir.display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let child_rel = format!("{rel}/{name}");
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, &child_rel, files)?;
        } else if fs::metadata(&path).is_ok_and(|m| m.is_file() && m.len() > 0) {
            files.push((child_rel, path));
        }
    }
    Ok(())
}

/// Hash every non-empty file under `<workspace>/models` (through `cache`).
///
/// Symlinked files are followed, symlinked directories are not. Dotfiles and
/// empty placeholder files are skipped.
pub fn scan_models(
    workspace: &Path,
    cache: &mut HashCache,
    refs: &BTreeSet<String>,
    origins: &BTreeMap<String, OriginHint>,
) -> Result<Vec<LocalModel>, CoreError> {
    let root = workspace.join(MODELS_DIR);
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    walk(&root, MODELS_DIR, &mut files)?;

    let mut models = Vec::with_capacity(files.len());
    for (filename, path) in files {
        let digest = cache.digest_for(&path)?;
        let size_bytes = fs::metadata(&path)?.len();
        let origin = lookup_origin(&filename, digest.as_str(), origins);
        models.push(LocalModel {
            referenced: is_referenced(&filename, refs),
            digest,
            size_bytes,
            filename,
            origin,
        });
    }
    debug!("scanned {} model files ({} cache hits)", models.len(), cache.hits());
    Ok(models)
}

/// Input files the graph names, read from `<workspace>/input`.
pub fn collect_inputs(
    workspace: &Path,
    refs: &BTreeSet<String>,
) -> Result<BTreeMap<String, Vec<u8>>, CoreError> {
    let dir = workspace.join(INPUT_DIR);
    let mut assets = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(assets);
    }
    for r in refs {
        let name = r.strip_suffix(INPUT_ANNOTATION).unwrap_or(r);
        if !is_safe_relative_path(name) {
            continue;
        }
        let path = dir.join(name);
        if path.is_file() {
            assets.insert(name.to_owned(), fs::read(&path)?);
        }
    }
    Ok(assets)
}
