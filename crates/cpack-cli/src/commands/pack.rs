use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, split_assignment, EXIT_SUCCESS};
use cpack_core::{Engine, PackOptions};
use cpack_schema::{InclusionPolicy, ModelInclusion, OriginHint, EDITOR_GRAPH_FILE, GRAPH_FILE};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct PackArgs<'a> {
    pub workspace: &'a Path,
    pub graph: Option<&'a Path>,
    pub editor_graph: Option<&'a Path>,
    pub output: Option<&'a Path>,
    pub python: Option<&'a Path>,
    pub include: ModelInclusion,
    pub models: &'a [String],
    pub origins: &'a [String],
}

pub fn run(engine: &Engine, args: &PackArgs<'_>, json: bool) -> Result<u8, String> {
    let options = PackOptions {
        workspace: args.workspace.to_path_buf(),
        graph: args
            .graph
            .map_or_else(|| args.workspace.join(GRAPH_FILE), Path::to_path_buf),
        editor_graph: editor_graph_path(args.workspace, args.editor_graph),
        output: args
            .output
            .map_or_else(|| default_output(args.workspace), Path::to_path_buf),
        python: args.python.map(Path::to_path_buf),
        policy: parse_policy(args.include, args.models)?,
        origins: parse_origins(args.origins)?,
    };

    let pb = maybe_spinner(json, "packing workspace...");
    let report = match engine.pack(&options) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "workspace packed");
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "pack failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("packed {} ({})", report.path.display(), report.short_id);
        println!("pack_id:     {}", report.pack_id);
        println!(
            "python:      {}",
            report.python.as_deref().unwrap_or("(unknown)")
        );
        println!("packages:    {}", report.packages);
        println!("extensions:  {}", report.extensions);
        println!(
            "models:      {} ({} referenced, {} stored)",
            report.models, report.referenced_models, report.stored_inline
        );
        println!("inputs:      {}", report.assets);
        if report.editor_graph {
            println!("editor:      {EDITOR_GRAPH_FILE}");
        }
        for anomaly in &report.anomalies {
            println!("  warning: {anomaly}");
        }
    }
    Ok(EXIT_SUCCESS)
}

/// The explicit editor graph, else `<workspace>/workflow.json` when it exists.
fn editor_graph_path(workspace: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = workspace.join(EDITOR_GRAPH_FILE);
            default.is_file().then_some(default)
        }
    }
}

/// `<workspace name>.cpack.zip` in the current directory.
fn default_output(workspace: &Path) -> PathBuf {
    let name = workspace
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "workspace".to_owned());
    PathBuf::from(format!("{name}.cpack.zip"))
}

fn parse_policy(default: ModelInclusion, overrides: &[String]) -> Result<InclusionPolicy, String> {
    let mut policy = InclusionPolicy::with_default(default);
    for raw in overrides {
        let (name, mode) = split_assignment(raw)?;
        let inclusion: ModelInclusion = mode
            .parse()
            .map_err(|e| format!("--model {raw}: {e}"))?;
        policy = policy.with_override(name, inclusion);
    }
    Ok(policy)
}

fn parse_origins(raw: &[String]) -> Result<BTreeMap<String, OriginHint>, String> {
    let mut origins = BTreeMap::new();
    for item in raw {
        let (name, hint) = split_assignment(item)?;
        let hint: OriginHint = hint.parse().map_err(|e| format!("--origin {item}: {e}"))?;
        origins.insert(name.to_owned(), hint);
    }
    Ok(origins)
}
