use super::{human_size, json_pretty, EXIT_SUCCESS};
use cpack_core::read_artifact;
use cpack_schema::compute_pack_id;
use std::path::Path;

pub fn run(archive: &Path, json: bool) -> Result<u8, String> {
    let artifact = read_artifact(archive).map_err(|e| format!("artifact error: {e}"))?;
    let identity =
        compute_pack_id(&artifact.manifest).map_err(|e| format!("manifest error: {e}"))?;
    let m = &artifact.manifest;

    if json {
        let payload = serde_json::json!({
            "pack_id": identity.pack_id,
            "short_id": identity.short_id,
            "manifest": m,
            "inputs": artifact.assets.keys().collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("pack_id:     {}", identity.pack_id);
    println!("short_id:    {}", identity.short_id);
    println!("schema:      {}", m.schema_version);
    println!("python:      {}", m.python.as_deref().unwrap_or("(unknown)"));
    if let Some(core) = &m.core {
        println!("core:        {}@{}", core.repo_url, core.revision);
    }
    println!("graph:       {} ({})", m.graph.file, m.graph.digest.short());
    println!("packages:    {}", m.packages.len());
    for pkg in &m.packages {
        println!("  {}", pkg.requirement());
    }
    println!("extensions:  {}", m.extensions.len());
    for ext in &m.extensions {
        let dirty = if ext.dirty { " (dirty)" } else { "" };
        println!("  {} {}@{}{dirty}", ext.relative_path, ext.repo_url, ext.revision);
    }
    let total: u64 = m.models.values().map(|e| e.size_bytes).sum();
    println!("models:      {} ({})", m.models.len(), human_size(total));
    for entry in m.models.values() {
        let mut flags = Vec::new();
        if entry.optional {
            flags.push("optional");
        }
        if entry.included_inline {
            flags.push("stored");
        }
        if !entry.referenced {
            flags.push("unreferenced");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "  {} {} {}{flags}",
            entry.digest.short(),
            entry.filename,
            human_size(entry.size_bytes)
        );
        if let Some(origin) = &entry.origin {
            println!("      from {origin}");
        }
    }
    println!("inputs:      {}", artifact.assets.len());
    Ok(EXIT_SUCCESS)
}
