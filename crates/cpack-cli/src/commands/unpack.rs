use super::{
    colorize_state, json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_PARTIAL, EXIT_SUCCESS,
};
use cpack_core::{shutdown_requested, Engine, ModelAction, ModelReport, UnpackReport};
use cpack_remote::search_hints;
use cpack_schema::Digest;
use std::path::Path;

pub fn run(engine: &Engine, archive: &Path, target: &Path, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, "unpacking...");
    let report = match engine.unpack(archive, target, &shutdown_requested) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                if r.is_done() {
                    spin_ok(pb, "unpack complete");
                } else {
                    spin_fail(pb, "unpack incomplete");
                }
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "unpack failed");
            }
            return Err(e.to_string());
        }
    };

    if json {
        let payload = serde_json::json!({
            "report": report,
            "failures": report.failures(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_summary(&report);
    }

    if report.is_done() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_PARTIAL)
    }
}

fn print_summary(report: &UnpackReport) {
    println!("target:      {}", report.target.display());
    println!("pack_id:     {}", report.pack_id);
    println!("state:       {}", colorize_state(&report.state.to_string()));
    if let Some(core) = report.core {
        println!("core:        {core:?}");
    }
    println!("packages:    {:?}", report.packages);
    for ext in &report.extensions {
        println!("  {:<40} {:?}", ext.path, ext.action);
    }
    println!(
        "models:      {} ({} downloaded)",
        report.models.len(),
        report.downloads()
    );
    for model in &report.models {
        println!("  {:<40} {}", model.filename, model_status(model));
        if model.error.as_deref().is_some_and(|e| e != "cancelled") {
            for hint in search_hints(&Digest::new(model.digest.as_str())) {
                println!("      search {}: {}", hint.site, hint.url);
            }
        }
    }
    let failures = report.failures();
    if !failures.is_empty() {
        println!(
            "{} required model(s) missing; rerun unpack once they are reachable",
            failures.len()
        );
    }
}

fn model_status(model: &ModelReport) -> String {
    match (&model.action, &model.error) {
        (Some(ModelAction::Linked(outcome)), _) => format!("linked ({outcome})"),
        (Some(ModelAction::Adopted(outcome)), _) => format!("adopted ({outcome})"),
        (Some(ModelAction::Downloaded(outcome)), _) => format!("downloaded ({outcome})"),
        (None, Some(e)) if model.optional => format!("skipped (optional): {e}"),
        (None, Some(e)) => format!("FAILED: {e}"),
        (None, None) => "pending".to_owned(),
    }
}
