use super::{json_pretty, EXIT_STORE_ERROR, EXIT_SUCCESS};
use cpack_core::Engine;
use cpack_store::verify_store_integrity;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = verify_store_integrity(engine.store().layout())
        .map_err(|e| format!("store error: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "checked": report.checked,
            "passed": report.passed,
            "failed": report.failed,
            "stale_staging": report.stale_staging,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "store integrity: {}/{} models passed",
            report.passed, report.checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.digest, f.reason);
        }
        if report.stale_staging > 0 {
            println!("  {} leftover staging file(s)", report.stale_staging);
        }
    }

    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
