use super::{human_size, json_pretty, EXIT_SUCCESS};
use cpack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let store = engine.store();
    let digests = store.list().map_err(|e| format!("store error: {e}"))?;
    let mut rows = Vec::with_capacity(digests.len());
    for digest in digests {
        let size = store
            .size_of(&digest)
            .map_err(|e| format!("store error: {e}"))?;
        rows.push((digest, size));
    }

    if json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(digest, size)| serde_json::json!({ "digest": digest, "size_bytes": size }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if rows.is_empty() {
        println!("store is empty");
    } else {
        let total: u64 = rows.iter().map(|(_, size)| size).sum();
        for (digest, size) in &rows {
            println!("{digest}  {:>10}", human_size(*size));
        }
        println!("{} model(s), {}", rows.len(), human_size(total));
    }
    Ok(EXIT_SUCCESS)
}
