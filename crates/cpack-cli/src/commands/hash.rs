use super::{json_pretty, EXIT_SUCCESS};
use cpack_store::hash_file;
use std::path::Path;

pub fn run(file: &Path, json: bool) -> Result<u8, String> {
    let digest = hash_file(file).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "path": file,
            "digest": digest,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{digest}  {}", file.display());
    }
    Ok(EXIT_SUCCESS)
}
