pub mod hash;
pub mod inspect;
pub mod pack;
pub mod store_list;
pub mod unpack;
pub mod verify_store;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_PARTIAL: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Spinner only for human output; JSON callers get `None`.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(spinner(msg))
    }
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "done" => Style::new().green().apply_to(state).to_string(),
        "failed" => Style::new().red().bold().apply_to(state).to_string(),
        "models_ready" => Style::new().yellow().apply_to(state).to_string(),
        "init" | "environment_ready" | "extensions_ready" => {
            Style::new().dim().apply_to(state).to_string()
        }
        other => other.to_owned(),
    }
}

/// Split a `KEY=VALUE` command-line assignment.
pub fn split_assignment(input: &str) -> Result<(&str, &str), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{input}'")),
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
