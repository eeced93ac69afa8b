//! CLI subprocess integration tests.
//!
//! These tests invoke the `cpack` binary with the mock runtime backend and
//! verify exit codes, stdout content, and JSON output stability.

use cpack_runtime::{CheckoutState, EnvironmentHandle, InstalledPackage, MockBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const WEIGHTS: &[u8] = b"model weights for the cli tests";
const EDITOR_GRAPH: &str = r#"{"nodes":[{"id":1}],"links":[]}"#;

fn cpack_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cpack"));
    cmd.env_remove("CPACK_LOG")
        .args(["--backend", "mock", "--home"])
        .arg(home);
    cmd
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

/// Workspace with one package, one extension checkout, one referenced model.
fn write_workspace(root: &Path) {
    MockBackend::seed_env(
        &EnvironmentHandle::for_workspace(root),
        "3.11",
        &[InstalledPackage {
            name: "numpy".to_owned(),
            version: "1.26.4".to_owned(),
            editable: false,
        }],
    )
    .unwrap();
    MockBackend::seed_checkout(
        &root.join("custom_nodes/x"),
        &CheckoutState {
            remote_url: Some("https://example/repo".to_owned()),
            revision: Some("abcd123".to_owned()),
            dirty: false,
        },
    )
    .unwrap();
    let models = root.join("models/checkpoints");
    fs::create_dir_all(&models).unwrap();
    fs::write(models.join("m.safetensors"), WEIGHTS).unwrap();
    fs::write(
        root.join("workflow_api.json"),
        r#"{"1":{"class_type":"CheckpointLoaderSimple","inputs":{"ckpt_name":"m.safetensors"}}}"#,
    )
    .unwrap();
    fs::write(root.join("workflow.json"), EDITOR_GRAPH).unwrap();
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(&dir.path().join("ws"));
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn pack(&self, home: &Path, include: &str) -> Output {
        cpack_bin(home)
            .arg("--json")
            .arg("pack")
            .arg(self.path("ws"))
            .arg("-o")
            .arg(self.path("ws.cpack.zip"))
            .args(["--include", include])
            .output()
            .unwrap()
    }
}

#[test]
fn cli_version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = cpack_bin(home.path()).arg("--version").output().unwrap();
    assert!(output.status.success(), "cpack --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cpack"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = cpack_bin(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["pack", "unpack", "inspect", "hash", "verify-store", "store-list"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_hash_prints_sha256() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("abc.txt");
    fs::write(&file, "abc").unwrap();
    let output = cpack_bin(dir.path())
        .args(["--json", "hash"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        stdout_json(&output)["digest"],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn cli_pack_then_inspect_agree_on_pack_id() {
    let fx = Fixture::new();
    let home = fx.path("home");
    let output = fx.pack(&home, "reference");
    assert!(
        output.status.success(),
        "pack must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let packed = stdout_json(&output);
    assert_eq!(packed["packages"], 1);
    assert_eq!(packed["extensions"], 1);
    assert_eq!(packed["referenced_models"], 1);
    assert_eq!(packed["editor_graph"], true);

    let output = cpack_bin(&home)
        .args(["--json", "inspect"])
        .arg(fx.path("ws.cpack.zip"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let inspected = stdout_json(&output);
    assert_eq!(inspected["pack_id"], packed["pack_id"]);
    assert_eq!(inspected["manifest"]["packages"][0]["name"], "numpy");
}

#[test]
fn cli_unpack_stored_models_succeeds() {
    let fx = Fixture::new();
    let home = fx.path("home");
    assert!(fx.pack(&home, "store").status.success());

    let target = fx.path("target");
    let output = cpack_bin(&home)
        .args(["--json", "unpack", "--offline"])
        .arg(fx.path("ws.cpack.zip"))
        .arg(&target)
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(stdout_json(&output)["report"]["state"], "done");
    assert_eq!(
        fs::read(target.join("models/checkpoints/m.safetensors")).unwrap(),
        WEIGHTS
    );
    assert!(target.join("custom_nodes/x").is_dir());
    assert_eq!(
        fs::read_to_string(target.join("workflow.json")).unwrap(),
        EDITOR_GRAPH
    );
}

#[test]
fn cli_unpack_missing_model_exits_partial() {
    let fx = Fixture::new();
    assert!(fx.pack(&fx.path("home"), "reference").status.success());

    let empty_home = fx.path("elsewhere");
    let output = cpack_bin(&empty_home)
        .args(["unpack", "--offline"])
        .arg(fx.path("ws.cpack.zip"))
        .arg(fx.path("target"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAILED"), "{stdout}");
    assert!(stdout.contains("search huggingface.co"), "{stdout}");
}

#[test]
fn cli_inspect_garbage_is_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("bad.cpack.zip");
    fs::write(&archive, b"not a zip").unwrap();
    let output = cpack_bin(dir.path())
        .arg("inspect")
        .arg(&archive)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("artifact error"));
}

#[test]
fn cli_store_list_and_verify_after_store_pack() {
    let fx = Fixture::new();
    let home = fx.path("home");
    assert!(fx.pack(&home, "store").status.success());

    let output = cpack_bin(&home)
        .args(["--json", "store-list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listed = stdout_json(&output);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["size_bytes"], WEIGHTS.len());

    let output = cpack_bin(&home)
        .args(["--json", "verify-store"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let verified = stdout_json(&output);
    assert_eq!(verified["checked"], 1);
    assert_eq!(verified["passed"], 1);
}

#[test]
fn cli_verify_store_reports_corruption() {
    let fx = Fixture::new();
    let home = fx.path("home");
    assert!(fx.pack(&home, "store").status.success());

    let digest = cpack_store::hash_bytes(WEIGHTS);
    let entry = cpack_store::StoreLayout::new(&home).model_path(&digest);
    let mut perms = fs::metadata(&entry).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    fs::set_permissions(&entry, perms).unwrap();
    fs::write(&entry, b"bit rot").unwrap();

    let output = cpack_bin(&home).arg("verify-store").output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stdout).contains("FAIL"));
}

#[test]
fn cli_empty_store_lists_nothing() {
    let home = tempfile::tempdir().unwrap();
    let output = cpack_bin(home.path()).arg("store-list").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("store is empty"));
}
