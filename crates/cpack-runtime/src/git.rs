//! Pinning and checking out source trees with the `git` CLI.

use crate::backend::CheckoutState;
use crate::command::Tool;
use crate::RuntimeError;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Abort network operations slower than this many bytes/s...
const LOW_SPEED_LIMIT: &str = "1000";
/// ...for this many seconds.
const LOW_SPEED_TIME: &str = "60";

fn git(dir: &Path) -> Tool<'_> {
    Tool::new("git")
        .cwd(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_HTTP_LOW_SPEED_LIMIT", LOW_SPEED_LIMIT)
        .env("GIT_HTTP_LOW_SPEED_TIME", LOW_SPEED_TIME)
}

fn checkout_error(dir: &Path, e: &RuntimeError) -> RuntimeError {
    RuntimeError::Checkout {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    }
}

pub fn available() -> bool {
    Tool::new("git").arg("--version").succeeds()
}

/// Whether `dir` is the top level of its own repository (not merely inside one).
fn is_repo_root(dir: &Path) -> bool {
    let Ok(top) = git(dir).args(["rev-parse", "--show-toplevel"]).run() else {
        return false;
    };
    match (fs::canonicalize(top), fs::canonicalize(dir)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn inspect(dir: &Path) -> Result<Option<CheckoutState>, RuntimeError> {
    if !dir.is_dir() || !is_repo_root(dir) {
        return Ok(None);
    }
    let revision = git(dir)
        .args(["rev-parse", "--verify", "-q", "HEAD"])
        .run()
        .ok()
        .filter(|r| !r.is_empty());
    let remote_url = git(dir)
        .args(["config", "--get", "remote.origin.url"])
        .run()
        .ok()
        .filter(|u| !u.is_empty());
    let dirty = !git(dir).args(["status", "--porcelain"]).run()?.is_empty();
    Ok(Some(CheckoutState {
        remote_url,
        revision,
        dirty,
    }))
}

fn has_commit(dir: &Path, revision: &str) -> bool {
    git(dir)
        .args(["rev-parse", "-q", "--verify"])
        .arg(format!("{revision}^{{commit}}"))
        .succeeds()
}

fn set_origin(dir: &Path, url: &str) -> Result<(), RuntimeError> {
    let current = git(dir)
        .args(["config", "--get", "remote.origin.url"])
        .run()
        .ok();
    match current.as_deref() {
        Some(u) if u == url => Ok(()),
        Some(_) => git(dir)
            .args(["remote", "set-url", "origin", url])
            .run()
            .map(drop),
        None => git(dir)
            .args(["remote", "add", "origin", url])
            .run()
            .map(drop),
    }
}

/// Initialize a repository in `dir` (which may hold unrelated files) and check out
/// `revision` from `url`.
pub fn clone_at(url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError> {
    fs::create_dir_all(dir)?;
    info!("cloning {url} at {revision} into {}", dir.display());
    let init = || -> Result<(), RuntimeError> {
        git(dir).args(["init", "-q"]).run()?;
        set_origin(dir, url)
    };
    init().map_err(|e| checkout_error(dir, &e))?;
    fetch_checkout(url, revision, dir)
}

/// Bring an existing repository to `revision`, fetching only when it is not known locally.
pub fn fetch_checkout(url: &str, revision: &str, dir: &Path) -> Result<(), RuntimeError> {
    let work = || -> Result<(), RuntimeError> {
        set_origin(dir, url)?;
        let target = if has_commit(dir, revision) {
            revision.to_owned()
        } else {
            debug!("fetching {url} into {}", dir.display());
            git(dir)
                .args([
                    "fetch",
                    "-q",
                    "--tags",
                    "--filter=blob:none",
                    "origin",
                    "+refs/heads/*:refs/remotes/origin/*",
                ])
                .run()?;
            if has_commit(dir, revision) {
                revision.to_owned()
            } else {
                // Commits not reachable from any branch can still be fetched by id.
                git(dir).args(["fetch", "-q", "origin", revision]).run()?;
                "FETCH_HEAD".to_owned()
            }
        };
        git(dir)
            .args(["-c", "advice.detachedHead=false", "checkout", "-q", "--detach"])
            .arg(&target)
            .run()?;
        git(dir)
            .args(["submodule", "update", "--init", "--recursive", "-q"])
            .run()?;
        Ok(())
    };
    work().map_err(|e| checkout_error(dir, &e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Create a local repository with two commits. Returns (url, first, second).
    pub(crate) fn upstream(dir: &Path) -> (String, String, String) {
        let repo = dir.join("upstream");
        fs::create_dir_all(&repo).unwrap();
        let g = |args: &[&str]| {
            git(&repo)
                .args(args)
                .env("GIT_AUTHOR_NAME", "cpack")
                .env("GIT_AUTHOR_EMAIL", "cpack@example.invalid")
                .env("GIT_COMMITTER_NAME", "cpack")
                .env("GIT_COMMITTER_EMAIL", "cpack@example.invalid")
                .run()
                .unwrap()
        };
        g(&["init", "-q"]);
        fs::write(repo.join("node.py"), "VERSION = 1\n").unwrap();
        g(&["add", "."]);
        g(&["commit", "-q", "-m", "first"]);
        let first = g(&["rev-parse", "HEAD"]);
        fs::write(repo.join("node.py"), "VERSION = 2\n").unwrap();
        g(&["commit", "-q", "-am", "second"]);
        let second = g(&["rev-parse", "HEAD"]);
        (repo.to_string_lossy().into_owned(), first, second)
    }

    fn checkout_dir(dir: &Path) -> PathBuf {
        dir.join("ws").join("custom_nodes").join("x")
    }

    #[test]
    fn clone_and_move_between_revisions() {
        if !available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (url, first, second) = upstream(dir.path());
        let target = checkout_dir(dir.path());

        clone_at(&url, &first[..7], &target).unwrap();
        let state = inspect(&target).unwrap().unwrap();
        assert!(state.is_at(&first));
        assert_eq!(state.remote_url.as_deref(), Some(url.as_str()));
        assert!(!state.dirty);
        assert_eq!(
            fs::read_to_string(target.join("node.py")).unwrap(),
            "VERSION = 1\n"
        );

        fetch_checkout(&url, &second, &target).unwrap();
        assert!(inspect(&target).unwrap().unwrap().is_at(&second));
    }

    #[test]
    fn clone_into_directory_with_unrelated_files() {
        if !available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (url, first, _) = upstream(dir.path());
        let target = dir.path().join("ws");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join(".cpack.lock"), "").unwrap();

        clone_at(&url, &first, &target).unwrap();
        assert!(target.join("node.py").is_file());
        assert!(target.join(".cpack.lock").is_file());
    }

    #[test]
    fn plain_directory_is_not_a_checkout() {
        if !available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(dir.path()).unwrap().is_none());
    }

    #[test]
    fn modified_tree_is_dirty() {
        if !available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (url, first, _) = upstream(dir.path());
        let target = checkout_dir(dir.path());
        clone_at(&url, &first, &target).unwrap();
        fs::write(target.join("node.py"), "patched\n").unwrap();
        assert!(inspect(&target).unwrap().unwrap().dirty);
    }

    #[test]
    fn unknown_revision_fails() {
        if !available() {
            eprintln!("skipping: git not installed");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (url, _, _) = upstream(dir.path());
        let target = checkout_dir(dir.path());
        let err = clone_at(&url, "0000000000000000000000000000000000000000", &target)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Checkout { .. }));
    }
}
