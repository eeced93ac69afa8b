//! Interpreter environments and extension checkouts for cpack.
//!
//! The `RuntimeBackend` trait covers everything that touches external tools:
//! creating the isolated interpreter environment, installing pinned packages,
//! and pinning or checking out version-controlled source trees. `UvBackend`
//! drives `uv` and `git`; `MockBackend` records calls on disk for tests. On top
//! of a backend sit the snapshotter (pack side) and the environment builder
//! (unpack side).

pub mod backend;
pub mod builder;
mod command;
pub mod git;
pub mod handle;
pub mod mock;
pub mod snapshot;
pub mod uv;

pub use backend::{select_backend, CheckoutState, InstalledPackage, RuntimeBackend};
pub use builder::{BuildOptions, CheckoutAction, EnvironmentBuilder, PackagePhase};
pub use handle::EnvironmentHandle;
pub use mock::MockBackend;
pub use snapshot::{snapshot, SnapshotOptions};
pub use uv::UvBackend;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("required tool '{0}' was not found on PATH")]
    ToolMissing(String),
    #[error("command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("dependency conflict involving {}: {detail}", .packages.join(", "))]
    DependencyConflict {
        packages: Vec<String>,
        detail: String,
    },
    #[error("checkout of {} failed: {detail}", path.display())]
    Checkout { path: PathBuf, detail: String },
    #[error("unexpected tool output: {0}")]
    Parse(String),
    #[error("cancelled")]
    Cancelled,
}
