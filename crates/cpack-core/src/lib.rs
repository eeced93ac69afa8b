//! Pack and unpack orchestration for cpack.
//!
//! This crate ties the schema, store, remote and runtime crates together into the
//! [`Engine`]: `pack` snapshots a live workspace into a `*.cpack.zip` artifact, and
//! `unpack` drives the unpack state machine (environment, extensions, models) to
//! rebuild it elsewhere. It also owns the artifact codec, workspace scanning,
//! the bounded worker pool used for model materialization, workspace locking, and
//! configuration.

pub mod artifact;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod materialize;
pub mod pool;
pub mod scan;

pub use artifact::{read_artifact, write_artifact, Artifact, ArtifactError};
pub use concurrency::{install_signal_handler, shutdown_requested, WorkspaceLock};
pub use config::{cpack_home, CpackConfig};
pub use engine::{Engine, ModelReport, PackOptions, PackReport, UnpackReport};
pub use lifecycle::{validate_transition, UnpackState};
pub use materialize::ModelAction;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One model that could not be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelFailure {
    pub digest: String,
    pub filename: String,
    pub cause: String,
}

/// Every required model that failed during an otherwise complete unpack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialUnpack {
    pub failures: Vec<ModelFailure>,
}

impl fmt::Display for PartialUnpack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} model(s) could not be materialized", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                "\n  {} ({}): {}",
                failure.digest, failure.filename, failure.cause
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] cpack_schema::ManifestError),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("store error: {0}")]
    Store(#[from] cpack_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] cpack_remote::RemoteError),
    #[error("runtime error: {0}")]
    Runtime(#[from] cpack_runtime::RuntimeError),
    #[error("partial unpack: {0}")]
    PartialUnpack(PartialUnpack),
    #[error("unpack failed while reaching {stage}: {source}")]
    Stage {
        stage: UnpackState,
        #[source]
        source: Box<CoreError>,
    },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{} is locked by another cpack process", .0.display())]
    Locked(PathBuf),
    #[error("cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// The innermost error, looking through stage wrappers.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            CoreError::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
