//! Locating and fetching model weights by digest.
//!
//! [`Resolver::resolve`] turns a manifest model entry into an ordered list of
//! candidate URLs (the recorded origin first, then configured mirrors), and
//! [`Resolver::download`] streams a candidate into a store staging file,
//! verifying size and sha256 before handing it back for commit. Network access
//! goes through the [`Transport`] trait: [`http::HttpTransport`] for real
//! downloads, [`memory::MemoryTransport`] for tests.

pub mod config;
pub mod http;
pub mod memory;
pub mod origin;
pub mod resolver;

pub use config::{RegistryConfig, RetryPolicy};
pub use origin::{search_hints, SearchHint};
pub use resolver::{Candidate, CandidateSource, DownloadPlan, Resolver};

use std::io::Read;
use thiserror::Error;

/// Sent as `User-Agent` on every request.
pub const USER_AGENT: &str = concat!("cpack/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error for {url}: {detail}")]
    Http {
        url: String,
        status: Option<u16>,
        detail: String,
    },
    #[error("download from {url} failed: {detail}")]
    Download { url: String, detail: String },
    #[error("integrity failure for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("model {digest} could not be resolved ({})", .causes.join("; "))]
    Unresolved { digest: String, causes: Vec<String> },
    #[error("download cancelled")]
    Cancelled,
    #[error("store error: {0}")]
    Store(#[from] cpack_store::StoreError),
    #[error("registry config error: {0}")]
    Config(String),
}

impl RemoteError {
    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Http { status: None, .. }
            | RemoteError::Download { .. }
            | RemoteError::Io(_) => true,
            RemoteError::Http {
                status: Some(code), ..
            } => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }
}

/// A GET request for a model file.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub bearer: Option<&'a str>,
}

/// An open response body.
pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub body: Box<dyn Read>,
}

/// Network access used by the resolver.
pub trait Transport: Send + Sync {
    fn get(&self, request: &FetchRequest<'_>) -> Result<FetchResponse, RemoteError>;
}
