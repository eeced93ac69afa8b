use crate::origin::{mirror_url, origin_url, wants_hf_token};
use crate::{FetchRequest, RegistryConfig, RemoteError, Transport};
use cpack_schema::{Digest, ModelEntry};
use cpack_store::{ModelStore, StagedModel, CHUNK_SIZE};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Origin,
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub url: String,
    pub source: CandidateSource,
}

/// Everything needed to fetch one model: where to try, and what to expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadPlan {
    pub digest: Digest,
    pub size_bytes: u64,
    pub filename: String,
    pub candidates: Vec<Candidate>,
}

/// Resolves model entries to URLs and downloads them into store staging files.
pub struct Resolver {
    config: RegistryConfig,
    transport: Arc<dyn Transport>,
    hf_token: Option<String>,
}

impl Resolver {
    pub fn new(config: RegistryConfig, transport: Arc<dyn Transport>) -> Result<Self, RemoteError> {
        config.validate()?;
        let hf_token = config.effective_hf_token();
        Ok(Self {
            config,
            transport,
            hf_token,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Candidate URLs for `entry`: the recorded origin first, then each mirror.
    pub fn resolve(&self, entry: &ModelEntry) -> Result<DownloadPlan, RemoteError> {
        let mut candidates = Vec::new();
        if let Some(origin) = &entry.origin {
            candidates.push(Candidate {
                url: origin_url(origin),
                source: CandidateSource::Origin,
            });
        }
        for template in &self.config.mirrors {
            if let Some(url) = mirror_url(template, &entry.digest, &entry.filename) {
                if candidates.iter().all(|c| c.url != url) {
                    candidates.push(Candidate {
                        url,
                        source: CandidateSource::Mirror,
                    });
                }
            }
        }

        if candidates.is_empty() {
            return Err(RemoteError::Unresolved {
                digest: entry.digest.to_string(),
                causes: vec!["no origin recorded and no mirrors configured".to_owned()],
            });
        }

        Ok(DownloadPlan {
            digest: entry.digest.clone(),
            size_bytes: entry.size_bytes,
            filename: entry.filename.clone(),
            candidates,
        })
    }

    /// Try every candidate until one yields bytes matching the plan's size and digest.
    ///
    /// Transient failures are retried on the same URL with backoff. A verification
    /// failure moves straight on to the next candidate.
    pub fn download(
        &self,
        plan: &DownloadPlan,
        store: &ModelStore,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<StagedModel, RemoteError> {
        let policy = self.config.retry;
        let mut causes = Vec::new();

        for candidate in &plan.candidates {
            let mut attempt = 0;
            loop {
                attempt += 1;
                if should_stop() {
                    return Err(RemoteError::Cancelled);
                }
                match self.attempt(candidate, plan, store, should_stop) {
                    Ok(staged) => {
                        info!(
                            "downloaded {} from {} ({} bytes)",
                            plan.filename,
                            candidate.url,
                            staged.size()
                        );
                        return Ok(staged);
                    }
                    Err(RemoteError::Cancelled) => return Err(RemoteError::Cancelled),
                    Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                        let delay = policy.delay(attempt);
                        warn!(
                            "attempt {attempt}/{} for {} failed: {e}; retrying in {delay:?}",
                            policy.max_attempts, candidate.url
                        );
                        if sleep_unless_stopped(delay, should_stop) {
                            return Err(RemoteError::Cancelled);
                        }
                    }
                    Err(e) => {
                        warn!("giving up on {}: {e}", candidate.url);
                        causes.push(format!("{}: {e}", candidate.url));
                        break;
                    }
                }
            }
        }

        Err(RemoteError::Unresolved {
            digest: plan.digest.to_string(),
            causes,
        })
    }

    /// Resolve, download and commit `entry` into `store`.
    pub fn fetch(
        &self,
        entry: &ModelEntry,
        store: &ModelStore,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<PathBuf, RemoteError> {
        let plan = self.resolve(entry)?;
        let staged = self.download(&plan, store, should_stop)?;
        Ok(store.commit(staged, &plan.digest)?)
    }

    fn attempt(
        &self,
        candidate: &Candidate,
        plan: &DownloadPlan,
        store: &ModelStore,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<StagedModel, RemoteError> {
        let url = candidate.url.as_str();
        let bearer = if wants_hf_token(url) {
            self.hf_token.as_deref()
        } else {
            None
        };
        let response = self.transport.get(&FetchRequest { url, bearer })?;

        if let Some(len) = response.content_length {
            if len != plan.size_bytes {
                return Err(size_mismatch(url, plan.size_bytes, len));
            }
        }

        debug!("streaming {url} into store staging");
        let mut staging = store.stage()?;
        let mut body = response.body;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if should_stop() {
                return Err(RemoteError::Cancelled);
            }
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(RemoteError::Download {
                        url: url.to_owned(),
                        detail: e.to_string(),
                    })
                }
            };
            if staging.bytes_written() + n as u64 > plan.size_bytes {
                return Err(size_mismatch(
                    url,
                    plan.size_bytes,
                    staging.bytes_written() + n as u64,
                ));
            }
            staging
                .write_all(&buf[..n])
                .map_err(|e| RemoteError::Download {
                    url: url.to_owned(),
                    detail: format!("writing staging file: {e}"),
                })?;
        }

        let staged = staging.finish()?;
        if staged.size() != plan.size_bytes {
            return Err(size_mismatch(url, plan.size_bytes, staged.size()));
        }
        if staged.digest() != &plan.digest {
            return Err(RemoteError::Integrity {
                url: url.to_owned(),
                expected: plan.digest.to_string(),
                actual: staged.digest().to_string(),
            });
        }
        Ok(staged)
    }
}

fn size_mismatch(url: &str, expected: u64, actual: u64) -> RemoteError {
    RemoteError::Integrity {
        url: url.to_owned(),
        expected: format!("{expected} bytes"),
        actual: format!("{actual} bytes"),
    }
}

/// Returns true if `should_stop` fired while waiting.
fn sleep_unless_stopped(total: Duration, should_stop: &dyn Fn() -> bool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if should_stop() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
