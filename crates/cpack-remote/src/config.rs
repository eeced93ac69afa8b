use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable consulted when no Hugging Face token is configured.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Where and how models are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// URL templates tried after the recorded origin. `{digest}` is required;
    /// `{filename}` expands to the model's file name.
    pub mirrors: Vec<String>,
    pub hf_token: Option<String>,
    pub connect_timeout_secs: u64,
    /// Wait for response headers.
    pub response_timeout_secs: u64,
    /// Cap on one whole request, body included.
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            hf_token: None,
            connect_timeout_secs: 10,
            response_timeout_secs: 60,
            timeout_secs: 6 * 60 * 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn with_mirror(mut self, template: &str) -> Self {
        self.mirrors.push(template.trim_end().to_owned());
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.hf_token = Some(token.to_owned());
        self
    }

    /// Configured token, else `$HF_TOKEN`.
    pub fn effective_hf_token(&self) -> Option<String> {
        self.hf_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                std::env::var(HF_TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.trim().is_empty())
            })
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        for mirror in &self.mirrors {
            if !mirror.contains("{digest}") {
                return Err(RemoteError::Config(format!(
                    "mirror '{mirror}' has no {{digest}} placeholder"
                )));
            }
            if !(mirror.starts_with("http://") || mirror.starts_with("https://")) {
                return Err(RemoteError::Config(format!(
                    "mirror '{mirror}' must be an http(s) URL"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(RemoteError::Config(
                "retry.max_attempts must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounded exponential backoff per candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based: the delay after the first failure).
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}
