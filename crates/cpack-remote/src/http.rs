use crate::{FetchRequest, FetchResponse, RegistryConfig, RemoteError, Transport, USER_AGENT};

/// Blocking HTTP transport on `ureq` with connect, response and whole-call timeouts.
///
/// Redirects are followed (registry download endpoints redirect to CDNs).
/// Status codes of 400 and above become [`RemoteError::Http`] with the status set.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(config: &RegistryConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout()))
            .timeout_recv_response(Some(config.response_timeout()))
            .timeout_global(Some(config.timeout()))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
        }
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &FetchRequest<'_>) -> Result<FetchResponse, RemoteError> {
        let url = request.url;
        tracing::debug!("GET {url}");
        let mut req = self.agent.get(url).header("User-Agent", USER_AGENT);
        if let Some(token) = request.bearer {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }

        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http {
                    url: url.to_owned(),
                    status: Some(code),
                    detail: format!("HTTP {code}"),
                });
            }
            Err(e) => {
                return Err(RemoteError::Http {
                    url: url.to_owned(),
                    status: None,
                    detail: e.to_string(),
                });
            }
        };

        let code = resp.status().as_u16();
        if code >= 400 {
            return Err(RemoteError::Http {
                url: url.to_owned(),
                status: Some(code),
                detail: format!("HTTP {code}"),
            });
        }

        let content_length = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        Ok(FetchResponse {
            content_length,
            body: Box::new(resp.into_body().into_reader()),
        })
    }
}
