//! In-process transport serving canned responses, for tests and offline runs.

use crate::{FetchRequest, FetchResponse, RemoteError, Transport};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Route {
    Body(Vec<u8>),
    Status(u16),
    /// Answer 503 this many times, then serve the body.
    Flaky { failures_left: u32, body: Vec<u8> },
}

/// Transport backed by a URL → response table. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, Route>>,
    log: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.insert(url, Route::Body(body.into()));
    }

    pub fn fail_with_status(&self, url: &str, status: u16) {
        self.insert(url, Route::Status(status));
    }

    pub fn serve_after_failures(&self, url: &str, failures: u32, body: impl Into<Vec<u8>>) {
        self.insert(
            url,
            Route::Flaky {
                failures_left: failures,
                body: body.into(),
            },
        );
    }

    fn insert(&self, url: &str, route: Route) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_owned(), route);
        }
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().map(|l| l.len()).unwrap_or(0)
    }
}

fn status(url: &str, code: u16) -> RemoteError {
    RemoteError::Http {
        url: url.to_owned(),
        status: Some(code),
        detail: format!("HTTP {code}"),
    }
}

impl Transport for MemoryTransport {
    fn get(&self, request: &FetchRequest<'_>) -> Result<FetchResponse, RemoteError> {
        let url = request.url;
        if let Ok(mut log) = self.log.lock() {
            log.push(url.to_owned());
        }
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| RemoteError::Config("memory transport poisoned".to_owned()))?;

        let body = match routes.get_mut(url) {
            None => return Err(status(url, 404)),
            Some(Route::Status(code)) => return Err(status(url, *code)),
            Some(Route::Body(body)) => body.clone(),
            Some(Route::Flaky {
                failures_left,
                body,
            }) => {
                if *failures_left > 0 {
                    *failures_left -= 1;
                    return Err(status(url, 503));
                }
                body.clone()
            }
        };

        Ok(FetchResponse {
            content_length: Some(body.len() as u64),
            body: Box::new(Cursor::new(body)),
        })
    }
}
