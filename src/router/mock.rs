//! Mock fetcher for testing
//!
//! Serves canned responses by URL and records every request so tests can
//! assert on network traffic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{FetchedResponse, Fetcher, ResourceRequest};
use crate::error::NetworkError;

#[derive(Default)]
pub struct MockFetcher {
    /// Canned responses by full URL; unknown URLs answer 404
    responses: Mutex<HashMap<String, FetchedResponse>>,
    /// Error returned for every request while set
    failure: Mutex<Option<NetworkError>>,
    /// Artificial latency before answering
    delay: Mutex<Option<Duration>>,
    /// URLs requested, in order
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, url: &str, status: u16, body: &str) -> Self {
        self.respond(url, status, body);
        self
    }

    /// Set or replace the canned response for `url`
    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            FetchedResponse {
                status,
                body: body.as_bytes().to_vec(),
                content_type: Some("text/plain".to_string()),
            },
        );
    }

    pub fn fail_all(&self, error: NetworkError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &ResourceRequest) -> Result<FetchedResponse, NetworkError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or(FetchedResponse {
                status: 404,
                body: Vec::new(),
                content_type: None,
            }))
    }
}
