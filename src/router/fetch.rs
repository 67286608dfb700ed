//! Network fetch primitive used by the router and the reachability probe

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

use super::ResourceRequest;
use crate::error::NetworkError;

/// A network response, fully buffered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Non-2xx statuses are `Ok`; only transport
    /// failures and timeouts are errors.
    async fn fetch(&self, request: &ResourceRequest) -> Result<FetchedResponse, NetworkError>;
}

/// reqwest-backed fetcher with a hard per-request timeout
pub struct HttpFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stowaway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ResourceRequest) -> Result<FetchedResponse, NetworkError> {
        let send = async {
            let response = self
                .http
                .request(request.method.clone(), request.url.clone())
                .send()
                .await?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?.to_vec();

            Ok::<_, NetworkError>(FetchedResponse {
                status,
                body,
                content_type,
            })
        };

        match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(Some(self.timeout))),
        }
    }
}
