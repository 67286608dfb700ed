//! Remote delivery of sync queue items

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

use super::rate_limit::RateLimiterSet;
use crate::error::NetworkError;
use crate::store::SyncKind;

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 2xx
    Delivered,
    /// 400/422: the payload will never be accepted
    Rejected(String),
    /// Anything else; counts as one failed attempt
    Failed(String),
}

#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn deliver(&self, kind: SyncKind, payload: &serde_json::Value) -> Delivery;
}

/// POSTs JSON payloads to the per-kind sync endpoints
pub struct HttpSink {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    limiters: RateLimiterSet,
}

impl HttpSink {
    pub fn new(base_url: Url, timeout: Duration, per_second: u32) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stowaway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            timeout,
            limiters: RateLimiterSet::new(per_second),
        })
    }

    fn endpoint(&self, kind: SyncKind) -> Result<Url, NetworkError> {
        self.base_url
            .join(kind.endpoint())
            .map_err(|e| NetworkError::InvalidUrl(e.to_string()))
    }

    async fn post(&self, url: Url, payload: &serde_json::Value) -> Result<StatusCode, NetworkError> {
        let send = async {
            let response = self.http.post(url).json(payload).send().await?;
            Ok::<_, NetworkError>(response.status())
        };
        match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(Some(self.timeout))),
        }
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn deliver(&self, kind: SyncKind, payload: &serde_json::Value) -> Delivery {
        let url = match self.endpoint(kind) {
            Ok(url) => url,
            Err(e) => return Delivery::Rejected(e.to_string()),
        };

        self.limiters.wait_for(kind).await;
        log::debug!("POST {}", url);

        match self.post(url, payload).await {
            Ok(status) if status.is_success() => Delivery::Delivered,
            Ok(StatusCode::BAD_REQUEST) | Ok(StatusCode::UNPROCESSABLE_ENTITY) => {
                Delivery::Rejected(format!("{} endpoint rejected payload", kind))
            }
            Ok(StatusCode::TOO_MANY_REQUESTS) => {
                self.limiters.activate(kind);
                Delivery::Failed(NetworkError::Status(429).to_string())
            }
            Ok(status) => Delivery::Failed(NetworkError::Status(status.as_u16()).to_string()),
            Err(e) => Delivery::Failed(e.to_string()),
        }
    }
}
