//! Liveness probing against the backend's `/health` endpoint.
//!
//! Probe results only annotate connection confidence; transport close
//! detection stays the sole driver of reconnects.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Health request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Health endpoint returned status {0}")]
    Status(u16),
}

/// A lightweight check of backend reachability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn check(&self) -> Result<(), HealthError>;
}

/// Issues `GET /health` with a short timeout.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<(), HealthError> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HealthError::Status(status.as_u16()));
        }
        Ok(())
    }
}
