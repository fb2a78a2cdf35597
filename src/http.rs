use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use tokio::sync::Semaphore;

use crate::config::HttpConfig;
use crate::error::FetchError;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

// Shared client for the whole run. The semaphore caps in-flight requests across every
// series and episode task.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    permits: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let max_connections = config.max_connections.max(1);
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .pool_max_idle_per_host(max_connections)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            permits: Arc::new(Semaphore::new(max_connections)),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::PoolClosed {
                url: url.to_owned(),
            })?;

        let request_error = |source| FetchError::Request {
            url: url.to_owned(),
            source,
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "unexpected http status");
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(request_error)
    }
}
