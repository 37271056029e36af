//! Bounded-concurrency HTTP client.
//!
//! Network failures of any class (timeout, redirect loop, refused
//! connection, truncated payload, non-success status, undecodable body)
//! come back as `None` so that one dead page never aborts a batch. Callers
//! that care count the absence; the fetcher only logs it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::source::Offer;
use crate::Result;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Max simultaneous in-flight requests through this fetcher.
    pub limit: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            timeout: Duration::from_secs(1),
            user_agent: format!("flatmine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.limit)),
            timeout: config.timeout,
        })
    }

    pub async fn get_text(&self, url: &str) -> Option<String> {
        self.get_text_with(url, self.timeout).await
    }

    pub async fn get_text_with(&self, url: &str, timeout: Duration) -> Option<String> {
        let _permit = self.semaphore.acquire().await.ok()?;
        let response = self.client.get(url).timeout(timeout).send().await;
        match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => Some(text),
                Err(error) => {
                    warn!(url, %error, "response body fetch failed");
                    None
                }
            },
            Ok(response) => {
                warn!(url, status = %response.status(), "fetch returned non-success status");
                None
            }
            Err(error) => {
                warn!(url, %error, "fetch failed");
                None
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        self.get_json_with(url, self.timeout).await
    }

    pub async fn get_json_with<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Option<T> {
        let _permit = self.semaphore.acquire().await.ok()?;
        let response = self.client.get(url).timeout(timeout).send().await;
        match response {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(json) => Some(json),
                Err(error) => {
                    warn!(url, %error, "response is not the expected JSON");
                    None
                }
            },
            Ok(response) => {
                warn!(url, status = %response.status(), "fetch returned non-success status");
                None
            }
            Err(error) => {
                warn!(url, %error, "fetch failed");
                None
            }
        }
    }

    /// Result-page fetch: pagination index into the source's URL template.
    pub async fn get_page(&self, template: &str, index: u32) -> Option<String> {
        self.get_text(&page_url(template, index)).await
    }

    /// Offer fetch: attaches the offer page markup; `None` means the offer
    /// is unreachable right now.
    pub async fn get_offer(&self, url: String) -> Option<Offer> {
        let markup = self.get_text(&url).await?;
        Some(Offer { url, markup })
    }
}

pub fn page_url(template: &str, index: u32) -> String {
    template.replace("{}", &index.to_string())
}
