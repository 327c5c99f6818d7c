//! Edge cache purge.
//!
//! The purge call follows the Cloudflare zone API:
//! `POST {api_base}/zones/{zone_id}/purge_cache` with a bearer token and either
//! `{"files": [...]}` or `{"purge_everything": true}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::targets::InvalidationTarget;

/// Cloudflare accepts at most this many URLs per purge request.
const FILES_PER_REQUEST: usize = 30;
pub const DEFAULT_PURGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CdnError {
    #[error("cdn purge request failed: {0}")]
    Request(String),
    #[error("cdn purge timed out")]
    Timeout,
    #[error("cdn purge rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("cannot build absolute url for `{path}`: {source}")]
    InvalidUrl {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build cdn client: {0}")]
    Build(String),
}

impl CdnError {
    fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// What a successful purge covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PurgeScope {
    Everything,
    Files { urls: Vec<String> },
}

#[async_trait]
pub trait CdnPurger: Send + Sync {
    async fn purge(&self, target: &InvalidationTarget) -> Result<PurgeScope, CdnError>;
}

#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub api_base: Url,
    pub zone_id: String,
    pub api_token: String,
    /// Public origin the cached paths are served from, e.g. `https://example.com`.
    pub site: Url,
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PurgeBody<'a> {
    Everything { purge_everything: bool },
    Files { files: &'a [String] },
}

pub struct CloudflarePurger {
    client: Client,
    purge_url: String,
    api_token: String,
    site: Url,
}

impl CloudflarePurger {
    pub fn new(config: CloudflareConfig) -> Result<Self, CdnError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("roamcache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| CdnError::Build(err.to_string()))?;

        let purge_url = format!(
            "{}/zones/{}/purge_cache",
            config.api_base.as_str().trim_end_matches('/'),
            config.zone_id
        );

        Ok(Self {
            client,
            purge_url,
            api_token: config.api_token,
            site: config.site,
        })
    }

    fn absolute_urls(&self, target: &InvalidationTarget) -> Result<Vec<String>, CdnError> {
        let InvalidationTarget::Paths(paths) = target else {
            return Ok(Vec::new());
        };

        paths
            .iter()
            .map(|path| {
                self.site
                    .join(path.as_str())
                    .map(String::from)
                    .map_err(|source| CdnError::InvalidUrl {
                        path: path.as_str().to_string(),
                        source,
                    })
            })
            .collect()
    }

    async fn send(&self, body: &PurgeBody<'_>) -> Result<(), CdnError> {
        let response = self
            .client
            .post(&self.purge_url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .map_err(CdnError::from_request)?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CdnError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CdnPurger for CloudflarePurger {
    async fn purge(&self, target: &InvalidationTarget) -> Result<PurgeScope, CdnError> {
        if target.is_all() {
            self.send(&PurgeBody::Everything {
                purge_everything: true,
            })
            .await?;
            return Ok(PurgeScope::Everything);
        }

        let urls = self.absolute_urls(target)?;
        for chunk in urls.chunks(FILES_PER_REQUEST) {
            self.send(&PurgeBody::Files { files: chunk }).await?;
        }
        debug!(cdn = "cloudflare", files = urls.len(), "Purged edge cache");

        Ok(PurgeScope::Files { urls })
    }
}
