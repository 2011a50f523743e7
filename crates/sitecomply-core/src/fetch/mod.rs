use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod render;
pub mod strategy;

pub use render::{
    HttpRenderDelegate, NoopRenderDelegate, RenderDelegate, RenderError, RenderPool,
    DEFAULT_RENDER_PERMITS,
};
pub use strategy::RenderDecision;

/// How the final HTML of a page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMethod {
    Lightweight,
    FullRender,
}

/// Raw result of a lightweight HTTP fetch.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
}

/// HTML a scan operates on, together with the rendering decision that
/// produced it. Discarded once the checks have run.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub url: String,
    pub html: String,
    pub method: RenderMethod,
    pub fetched_at: DateTime<Utc>,
    pub decision: RenderDecision,
}

/// Errors emitted by the lightweight fetcher.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("request to `{url}` timed out")]
    Timeout { url: String },
    #[error("request to `{url}` failed: {message}")]
    Network { url: String, message: String },
    #[error("`{url}` answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("`{url}` is not a valid URL: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Abstraction over page retrieval so scans can run against canned
/// documents in tests and against HTTP in production.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Production fetcher backed by `reqwest` with a per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> AnyResult<Self> {
        let http = Client::builder()
            .user_agent("sitecomply/0.9")
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("failed to build fetcher HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        url::Url::parse(url).map_err(|err| FetchError::InvalidUrl {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        let response = self.http.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await.map_err(|err| FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        Ok(FetchedPage {
            url: url.to_string(),
            html,
            status: status.as_u16(),
            fetched_at: Utc::now(),
        })
    }
}

/// Turn a fetched page into the document the checks consume, resolving the
/// rendering strategy and delegating to the render pool when required.
pub async fn resolve_document(
    page: FetchedPage,
    pool: &RenderPool,
) -> (RenderedDocument, Option<RenderError>) {
    let decision = strategy::decide(&page.html);
    if !decision.needs_full_render {
        return (
            RenderedDocument {
                url: page.url,
                html: page.html,
                method: RenderMethod::Lightweight,
                fetched_at: page.fetched_at,
                decision,
            },
            None,
        );
    }

    match pool.render(&page.url).await {
        Ok(html) => (
            RenderedDocument {
                url: page.url,
                html,
                method: RenderMethod::FullRender,
                fetched_at: Utc::now(),
                decision,
            },
            None,
        ),
        Err(err) => {
            tracing::warn!(url = %page.url, error = %err, "full render unavailable, scanning lightweight HTML");
            (
                RenderedDocument {
                    url: page.url,
                    html: page.html,
                    method: RenderMethod::Lightweight,
                    fetched_at: page.fetched_at,
                    decision,
                },
                Some(err),
            )
        }
    }
}

/// Scripted fetcher serving canned documents, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    pages: std::collections::HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn page(&self, url: &str) -> Option<&String> {
        self.pages.get(url)
    }
}

#[async_trait]
impl Fetch for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        match self.pages.get(url) {
            Some(html) => Ok(FetchedPage {
                url: url.to_string(),
                html: html.clone(),
                status: 200,
                fetched_at: Utc::now(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
