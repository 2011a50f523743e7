use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

/// Default cap on concurrent full-render operations.
pub const DEFAULT_RENDER_PERMITS: usize = 3;

/// Errors from the external headless-render capability.
#[derive(Debug, Error, Clone)]
pub enum RenderError {
    #[error("render of `{url}` timed out")]
    Timeout { url: String },
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
    #[error("renderer answered with status {status}")]
    Status { status: u16 },
}

/// External collaborator that executes scripts and returns the resulting
/// HTML. The core only issues the request and consumes the result.
#[async_trait]
pub trait RenderDelegate: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, RenderError>;
}

/// Adapter for an HTTP headless-render service: POST `{ "url": ... }`,
/// receive `{ "html": ... }`.
#[derive(Debug, Clone)]
pub struct HttpRenderDelegate {
    http: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct RenderResponse {
    html: String,
}

impl HttpRenderDelegate {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AnyResult<Self> {
        let http = Client::builder()
            .user_agent("sitecomply/0.9")
            .timeout(timeout)
            .build()
            .context("failed to build renderer HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RenderDelegate for HttpRenderDelegate {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&RenderRequest { url })
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RenderError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    RenderError::Unavailable(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Status {
                status: status.as_u16(),
            });
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|err| RenderError::Unavailable(err.to_string()))?;
        Ok(body.html)
    }
}

/// Delegate used when no renderer is configured; scans then degrade to the
/// lightweight HTML.
#[derive(Debug, Default, Clone)]
pub struct NoopRenderDelegate;

#[async_trait]
impl RenderDelegate for NoopRenderDelegate {
    async fn render(&self, _url: &str) -> Result<String, RenderError> {
        Err(RenderError::Unavailable(
            "no render delegate configured".into(),
        ))
    }
}

/// Bounds concurrent full renders with a counting semaphore and applies a
/// per-render timeout on top of the delegate's own HTTP timeout.
pub struct RenderPool {
    delegate: Arc<dyn RenderDelegate>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl RenderPool {
    pub fn new(delegate: Arc<dyn RenderDelegate>, permits: usize, timeout: Duration) -> Self {
        Self {
            delegate,
            permits: Arc::new(Semaphore::new(permits.max(1))),
            timeout,
        }
    }

    pub fn noop() -> Self {
        Self::new(
            Arc::new(NoopRenderDelegate),
            DEFAULT_RENDER_PERMITS,
            Duration::from_secs(30),
        )
    }

    pub async fn render(&self, url: &str) -> Result<String, RenderError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RenderError::Unavailable("render pool closed".into()))?;
        match tokio::time::timeout(self.timeout, self.delegate.render(url)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDelegate {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RenderDelegate for CountingDelegate {
        async fn render(&self, _url: &str) -> Result<String, RenderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("<html></html>".into())
        }
    }

    #[tokio::test]
    async fn pool_caps_concurrent_renders() {
        let delegate = Arc::new(CountingDelegate {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = Arc::new(RenderPool::new(
            delegate.clone(),
            2,
            Duration::from_secs(5),
        ));

        let mut tasks = Vec::new();
        for i in 0..6 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                pool.render(&format!("https://example.test/{i}")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(delegate.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn pool_times_out_slow_renders() {
        struct SlowDelegate;

        #[async_trait]
        impl RenderDelegate for SlowDelegate {
            async fn render(&self, _url: &str) -> Result<String, RenderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
        }

        let pool = RenderPool::new(Arc::new(SlowDelegate), 1, Duration::from_millis(20));
        let err = pool.render("https://example.test/").await.unwrap_err();
        assert!(matches!(err, RenderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn noop_delegate_reports_unavailable() {
        let pool = RenderPool::noop();
        let err = pool.render("https://example.test/").await.unwrap_err();
        assert!(matches!(err, RenderError::Unavailable(_)));
    }
}
