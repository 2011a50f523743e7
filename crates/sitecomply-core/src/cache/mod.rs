use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::scan::SiteContext;

/// Legal document types the authoritative source can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    Imprint,
    PrivacyPolicy,
    CookiePolicy,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Imprint => "imprint",
            DocumentType::PrivacyPolicy => "privacy-policy",
            DocumentType::CookiePolicy => "cookie-policy",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: document type, locale, and the site-context hash so raw
/// site identifiers never appear in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub document: DocumentType,
    pub locale: String,
    pub site_hash: String,
}

impl CacheKey {
    pub fn new(document: DocumentType, locale: &str, site: &SiteContext) -> Self {
        Self {
            document,
            locale: locale.to_ascii_lowercase(),
            site_hash: site.context_hash(),
        }
    }
}

/// One cached authoritative text. Refreshed in place (last writer wins)
/// and evicted on expiry or explicit invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: String,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Errors from the cache/refresh path. All fall through to the generation
/// path; none is fatal to a fix request.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("authoritative source unavailable: {0}")]
    Unavailable(String),
    #[error("authoritative source has no `{document}` for locale `{locale}`")]
    NotAvailable {
        document: DocumentType,
        locale: String,
    },
}

/// External specialist provider of legally vetted text.
#[async_trait]
pub trait AuthoritativeSource: Send + Sync {
    async fn fetch(
        &self,
        document: DocumentType,
        locale: &str,
        site: &SiteContext,
    ) -> Result<Option<String>, CacheError>;
}

/// HTTP adapter for an authoritative-text service:
/// GET `{endpoint}/documents/{type}/{locale}?site={hash}`.
#[derive(Debug, Clone)]
pub struct HttpAuthoritativeSource {
    http: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct DocumentResponse {
    content: String,
}

impl HttpAuthoritativeSource {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> AnyResult<Self> {
        let http = Client::builder()
            .user_agent("sitecomply/0.9")
            .timeout(timeout)
            .build()
            .context("failed to build authoritative-source HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl AuthoritativeSource for HttpAuthoritativeSource {
    async fn fetch(
        &self,
        document: DocumentType,
        locale: &str,
        site: &SiteContext,
    ) -> Result<Option<String>, CacheError> {
        let url = format!(
            "{}/documents/{}/{}",
            self.endpoint.trim_end_matches('/'),
            document.as_str(),
            locale
        );
        let response = self
            .http
            .get(&url)
            .query(&[("site", site.context_hash())])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let body: DocumentResponse = response
                    .json()
                    .await
                    .map_err(|err| CacheError::Unavailable(err.to_string()))?;
                Ok(Some(body.content))
            }
            404 => Ok(None),
            status => Err(CacheError::Unavailable(format!(
                "unexpected status {status} from {url}"
            ))),
        }
    }
}

/// Source used when no authoritative endpoint is configured; every lookup
/// falls through to generation.
#[derive(Debug, Default, Clone)]
pub struct NoAuthoritativeSource;

#[async_trait]
impl AuthoritativeSource for NoAuthoritativeSource {
    async fn fetch(
        &self,
        _document: DocumentType,
        _locale: &str,
        _site: &SiteContext,
    ) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable(
            "no authoritative source configured".into(),
        ))
    }
}

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Time-boxed cache over the authoritative source. Refresh-on-miss is
/// single-flight per key: concurrent requesters for the same key share one
/// upstream fetch.
pub struct AuthoritativeCache {
    source: Arc<dyn AuthoritativeSource>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    inflight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    ttl: chrono::Duration,
}

impl AuthoritativeCache {
    pub fn new(source: Arc<dyn AuthoritativeSource>, ttl: Duration) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7)),
        }
    }

    /// Return fresh cached content, refreshing from the authoritative
    /// source on miss/expiry. Concurrent callers for the same key share a
    /// single refresh.
    pub async fn get_or_refresh(
        &self,
        document: DocumentType,
        locale: &str,
        site: &SiteContext,
    ) -> Result<String, CacheError> {
        let key = CacheKey::new(document, locale, site);

        if let Some(content) = self.lookup(&key).await {
            tracing::debug!(document = %document, locale, "authoritative cache hit");
            return Ok(content);
        }

        let gate = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_default())
        };
        let _refresh_guard = gate.lock().await;

        // A concurrent flight may have refreshed while we waited.
        if let Some(content) = self.lookup(&key).await {
            return Ok(content);
        }

        tracing::debug!(document = %document, locale, "refreshing authoritative cache");
        let fetched = self.source.fetch(document, locale, site).await?;
        let content = fetched.ok_or_else(|| CacheError::NotAvailable {
            document,
            locale: locale.to_string(),
        })?;

        let now = Utc::now();
        let entry = CacheEntry {
            content: content.clone(),
            stored_at: now,
            expires_at: now + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
        Ok(content)
    }

    async fn lookup(&self, key: &CacheKey) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(Utc::now()))
            .map(|entry| entry.content.clone())
    }

    /// Seed or overwrite an entry directly (warm starts and tests).
    pub async fn put(&self, key: CacheKey, content: impl Into<String>) {
        let now = Utc::now();
        let entry = CacheEntry {
            content: content.into(),
            stored_at: now,
            expires_at: now + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.entries.write().await.remove(key);
    }

    /// Externally inspectable snapshot of all entries.
    pub async fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        content: Option<String>,
    }

    impl CountingSource {
        fn with_content(content: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                content: Some(content.to_string()),
            }
        }

        fn empty() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                content: None,
            }
        }
    }

    #[async_trait]
    impl AuthoritativeSource for CountingSource {
        async fn fetch(
            &self,
            _document: DocumentType,
            _locale: &str,
            _site: &SiteContext,
        ) -> Result<Option<String>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent callers actually overlap with the flight.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(self.content.clone())
        }
    }

    fn site() -> SiteContext {
        SiteContext {
            site_name: "Example Shop".into(),
            host: "example.test".into(),
            locale: "en".into(),
        }
    }

    #[tokio::test]
    async fn refreshes_on_miss_and_serves_from_cache_after() {
        let source = Arc::new(CountingSource::with_content("vetted text"));
        let cache = AuthoritativeCache::new(source.clone(), DEFAULT_CACHE_TTL);

        let first = cache
            .get_or_refresh(DocumentType::Imprint, "de", &site())
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(DocumentType::Imprint, "de", &site())
            .await
            .unwrap();

        assert_eq!(first, "vetted text");
        assert_eq!(second, "vetted text");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_flight() {
        let source = Arc::new(CountingSource::with_content("vetted text"));
        let cache = AuthoritativeCache::new(source.clone(), DEFAULT_CACHE_TTL);
        let site = site();

        let results = futures::future::join_all(
            (0..8).map(|_| cache.get_or_refresh(DocumentType::PrivacyPolicy, "en", &site)),
        )
        .await;
        for result in results {
            assert_eq!(result.unwrap(), "vetted text");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_document_reports_not_available() {
        let cache = AuthoritativeCache::new(Arc::new(CountingSource::empty()), DEFAULT_CACHE_TTL);
        let err = cache
            .get_or_refresh(DocumentType::CookiePolicy, "fr", &site())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotAvailable { .. }));
    }

    #[tokio::test]
    async fn distinct_locales_get_distinct_entries() {
        let source = Arc::new(CountingSource::with_content("text"));
        let cache = AuthoritativeCache::new(source.clone(), DEFAULT_CACHE_TTL);

        cache
            .get_or_refresh(DocumentType::Imprint, "de", &site())
            .await
            .unwrap();
        cache
            .get_or_refresh(DocumentType::Imprint, "en", &site())
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn invalidation_forces_refresh() {
        let source = Arc::new(CountingSource::with_content("text"));
        let cache = AuthoritativeCache::new(source.clone(), DEFAULT_CACHE_TTL);
        let key = CacheKey::new(DocumentType::Imprint, "de", &site());

        cache
            .get_or_refresh(DocumentType::Imprint, "de", &site())
            .await
            .unwrap();
        cache.invalidate(&key).await;
        cache
            .get_or_refresh(DocumentType::Imprint, "de", &site())
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unconfigured_source_is_unavailable() {
        let cache = AuthoritativeCache::new(Arc::new(NoAuthoritativeSource), DEFAULT_CACHE_TTL);
        let err = cache
            .get_or_refresh(DocumentType::Imprint, "en", &site())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));
    }
}
