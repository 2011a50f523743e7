use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use sitecomply_core::cache::{
    AuthoritativeCache, AuthoritativeSource, CacheError, CacheKey, DocumentType,
    DEFAULT_CACHE_TTL,
};
use sitecomply_core::fix::{FixEngine, FixEngineConfig};
use sitecomply_core::provider::{ProviderError, StaticProvider};
use sitecomply_core::sanitize::WhiteLabelSanitizer;
use sitecomply_core::telemetry::CallOutcome;
use sitecomply_core::{
    ArtifactType, Category, FixRequest, FixSource, FixStatus, ProviderClient, RetryPolicy,
    SiteContext, Telemetry,
};

fn site() -> SiteContext {
    SiteContext {
        site_name: "Example Shop".into(),
        host: "example.test".into(),
        locale: "en".into(),
    }
}

struct CountingSource {
    calls: AtomicUsize,
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
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(
            "This site uses cookies. Non-essential cookies require your consent.".to_string(),
        ))
    }
}

fn no_source_cache() -> Arc<AuthoritativeCache> {
    Arc::new(AuthoritativeCache::new(
        Arc::new(sitecomply_core::cache::NoAuthoritativeSource),
        DEFAULT_CACHE_TTL,
    ))
}

fn fast_config() -> FixEngineConfig {
    FixEngineConfig {
        provider_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
    }
}

#[tokio::test(flavor = "current_thread")]
async fn exhausted_providers_degrade_to_template_never_failed() {
    let primary = StaticProvider::new("primary").fail_with(ProviderError::Timeout);
    let secondary =
        StaticProvider::new("secondary").fail_with(ProviderError::Network("down".into()));
    let telemetry = Arc::new(Telemetry::new());
    let engine = FixEngine::new(
        vec![Box::new(primary), Box::new(secondary)],
        no_source_cache(),
        Arc::clone(&telemetry),
    )
    .with_config(fast_config());

    let request = FixRequest::new(Category::PrivacyPolicy, ArtifactType::LegalText, site());
    let result = engine.fix(&request).await.unwrap();

    assert_eq!(result.status, FixStatus::Degraded);
    assert_eq!(result.source, FixSource::Template);
    let calls = telemetry.provider_calls_for(&result.request_id);
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .all(|call| call.outcome != CallOutcome::Ok));
}

#[tokio::test(flavor = "current_thread")]
async fn warm_cache_answers_without_any_provider_call() {
    let cache = no_source_cache();
    cache
        .put(
            CacheKey::new(DocumentType::CookiePolicy, "en", &site()),
            "This site uses cookies. Non-essential cookies require your consent.",
        )
        .await;
    let telemetry = Arc::new(Telemetry::new());
    let provider = StaticProvider::new("primary").respond_with("never used");
    let engine = FixEngine::new(vec![Box::new(provider)], cache, Arc::clone(&telemetry));

    let request = FixRequest::new(Category::CookieConsent, ArtifactType::LegalText, site());
    let result = engine.fix(&request).await.unwrap();

    assert_eq!(result.source, FixSource::AuthoritativeCache);
    assert!(telemetry.provider_calls_for(&result.request_id).is_empty());
    assert!(telemetry.provider_calls().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_fixes_share_one_cache_refresh() {
    let source = Arc::new(CountingSource {
        calls: AtomicUsize::new(0),
    });
    let cache = Arc::new(AuthoritativeCache::new(
        Arc::clone(&source) as Arc<dyn AuthoritativeSource>,
        DEFAULT_CACHE_TTL,
    ));
    let telemetry = Arc::new(Telemetry::new());
    let engine = FixEngine::new(Vec::new(), cache, telemetry);

    let requests: Vec<FixRequest> = (0..6)
        .map(|_| FixRequest::new(Category::CookieConsent, ArtifactType::LegalText, site()))
        .collect();
    let results =
        futures::future::join_all(requests.iter().map(|request| engine.fix(request))).await;
    for result in results {
        assert_eq!(result.unwrap().source, FixSource::AuthoritativeCache);
    }
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_primary_response_records_one_rejection_before_secondary() {
    let primary = StaticProvider::new("primary")
        .respond_with(r#"{"language": "html", "snippet": "<div><span>unbalanced</div>"}"#);
    let secondary = StaticProvider::new("secondary").respond_with(
        r#"{"language": "html", "snippet": "<main role=\"main\"><h1>Fixed</h1></main>"}"#,
    );
    let telemetry = Arc::new(Telemetry::new());
    let engine = FixEngine::new(
        vec![Box::new(primary), Box::new(secondary)],
        no_source_cache(),
        Arc::clone(&telemetry),
    )
    .with_config(fast_config());

    let request = FixRequest::new(Category::Accessibility, ArtifactType::Code, site());
    let result = engine.fix(&request).await.unwrap();

    assert_eq!(
        result.source,
        FixSource::Provider {
            name: "secondary".into()
        }
    );
    let calls = telemetry.provider_calls_for(&result.request_id);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].provider, "primary");
    assert_eq!(calls[0].outcome, CallOutcome::ValidationRejected);
    assert_eq!(calls[1].provider, "secondary");
    assert_eq!(calls[1].outcome, CallOutcome::Ok);
}

#[tokio::test(flavor = "current_thread")]
async fn placeholder_tokens_trigger_the_next_fallback_stage() {
    let primary = StaticProvider::new("primary").respond_with(
        r#"{"title": "Privacy Policy", "body": "The controller [INSERT COMPANY] processes personal data and honours your rights."}"#,
    );
    let telemetry = Arc::new(Telemetry::new());
    let engine = FixEngine::new(
        vec![Box::new(primary)],
        no_source_cache(),
        Arc::clone(&telemetry),
    )
    .with_config(fast_config());

    let request = FixRequest::new(Category::PrivacyPolicy, ArtifactType::LegalText, site());
    let result = engine.fix(&request).await.unwrap();

    // Placeholder rejected: the deterministic template took over.
    assert_eq!(result.source, FixSource::Template);
    assert_eq!(result.status, FixStatus::Degraded);
    let calls = telemetry.provider_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].outcome, CallOutcome::ValidationRejected);
}

#[tokio::test(flavor = "current_thread")]
async fn white_label_invariant_holds_for_all_sources() {
    let sanitizer = WhiteLabelSanitizer::with_defaults();

    // Provider-sourced legal text carrying third-party branding.
    let provider = StaticProvider::new("primary").respond_with(
        r#"{"title": "Cookie Policy", "body": "Cookies need consent. Generated with Cookiebot, see https://www.cookiebot.com/terms for details."}"#,
    );
    let engine = FixEngine::new(
        vec![Box::new(provider)],
        no_source_cache(),
        Arc::new(Telemetry::new()),
    )
    .with_config(fast_config());
    let request = FixRequest::new(Category::CookieConsent, ArtifactType::LegalText, site());
    let from_provider = engine.fix(&request).await.unwrap();
    assert!(matches!(from_provider.source, FixSource::Provider { .. }));
    assert!(!sanitizer.contains_forbidden(&from_provider.content));
    assert!(!from_provider.content.contains("cookiebot.com"));

    // Cache-sourced text carrying branding.
    let cache = no_source_cache();
    cache
        .put(
            CacheKey::new(DocumentType::CookiePolicy, "en", &site()),
            "Cookies require consent. Text licensed from eRecht24.",
        )
        .await;
    let engine = FixEngine::new(Vec::new(), cache, Arc::new(Telemetry::new()));
    let from_cache = engine.fix(&request).await.unwrap();
    assert_eq!(from_cache.source, FixSource::AuthoritativeCache);
    assert!(!sanitizer.contains_forbidden(&from_cache.content));

    // Template-sourced widget config.
    let engine = FixEngine::new(Vec::new(), no_source_cache(), Arc::new(Telemetry::new()));
    let widget_request =
        FixRequest::new(Category::CookieConsent, ArtifactType::WidgetConfig, site());
    let from_template = engine.fix(&widget_request).await.unwrap();
    assert_eq!(from_template.source, FixSource::Template);
    assert!(!sanitizer.contains_forbidden(&from_template.content));
}

#[tokio::test(flavor = "current_thread")]
async fn provider_timeout_advances_the_chain() {
    struct SlowProvider;

    #[async_trait]
    impl ProviderClient for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(
            &self,
            _request: &sitecomply_core::provider::GenerationRequest,
        ) -> Result<sitecomply_core::provider::GenerationResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Timeout)
        }
    }

    let secondary = StaticProvider::new("secondary").respond_with(
        r#"{"title": "Legal Notice", "body": "Our address and contact email are listed on this page."}"#,
    );
    let telemetry = Arc::new(Telemetry::new());
    let engine = FixEngine::new(
        vec![Box::new(SlowProvider), Box::new(secondary)],
        no_source_cache(),
        Arc::clone(&telemetry),
    )
    .with_config(FixEngineConfig {
        provider_timeout: Duration::from_millis(20),
        retry: RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
    });

    let request = FixRequest::new(Category::LegalNotice, ArtifactType::LegalText, site());
    let result = engine.fix(&request).await.unwrap();

    assert_eq!(
        result.source,
        FixSource::Provider {
            name: "secondary".into()
        }
    );
    let calls = telemetry.provider_calls_for(&result.request_id);
    assert_eq!(calls[0].outcome, CallOutcome::Timeout);
}
