use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Result as AnyResult;
use tracing::{debug, instrument, warn};

use super::handlers::Handler;
use super::prompt::PromptBuilder;
use super::validate::{ValidationConfig, ValidationReport, Validator};
use super::{FixError, FixRequest, FixResult, FixSource, FixStatus};
use crate::cache::AuthoritativeCache;
use crate::provider::{ProviderClient, ProviderError, RetryPolicy};
use crate::sanitize::WhiteLabelSanitizer;
use crate::telemetry::{estimate_cost, CallOutcome, FixOutcomeRecord, ProviderCallRecord, Telemetry};

/// Stages of the per-request state machine, surfaced through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixStage {
    Routed,
    CacheCheck,
    Prompted,
    ProviderAttempt,
    Validated,
    Sanitized,
    Done,
}

/// Engine-level tunables independent of any single provider.
#[derive(Debug, Clone)]
pub struct FixEngineConfig {
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FixEngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// The unified fix engine: routes a request to its handler, consults the
/// authoritative cache, walks the provider fallback chain and finishes
/// with a deterministic template so a result is always producible.
pub struct FixEngine {
    providers: Vec<Box<dyn ProviderClient>>,
    cache: Arc<AuthoritativeCache>,
    telemetry: Arc<Telemetry>,
    validator: Validator,
    validation: ValidationConfig,
    sanitizer: WhiteLabelSanitizer,
    config: FixEngineConfig,
    counter: AtomicU64,
}

impl FixEngine {
    pub fn new(
        providers: Vec<Box<dyn ProviderClient>>,
        cache: Arc<AuthoritativeCache>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            providers,
            cache,
            telemetry,
            validator: Validator::with_defaults(),
            validation: ValidationConfig::default(),
            sanitizer: WhiteLabelSanitizer::with_defaults(),
            config: FixEngineConfig::default(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: FixEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> AnyResult<Self> {
        self.validator = Validator::new(validation.clone())?;
        self.validation = validation;
        Ok(self)
    }

    pub fn with_sanitizer(mut self, sanitizer: WhiteLabelSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Run one fix request through the state machine:
    /// RECEIVED → ROUTED → (CACHE_CHECK) → PROMPTED → PROVIDER_ATTEMPT(n)
    /// → VALIDATED → (SANITIZED) → DONE, with FAILED only after providers
    /// and the template fallback are exhausted or rejected.
    #[instrument(name = "fix_request", skip(self, request), fields(category = %request.category, artifact = %request.artifact))]
    pub async fn fix(&self, request: &FixRequest) -> Result<FixResult, FixError> {
        let request_id = format!("fix-{:06}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let evidence = request
            .finding
            .as_ref()
            .and_then(|finding| finding.evidence.as_deref());

        let handler = Handler::route(request)?;
        debug!(%request_id, stage = ?FixStage::Routed, handler = ?handler, "fix request routed");

        if let Some(document) = handler.wants_cache() {
            debug!(%request_id, stage = ?FixStage::CacheCheck, %document, "consulting authoritative cache");
            match self
                .cache
                .get_or_refresh(document, &request.locale, &request.site)
                .await
            {
                Ok(content) => {
                    let report = self.validator.validate_content(&handler, &content, evidence);
                    if report.passed() {
                        debug!(%request_id, stage = ?FixStage::Validated, source = "authoritative-cache", "cache content accepted");
                        return Ok(self.finish(
                            request_id,
                            &handler,
                            request,
                            content,
                            FixSource::AuthoritativeCache,
                            FixStatus::Ok,
                            0.9,
                            report,
                        ));
                    }
                    warn!(%request_id, %report, "authoritative text rejected by validation, falling back to generation");
                }
                Err(err) => {
                    debug!(%request_id, error = %err, "authoritative cache unavailable, falling back to generation");
                }
            }
        }

        let keywords: &[String] = match &handler {
            Handler::LegalText { document } => self
                .validation
                .mandatory_keywords
                .for_document(*document),
            _ => &[],
        };
        let prompt = PromptBuilder::new(keywords).build(&handler, request);
        debug!(%request_id, stage = ?FixStage::Prompted, "generation prompt built");

        let mut last_report: Option<ValidationReport> = None;
        for (index, provider) in self.providers.iter().enumerate() {
            let mut attempt = 0u32;
            loop {
                debug!(%request_id, stage = ?FixStage::ProviderAttempt, provider = provider.name(), attempt, "attempting provider");
                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    self.config.provider_timeout,
                    provider.generate(&prompt),
                )
                .await;
                let latency = started.elapsed();

                match outcome {
                    Ok(Ok(response)) => {
                        let (report, content) =
                            self.validator
                                .validate_response(&handler, &response.content, evidence);
                        match content.filter(|_| report.passed()) {
                            Some(content) => {
                                self.record_call(
                                    &request_id,
                                    provider.name(),
                                    latency,
                                    CallOutcome::Ok,
                                    response.tokens,
                                );
                                debug!(%request_id, stage = ?FixStage::Validated, provider = provider.name(), "provider response accepted");
                                let confidence = (0.8 - 0.1 * index as f32).max(0.5);
                                return Ok(self.finish(
                                    request_id,
                                    &handler,
                                    request,
                                    content,
                                    FixSource::Provider {
                                        name: provider.name().to_string(),
                                    },
                                    FixStatus::Ok,
                                    confidence,
                                    report,
                                ));
                            }
                            None => {
                                self.record_call(
                                    &request_id,
                                    provider.name(),
                                    latency,
                                    CallOutcome::ValidationRejected,
                                    response.tokens,
                                );
                                warn!(%request_id, provider = provider.name(), %report, "provider response rejected by validation");
                                last_report = Some(report);
                                break;
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        let call_outcome = if matches!(err, ProviderError::Timeout) {
                            CallOutcome::Timeout
                        } else {
                            CallOutcome::Error
                        };
                        self.record_call(&request_id, provider.name(), latency, call_outcome, None);
                        warn!(%request_id, provider = provider.name(), error = %err, attempt, "provider attempt failed");
                        attempt += 1;
                        if attempt >= self.config.retry.max_attempts {
                            break;
                        }
                        tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                    }
                    Err(_elapsed) => {
                        self.record_call(
                            &request_id,
                            provider.name(),
                            latency,
                            CallOutcome::Timeout,
                            None,
                        );
                        warn!(%request_id, provider = provider.name(), attempt, "provider attempt timed out");
                        attempt += 1;
                        if attempt >= self.config.retry.max_attempts {
                            break;
                        }
                        tokio::time::sleep(self.config.retry.backoff(attempt)).await;
                    }
                }
            }
        }

        let content = handler.template(request);
        let report = self.validator.validate_content(&handler, &content, evidence);
        if report.passed() {
            debug!(%request_id, stage = ?FixStage::Validated, source = "template", "deterministic template accepted");
            return Ok(self.finish(
                request_id,
                &handler,
                request,
                content,
                FixSource::Template,
                FixStatus::Degraded,
                0.3,
                report,
            ));
        }

        // The template's failing report is the most recent; fall back to
        // the last provider rejection only if the template never ran one.
        let final_report = if report.checks.is_empty() {
            last_report.unwrap_or(report)
        } else {
            report
        };
        self.telemetry.record_fix_outcome(FixOutcomeRecord {
            request_id: request_id.clone(),
            category: request.category,
            source: None,
            status: FixStatus::Failed,
            at: chrono::Utc::now(),
        });
        Err(FixError::AllFallbacksExhausted {
            last_failure: final_report.to_string(),
            report: final_report,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        request_id: String,
        handler: &Handler,
        request: &FixRequest,
        content: String,
        source: FixSource,
        status: FixStatus,
        confidence: f32,
        validation: ValidationReport,
    ) -> FixResult {
        let content = if handler.requires_sanitizer() {
            let sanitized = self.sanitizer.apply(&content);
            debug!(%request_id, stage = ?FixStage::Sanitized, "white-label sanitizer applied");
            sanitized
        } else {
            content
        };

        self.telemetry.record_fix_outcome(FixOutcomeRecord {
            request_id: request_id.clone(),
            category: request.category,
            source: Some(source.clone()),
            status,
            at: chrono::Utc::now(),
        });
        debug!(%request_id, stage = ?FixStage::Done, %source, ?status, "fix request complete");

        FixResult {
            request_id,
            status,
            artifact: handler.artifact(),
            content,
            source,
            validation,
            confidence,
        }
    }

    fn record_call(
        &self,
        request_id: &str,
        provider: &str,
        latency: Duration,
        outcome: CallOutcome,
        tokens: Option<u32>,
    ) {
        self.telemetry.record_provider_call(ProviderCallRecord {
            request_id: request_id.to_string(),
            provider: provider.to_string(),
            latency_ms: latency.as_millis() as u64,
            cost_estimate: estimate_cost(tokens),
            outcome,
            at: chrono::Utc::now(),
        });
    }
}
