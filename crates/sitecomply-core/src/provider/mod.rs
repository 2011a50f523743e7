use std::{collections::HashMap, str::FromStr, time::Duration};

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod anthropic;
pub mod openai;
pub mod static_provider;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use static_provider::StaticProvider;

/// Structured generation request assembled by the prompt builder. Carries
/// only what the target handler strictly requires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Raw provider output before validation.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    pub tokens: Option<u32>,
}

/// Errors from one provider attempt. Every variant advances the fallback
/// chain; none is fatal until the chain is exhausted.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("provider attempt timed out")]
    Timeout,
    #[error("provider API error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("provider unreachable: {0}")]
    Network(String),
    #[error("provider response carried no content")]
    MissingContent,
    #[error("provider response malformed: {0}")]
    Malformed(String),
}

/// Uniform adapter interface so the fallback chain is provider-agnostic.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationResponse, ProviderError>;

    /// Cheap reachability/configuration probe used by the health command.
    async fn health(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Provider kinds the chain can be assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Noop,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "noop" => Ok(ProviderKind::Noop),
            other => Err(format!("unknown provider kind `{other}`")),
        }
    }
}

/// Environment-driven configuration for provider adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub provider: String,
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
}

impl ProviderSettings {
    const PROVIDER_ENV: &'static str = "SITECOMPLY_PROVIDER";
    const API_KEY_ENV: &'static str = "SITECOMPLY_API_KEY";
    const ENDPOINT_ENV: &'static str = "SITECOMPLY_ENDPOINT";
    const MODEL_ENV: &'static str = "SITECOMPLY_MODEL";
    const TIMEOUT_ENV: &'static str = "SITECOMPLY_TIMEOUT_SECS";
    const RETRIES_ENV: &'static str = "SITECOMPLY_MAX_RETRIES";

    /// Load settings from environment variables.
    ///
    /// * `SITECOMPLY_PROVIDER` — provider identifier (default: `openai`).
    /// * `SITECOMPLY_API_KEY`  — API key/token (required except for `noop`).
    /// * `SITECOMPLY_ENDPOINT` — optional custom endpoint/base URL.
    pub fn from_env() -> AnyResult<Self> {
        Self::from_map(std::env::vars().collect())
    }

    pub fn from_map(vars: HashMap<String, String>) -> AnyResult<Self> {
        let provider = vars
            .get(Self::PROVIDER_ENV)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "openai".to_string())
            .trim()
            .to_string();
        let api_key = match provider.to_lowercase().as_str() {
            "noop" => vars.get(Self::API_KEY_ENV).cloned().unwrap_or_default(),
            _ => vars
                .get(Self::API_KEY_ENV)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| {
                    format!(
                        "environment variable {} must be set for provider `{provider}`",
                        Self::API_KEY_ENV
                    )
                })?,
        };
        let endpoint = vars
            .get(Self::ENDPOINT_ENV)
            .cloned()
            .filter(|v| !v.trim().is_empty());
        let model = vars
            .get(Self::MODEL_ENV)
            .cloned()
            .filter(|v| !v.trim().is_empty());
        let timeout_secs = vars
            .get(Self::TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let max_retries = vars
            .get(Self::RETRIES_ENV)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(2);

        Ok(Self {
            provider,
            api_key,
            endpoint,
            model,
            timeout_secs,
            max_retries,
        })
    }
}

/// Bounded retry with exponential backoff, iterated by the fix engine's
/// provider loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based; attempt 0 ran
    /// without waiting).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        (self.initial_backoff * factor).min(self.max_backoff)
    }
}

/// Provider that never generates; scans and fixes degrade to templates.
#[derive(Debug, Default, Clone)]
pub struct NoopProvider;

#[async_trait]
impl ProviderClient for NoopProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        Err(ProviderError::Network(
            "noop provider declines generation".into(),
        ))
    }
}

/// Build a provider adapter for the requested kind.
pub fn build_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> AnyResult<Box<dyn ProviderClient>> {
    match kind {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(settings)?)),
        ProviderKind::Anthropic => Ok(Box::new(AnthropicProvider::new(settings)?)),
        ProviderKind::Noop => Ok(Box::new(NoopProvider)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_openai_provider() {
        let settings =
            ProviderSettings::from_map(vars(&[("SITECOMPLY_API_KEY", "secret")])).unwrap();
        assert_eq!(settings.provider, "openai");
        assert_eq!(settings.api_key, "secret");
        assert!(settings.endpoint.is_none());
        assert_eq!(settings.max_retries, 2);
    }

    #[test]
    fn errors_when_api_key_missing() {
        let err = ProviderSettings::from_map(vars(&[("SITECOMPLY_PROVIDER", "openai")]))
            .unwrap_err();
        assert!(err.to_string().contains("SITECOMPLY_API_KEY"));
    }

    #[test]
    fn noop_provider_allows_missing_key() {
        let settings =
            ProviderSettings::from_map(vars(&[("SITECOMPLY_PROVIDER", "noop")])).unwrap();
        assert_eq!(settings.provider, "noop");
        assert!(settings.api_key.is_empty());
    }

    #[test]
    fn parses_timeout_and_retries() {
        let settings = ProviderSettings::from_map(vars(&[
            ("SITECOMPLY_PROVIDER", "anthropic"),
            ("SITECOMPLY_API_KEY", "secret"),
            ("SITECOMPLY_TIMEOUT_SECS", "45"),
            ("SITECOMPLY_MAX_RETRIES", "5"),
        ]))
        .unwrap();
        assert_eq!(settings.timeout_secs, Some(45));
        assert_eq!(settings.max_retries, 5);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(12), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn noop_declines_generation() {
        let provider = NoopProvider;
        let request = GenerationRequest {
            system: "s".into(),
            prompt: "p".into(),
            max_tokens: 16,
            temperature: 0.1,
        };
        assert!(provider.generate(&request).await.is_err());
        assert!(provider.health().await.is_ok());
    }
}
