use std::time::Duration;

use anyhow::{bail, Context, Result as AnyResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, GenerationResponse, ProviderClient, ProviderError, ProviderSettings};

/// Chat-completions adapter for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings) -> AnyResult<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("OpenAI API key must be provided via SITECOMPLY_API_KEY");
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("sitecomply/0.9")
            .timeout(Duration::from_secs(settings.timeout_secs.unwrap_or(30)))
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let tokens = chat.usage.as_ref().map(|usage| usage.total_tokens);
        let content = chat
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or(ProviderError::MissingContent)?;

        Ok(GenerationResponse {
            content,
            tokens,
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(url: String) -> ProviderSettings {
        ProviderSettings {
            provider: "openai".into(),
            api_key: "test-key".into(),
            endpoint: Some(url),
            model: Some("test-model".into()),
            timeout_secs: Some(5),
            max_retries: 0,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".into(),
            prompt: "prompt".into(),
            max_tokens: 128,
            temperature: 0.1,
        }
    }

    #[test]
    fn rejects_blank_api_key() {
        let mut s = settings("https://api.test".into());
        s.api_key = " ".into();
        assert!(OpenAiProvider::new(&s).is_err());
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn parses_successful_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"{\"title\":\"x\"}"}}],"usage":{"total_tokens":42}}"#);
        });

        let provider = OpenAiProvider::new(&settings(server.base_url())).unwrap();
        let response = provider.generate(&request()).await.unwrap();
        assert_eq!(response.content, "{\"title\":\"x\"}");
        assert_eq!(response.tokens, Some(42));
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn surfaces_http_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("rate limited");
        });

        let provider = OpenAiProvider::new(&settings(server.base_url())).unwrap();
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 429, .. }));
    }
}
