use std::time::Duration;

use anyhow::{bail, Context, Result as AnyResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, GenerationResponse, ProviderClient, ProviderError, ProviderSettings};

/// Messages-API adapter for Anthropic-compatible endpoints.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    http: Client,
    url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(settings: &ProviderSettings) -> AnyResult<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("Anthropic API key must be provided via SITECOMPLY_API_KEY");
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("sitecomply/0.9")
            .timeout(Duration::from_secs(settings.timeout_secs.unwrap_or(30)))
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| "claude-3-haiku-20240307".to_string()),
        })
    }
}

#[async_trait]
impl ProviderClient for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let payload = MessagesRequest {
            model: self.model.clone(),
            system: request.system.clone(),
            messages: vec![Message {
                role: "user",
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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

        let message: MessagesResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let tokens = message
            .usage
            .as_ref()
            .map(|usage| usage.input_tokens + usage.output_tokens);
        let content = message
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or(ProviderError::MissingContent)?;

        Ok(GenerationResponse { content, tokens })
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentPart>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    _type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn settings(url: String) -> ProviderSettings {
        ProviderSettings {
            provider: "anthropic".into(),
            api_key: "test-key".into(),
            endpoint: Some(url),
            model: Some("claude-test".into()),
            timeout_secs: Some(5),
            max_retries: 0,
        }
    }

    #[test]
    fn rejects_blank_api_key() {
        let mut s = settings("https://api.test".into());
        s.api_key = String::new();
        assert!(AnthropicProvider::new(&s).is_err());
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn parses_successful_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "test-key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"content":[{"type":"text","text":"{\"title\":\"x\"}"}],"usage":{"input_tokens":10,"output_tokens":20}}"#);
        });

        let provider = AnthropicProvider::new(&settings(server.base_url())).unwrap();
        let request = GenerationRequest {
            system: "system".into(),
            prompt: "prompt".into(),
            max_tokens: 128,
            temperature: 0.1,
        };
        let response = provider.generate(&request).await.unwrap();
        assert_eq!(response.content, "{\"title\":\"x\"}");
        assert_eq!(response.tokens, Some(30));
        mock.assert();
    }
}
