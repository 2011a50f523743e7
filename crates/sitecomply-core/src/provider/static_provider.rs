use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;

use super::{GenerationRequest, GenerationResponse, ProviderClient, ProviderError};

/// Deterministic scripted provider. Serves queued responses in order and
/// declines once the queue is drained. Used by tests and offline runs.
pub struct StaticProvider {
    name: String,
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn respond_with(self, content: impl Into<String>) -> Self {
        self.push(Ok(content.into()))
    }

    pub fn fail_with(self, error: ProviderError) -> Self {
        self.push(Err(error))
    }

    fn push(self, response: Result<String, ProviderError>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(response);
        self
    }
}

#[async_trait]
impl ProviderClient for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(Ok(content)) => Ok(GenerationResponse {
                tokens: Some(content.len() as u32 / 4),
                content,
            }),
            Some(Err(error)) => Err(error),
            None => Err(ProviderError::MissingContent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "s".into(),
            prompt: "p".into(),
            max_tokens: 16,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn serves_responses_in_order_then_declines() {
        let provider = StaticProvider::new("scripted")
            .respond_with("first")
            .fail_with(ProviderError::Timeout)
            .respond_with("third");

        assert_eq!(provider.generate(&request()).await.unwrap().content, "first");
        assert!(matches!(
            provider.generate(&request()).await.unwrap_err(),
            ProviderError::Timeout
        ));
        assert_eq!(provider.generate(&request()).await.unwrap().content, "third");
        assert!(matches!(
            provider.generate(&request()).await.unwrap_err(),
            ProviderError::MissingContent
        ));
    }
}
