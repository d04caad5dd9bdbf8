//! Shared plumbing for pipeline stage calls.

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{ChatRequest, LLMError, LLMProvider, Message};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LLMError),

    #[error("stage call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// One completed stage call: the model text and its cost in tokens.
#[derive(Debug)]
pub struct StageCall {
    pub text: String,
    pub cost_units: u32,
}

/// Provider handle plus the knobs every stage call shares.
///
/// All four stages funnel through [`StageRuntime::complete`] so that the
/// timeout and cost accounting are applied uniformly.
pub struct StageRuntime {
    provider: Arc<dyn LLMProvider>,
    model: String,
    call_timeout: Duration,
    max_tokens: u32,
}

impl StageRuntime {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        call_timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            call_timeout,
            max_tokens,
        }
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<StageCall, StageError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: Some(temperature),
            max_tokens: Some(self.max_tokens),
        };

        let response = tokio::time::timeout(self.call_timeout, self.provider.chat(request))
            .await
            .map_err(|_| StageError::Timeout {
                secs: self.call_timeout.as_secs(),
            })??;

        Ok(StageCall {
            text: response.content.trim().to_string(),
            cost_units: response.usage.unwrap_or_default().total(),
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::{ChatResponse, Usage};

    struct SlowProvider;

    #[async_trait]
    impl LLMProvider for SlowProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LLMError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ChatResponse {
                content: "late".into(),
                usage: None,
            })
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
            Ok(ChatResponse {
                content: format!("  {}  ", request.messages[1].content),
                usage: Some(Usage {
                    input_tokens: 3,
                    output_tokens: 4,
                }),
            })
        }
    }

    #[tokio::test]
    async fn complete_trims_and_reports_cost() {
        let runtime = StageRuntime::new(
            Arc::new(EchoProvider),
            "test-model",
            Duration::from_secs(1),
            256,
        );
        let call = runtime.complete("sys", "hello", 0.5).await.unwrap();
        assert_eq!(call.text, "hello");
        assert_eq!(call.cost_units, 7);
    }

    #[tokio::test]
    async fn complete_enforces_timeout() {
        let runtime = StageRuntime::new(
            Arc::new(SlowProvider),
            "test-model",
            Duration::from_millis(20),
            256,
        );
        let err = runtime.complete("sys", "hello", 0.5).await.unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
    }
}
