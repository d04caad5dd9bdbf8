//! End-of-session report building.
//!
//! Invoked once on the `Ending → Ended` transition. A failed report is
//! logged by the lifecycle manager and never blocks session close.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;

use crate::llm::{ChatRequest, LLMError, LLMProvider, Message};

/// Errors from building a session report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report llm call failed: {0}")]
    Llm(#[from] LLMError),

    #[error("report llm call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Builds an end-of-session summary for the training operator.
#[async_trait]
pub trait ReportBuilder: Send + Sync {
    async fn build_report(&self, session_id: &str, transcript: &str)
    -> Result<String, ReportError>;
}

const REPORT_PROMPT: &str = "You are reviewing a training conversation between a \
crisis-line trainee (Operator) and a simulated patient (Patient). Summarize what \
the trainee did well and what to improve, in short plain paragraphs. Do not \
invent events that are not in the transcript.";

/// LLM-backed report builder.
pub struct LlmReportBuilder {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_tokens: u32,
    call_timeout: Duration,
}

impl LlmReportBuilder {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        max_tokens: u32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
            call_timeout,
        }
    }
}

#[async_trait]
impl ReportBuilder for LlmReportBuilder {
    async fn build_report(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<String, ReportError> {
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::system(REPORT_PROMPT),
                Message::user(format!("Session {session_id} transcript:\n\n{transcript}")),
            ],
            Some(0.3),
            Some(self.max_tokens),
        );

        let response = timeout(self.call_timeout, self.provider.chat(request))
            .await
            .map_err(|_| ReportError::Timeout {
                secs: self.call_timeout.as_secs(),
            })??;

        Ok(response.content)
    }
}
