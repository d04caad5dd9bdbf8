//! Common test utilities.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use patsim::llm::{ChatRequest, ChatResponse, LLMError, LLMProvider, Usage};
use patsim::pipeline::{StageRuntime, TurnPipeline};
use patsim::quota::MemoryQuota;
use patsim::report::{ReportBuilder, ReportError};
use patsim::session::{EngineConfig, SessionEngine};
use patsim::store::MemorySessionStorage;
use patsim::transport::OutboxTransport;

/// Provider that replays queued responses in order, optionally slowed
/// down, and records every request it receives. An empty queue errors,
/// which exercises the stage fallbacks.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Mutex<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Queue the four stage responses of one full turn.
    pub fn script_turn(&self, strategy: &str, instruction: &str, raw: &str, styled: &str) {
        let mut q = self.responses.lock().unwrap();
        q.push_back(strategy.to_string());
        q.push_back(instruction.to_string());
        q.push_back(raw.to_string());
        q.push_back(styled.to_string());
    }

    pub fn script(&self, response: &str) {
        self.responses.lock().unwrap().push_back(response.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// User-message content of every request, in call order.
    pub fn seen_user_texts(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(request);

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(content) => Ok(ChatResponse {
                content,
                usage: Some(Usage {
                    input_tokens: 5,
                    output_tokens: 5,
                }),
            }),
            None => Err(LLMError::EmptyResponse),
        }
    }
}

/// Report builder that counts invocations instead of calling a model.
pub struct CountingReportBuilder {
    pub calls: AtomicU32,
}

impl CountingReportBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportBuilder for CountingReportBuilder {
    async fn build_report(
        &self,
        _session_id: &str,
        transcript: &str,
    ) -> Result<String, ReportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("report over {} chars", transcript.len()))
    }
}

pub struct TestHarness {
    pub engine: Arc<SessionEngine>,
    pub provider: Arc<ScriptedProvider>,
    pub outbox: Arc<OutboxTransport>,
    pub storage: Arc<MemorySessionStorage>,
    pub quota: Arc<MemoryQuota>,
    pub reports: Arc<CountingReportBuilder>,
}

/// Timings tight enough that a test settles in a few hundred ms.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        debounce: Duration::from_millis(30),
        // Long enough that it never fires inside a test window unless a
        // test shortens it on purpose.
        inactivity: Duration::from_secs(5),
        session_length: Duration::from_secs(60),
        buffer_cap: 5,
        lock_wait: Duration::from_secs(1),
        max_drain_iterations: 8,
        typing_ms_per_char: 0,
        typing_max_ms: 0,
    }
}

pub fn harness() -> TestHarness {
    harness_with(fast_config(), 3)
}

pub fn harness_with(config: EngineConfig, free_units: u32) -> TestHarness {
    let provider = ScriptedProvider::new();
    let outbox = Arc::new(OutboxTransport::new());
    let storage = Arc::new(MemorySessionStorage::new());
    let quota = Arc::new(MemoryQuota::new(free_units));
    let reports = CountingReportBuilder::new();

    let runtime = StageRuntime::new(provider.clone(), "test-model", Duration::from_secs(2), 256);
    let pipeline = TurnPipeline::new(runtime, "You are a simulated patient.");

    let engine = SessionEngine::new(
        outbox.clone(),
        storage.clone(),
        quota.clone(),
        reports.clone(),
        pipeline,
        config,
    );

    TestHarness {
        engine,
        provider,
        outbox,
        storage,
        quota,
        reports,
    }
}
