//! Agent contract and the wrapper every stage runs behind.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use ml_core::config::Config;
use ml_core::conversation_cache::CacheError;
use ml_core::types::{AgentId, ConversationState, PartialState};
use ml_harness::circuit_breaker::{guarded_call, CircuitBreakerError, CircuitGate};
use ml_harness::trace::{AgentStatus, Span, SpanStatus, TraceEventKind};
use ml_intelligence::cost_tracker::estimate_cost;
use ml_intelligence::llm::{LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse};
use ml_intelligence::models::resolve_model;
use ml_intelligence::structured::parse_structured;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, warn};

use crate::context::PipelineContext;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an agent's `run` did not produce a result. Never escapes
/// [`GuardedAgent`]; it becomes an `agent_errors` entry instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("conversation cache: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("agent panicked: {0}")]
    Panicked(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One reasoning stage.
///
/// Implementations only describe the happy path; timeouts, circuit breaking
/// and fallbacks are applied by [`GuardedAgent`].
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    /// Model id reported on the agent span.
    fn model(&self) -> &str;

    fn timeout(&self) -> Duration;

    /// Static default served when the stage cannot complete. Must be pure.
    fn fallback(&self, state: &ConversationState) -> PartialState;

    async fn run(
        &self,
        state: &ConversationState,
        ctx: &PipelineContext,
        span: &mut dyn Span,
    ) -> Result<PartialState, AgentError>;
}

/// What the orchestrator schedules. `execute` never fails.
#[async_trait]
pub trait PipelineModule: Send + Sync {
    fn agent_id(&self) -> Option<AgentId> {
        None
    }

    async fn execute(&self, state: &ConversationState, ctx: &PipelineContext) -> PartialState;
}

// ---------------------------------------------------------------------------
// GuardedAgent
// ---------------------------------------------------------------------------

/// Runs an [`Agent`] behind its circuit gate with a deadline.
///
/// Every outcome carries `latency_ms[agent_id]`:
/// - gate refused: fallback, status `fallback`, `run` never invoked
/// - `run` failed, panicked or timed out: fallback plus the error message,
///   status `failed`
/// - otherwise `run`'s partial, status `complete`
pub struct GuardedAgent<A> {
    agent: A,
    gate: Arc<dyn CircuitGate>,
}

impl<A: Agent> GuardedAgent<A> {
    pub fn new(agent: A, gate: Arc<dyn CircuitGate>) -> Self {
        Self { agent, gate }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }
}

#[async_trait]
impl<A: Agent> PipelineModule for GuardedAgent<A> {
    fn agent_id(&self) -> Option<AgentId> {
        Some(self.agent.id())
    }

    async fn execute(&self, state: &ConversationState, ctx: &PipelineContext) -> PartialState {
        let id = self.agent.id();
        let started = Instant::now();
        let mut span = ctx.start_span(
            &format!("agent.{id}"),
            json!({ "agent.id": id.as_str(), "agent.model": self.agent.model() }),
        );
        ctx.emit(TraceEventKind::AgentStart { agent_id: id });

        let run_span: &mut dyn Span = span.as_mut();
        let outcome = guarded_call(self.gate.as_ref(), self.agent.timeout(), move || {
            AssertUnwindSafe(self.agent.run(state, ctx, run_span))
                .catch_unwind()
                .map(|caught| {
                    caught.unwrap_or_else(|panic| {
                        Err(AgentError::Panicked(panic_message(panic.as_ref())))
                    })
                })
        })
        .await;

        let (partial, status) = match outcome {
            Ok(partial) => {
                span.set_status(SpanStatus::Ok);
                (partial, AgentStatus::Complete)
            }
            Err(CircuitBreakerError::Open) => {
                info!(agent = %id, trace_id = %ctx.trace_id, "circuit open, serving fallback");
                span.add_event("circuit_open", json!({}));
                span.set_status(SpanStatus::Ok);
                (self.agent.fallback(state), AgentStatus::Fallback)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(agent = %id, trace_id = %ctx.trace_id, error = %message, "agent failed, serving fallback");
                span.set_status(SpanStatus::Error(message.clone()));
                ctx.emit(TraceEventKind::Error {
                    agent_id: Some(id),
                    message: message.clone(),
                });
                (
                    self.agent.fallback(state).with_error(message),
                    AgentStatus::Failed,
                )
            }
        };
        span.end();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        ctx.emit(TraceEventKind::AgentEnd {
            agent_id: id,
            status,
            duration_ms: elapsed_ms,
        });
        partial.with_latency(id, elapsed_ms)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Wrap `agent` behind `gate` as a schedulable module.
pub fn guard<A: Agent + 'static>(agent: A, gate: Arc<dyn CircuitGate>) -> Arc<dyn PipelineModule> {
    Arc::new(GuardedAgent::new(agent, gate))
}

// ---------------------------------------------------------------------------
// Model binding
// ---------------------------------------------------------------------------

/// The model an agent calls and its budget.
#[derive(Clone)]
pub struct AgentModel {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AgentModel {
    pub fn from_config(agent: AgentId, provider: Arc<dyn LlmProvider>, config: &Config) -> Self {
        let settings = config.pipeline.agent(agent);
        Self {
            provider,
            model: resolve_model(agent, settings.model.as_deref(), &config.models),
            max_tokens: settings.max_tokens,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    /// Binding with the built-in budget for `agent`.
    pub fn with_defaults(agent: AgentId, provider: Arc<dyn LlmProvider>) -> Self {
        Self::from_config(agent, provider, &Config::default())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn llm_config(&self, system_prompt: &str) -> LlmConfig {
        LlmConfig::new(self.model.clone(), self.max_tokens).with_system_prompt(system_prompt)
    }
}

/// One whole completion, reported as an `llm_call` trace event.
pub async fn traced_completion(
    ctx: &PipelineContext,
    agent: AgentId,
    provider: &dyn LlmProvider,
    messages: &[LlmMessage],
    config: &LlmConfig,
) -> Result<LlmResponse, LlmError> {
    let started = Instant::now();
    let result = provider.complete(messages, config).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let kind = match &result {
        Ok(response) => TraceEventKind::LlmCall {
            agent_id: agent,
            model: response.model.clone(),
            duration_ms,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_usd: estimate_cost(&response.model, response.input_tokens, response.output_tokens),
            success: true,
        },
        Err(_) => failed_call(agent, &config.model, duration_ms),
    };
    ctx.emit(kind);
    result
}

/// Structured completion decoded into `T`.
pub async fn structured_call<T: DeserializeOwned>(
    ctx: &PipelineContext,
    agent: AgentId,
    model: &AgentModel,
    system_prompt: &str,
    user_content: String,
) -> Result<T, AgentError> {
    let messages = [LlmMessage::user(user_content)];
    let config = model.llm_config(system_prompt);
    let response =
        traced_completion(ctx, agent, model.provider.as_ref(), &messages, &config).await?;
    Ok(parse_structured(&response.content)?)
}

pub(crate) fn failed_call(agent: AgentId, model: &str, duration_ms: u64) -> TraceEventKind {
    TraceEventKind::LlmCall {
        agent_id: agent,
        model: model.to_string(),
        duration_ms,
        input_tokens: 0,
        output_tokens: 0,
        cost_usd: 0.0,
        success: false,
    }
}
