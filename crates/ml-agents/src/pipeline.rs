//! Orchestration: parallel group, merge, sequential group.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::FutureExt;
use ml_core::config::Config;
use ml_core::conversation_cache::ConversationCache;
use ml_core::types::{AgentId, ConversationState, PartialState, PipelinePhase, TOTAL_LATENCY_KEY};
use ml_harness::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use ml_harness::trace::TraceEventKind;
use ml_intelligence::llm::LlmProvider;
use tracing::{error, info, warn};

use crate::agent::{guard, panic_message, AgentModel, PipelineModule};
use crate::agents::{EmotionReasoner, MemoryAgent, MoodSensor, ResponseGenerator, SafetyMonitor};
use crate::context::PipelineContext;
use crate::state_machine::{PipelineEvent, PipelineStateMachine};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A sequential module panicked outside any agent wrapper. The run produced
/// no usable state.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },
}

// ---------------------------------------------------------------------------
// Scheduling primitives
// ---------------------------------------------------------------------------

/// The fixed pipeline shape.
#[derive(Clone, Default)]
pub struct PipelineModules {
    pub parallel: Vec<Arc<dyn PipelineModule>>,
    pub sequential: Vec<Arc<dyn PipelineModule>>,
}

/// Run `modules` concurrently against the same `state`.
///
/// Settles every module. Guarded agents turn their own panics into
/// fallbacks; any other module that panics contributes an empty partial and
/// is logged. Results keep `modules` order.
pub async fn run_parallel_modules(
    modules: &[Arc<dyn PipelineModule>],
    state: &ConversationState,
    ctx: &PipelineContext,
) -> Vec<PartialState> {
    let runs = modules
        .iter()
        .map(|module| AssertUnwindSafe(module.execute(state, ctx)).catch_unwind());

    join_all(runs)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Ok(partial) => partial,
            Err(panic) => {
                error!(
                    trace_id = %ctx.trace_id,
                    module = %module_label(modules[index].as_ref(), index),
                    panic = %panic_message(panic.as_ref()),
                    "parallel stage failed, contributing nothing"
                );
                PartialState::default()
            }
        })
        .collect()
}

/// Fold `results` onto `base` in order. Later scalars win; latency maps are
/// unioned and error lists concatenated.
pub fn merge_results(
    base: ConversationState,
    results: impl IntoIterator<Item = PartialState>,
) -> ConversationState {
    results.into_iter().fold(base, ConversationState::overlay)
}

struct SequentialOutcome {
    state: ConversationState,
    aborted: bool,
}

async fn run_sequential(
    modules: &[Arc<dyn PipelineModule>],
    state: ConversationState,
    ctx: &PipelineContext,
) -> Result<SequentialOutcome, PipelineError> {
    let mut current = state;
    for (index, module) in modules.iter().enumerate() {
        if ctx.is_aborted() {
            info!(
                trace_id = %ctx.trace_id,
                skipped = modules.len() - index,
                "stream aborted, stopping sequential stages"
            );
            return Ok(SequentialOutcome {
                state: current,
                aborted: true,
            });
        }
        let partial = AssertUnwindSafe(module.execute(&current, ctx))
            .catch_unwind()
            .await
            .map_err(|panic| PipelineError::StageFailed {
                stage: module_label(module.as_ref(), index),
                message: panic_message(panic.as_ref()),
            })?;
        current = current.overlay(partial);
    }
    Ok(SequentialOutcome {
        state: current,
        aborted: false,
    })
}

/// Run `modules` in order, each seeing the state left by the previous one.
/// Stops before the next stage once the caller's stream is aborted.
pub async fn run_sequential_modules(
    modules: &[Arc<dyn PipelineModule>],
    state: ConversationState,
    ctx: &PipelineContext,
) -> Result<ConversationState, PipelineError> {
    run_sequential(modules, state, ctx).await.map(|o| o.state)
}

/// Run one full turn.
///
/// The returned state is stamped `complete` and carries a `total` latency
/// entry, also when the caller aborted mid-run. `Err` means a sequential
/// stage panicked; the caller owns the user-facing error.
pub async fn run_pipeline(
    state: ConversationState,
    ctx: &PipelineContext,
    modules: &PipelineModules,
) -> Result<ConversationState, PipelineError> {
    let started = Instant::now();
    let mut phases = PipelineStateMachine::new();

    ctx.emit(TraceEventKind::PipelineStart {
        session_id: ctx.session_id.clone(),
        user_id: ctx.user_id.clone(),
        turn_number: ctx.turn_number,
    });
    info!(
        trace_id = %ctx.trace_id,
        session_id = %ctx.session_id,
        turn = ctx.turn_number,
        "pipeline started"
    );

    advance(&mut phases, PipelineEvent::Start);
    if let Some(stream) = &ctx.stream {
        send_phase(stream.as_ref(), PipelinePhase::Sensing).await;
    }

    let results = run_parallel_modules(&modules.parallel, &state, ctx).await;
    let merged = merge_results(state, results);
    let crisis_detected = merged.is_crisis();

    if let Some(stream) = ctx.live_stream() {
        send_phase(stream.as_ref(), PipelinePhase::Reasoning).await;
    }
    advance(&mut phases, PipelineEvent::Reason);

    let outcome = run_sequential(&modules.sequential, merged, ctx).await;
    let total_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(SequentialOutcome { mut state, aborted }) => {
            advance(
                &mut phases,
                if aborted {
                    PipelineEvent::Abort
                } else {
                    PipelineEvent::Finish
                },
            );
            ctx.emit(TraceEventKind::PipelineEnd {
                duration_ms: total_ms,
                success: state.agent_errors.is_empty(),
                crisis_detected: state.is_crisis(),
            });
            info!(
                trace_id = %ctx.trace_id,
                duration_ms = total_ms,
                errors = state.agent_errors.len(),
                aborted,
                "pipeline finished"
            );

            state.phase = phases.phase();
            state
                .latency_ms
                .insert(TOTAL_LATENCY_KEY.to_string(), total_ms);
            Ok(state)
        }
        Err(err) => {
            advance(&mut phases, PipelineEvent::Fail);
            error!(trace_id = %ctx.trace_id, error = %err, "pipeline failed");
            ctx.emit(TraceEventKind::Error {
                agent_id: None,
                message: err.to_string(),
            });
            ctx.emit(TraceEventKind::PipelineEnd {
                duration_ms: total_ms,
                success: false,
                crisis_detected,
            });
            if let Some(stream) = ctx.live_stream() {
                send_phase(stream.as_ref(), PipelinePhase::Error).await;
            }
            Err(err)
        }
    }
}

fn advance(phases: &mut PipelineStateMachine, event: PipelineEvent) {
    if let Err(e) = phases.transition(event) {
        warn!(error = %e, "unexpected pipeline phase transition");
    }
}

async fn send_phase(stream: &dyn ml_harness::stream::StreamChannel, phase: PipelinePhase) {
    if let Some(message) = phase.progress_message() {
        stream.send_progress(phase, message).await;
    }
}

fn module_label(module: &dyn PipelineModule, index: usize) -> String {
    module
        .agent_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("module_{index}"))
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Model provider per agent, with a shared default.
#[derive(Clone)]
pub struct AgentProviders {
    default: Arc<dyn LlmProvider>,
    overrides: HashMap<AgentId, Arc<dyn LlmProvider>>,
}

impl AgentProviders {
    pub fn new(default: Arc<dyn LlmProvider>) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, agent: AgentId, provider: Arc<dyn LlmProvider>) -> Self {
        self.overrides.insert(agent, provider);
        self
    }

    pub fn get(&self, agent: AgentId) -> Arc<dyn LlmProvider> {
        self.overrides
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

/// Long-lived pipeline assembly.
///
/// Agents are built fresh for every run; circuit-breaker state lives in the
/// shared registry so it carries across runs.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    registry: Arc<CircuitBreakerRegistry>,
    cache: ConversationCache,
    providers: AgentProviders,
}

impl Pipeline {
    pub fn new(config: Config, providers: AgentProviders, cache: ConversationCache) -> Self {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::from(&config.circuit_breaker));
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            cache,
            providers,
        }
    }

    pub fn with_registry(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    /// Fresh agents for one run.
    pub fn modules(&self) -> PipelineModules {
        let binding =
            |id: AgentId| AgentModel::from_config(id, self.providers.get(id), &self.config);
        let gate = |id: AgentId| self.registry.get_or_create(id.as_str());

        let memory = MemoryAgent::new(binding(AgentId::MemoryAgent), self.cache.clone())
            .with_max_turns(self.config.pipeline.memory_max_turns);
        let responder = ResponseGenerator::new(
            binding(AgentId::ResponseGenerator),
            self.config.models.crisis.clone(),
            self.config.pipeline.crisis_max_tokens,
        );

        PipelineModules {
            parallel: vec![
                guard(MoodSensor::new(binding(AgentId::MoodSensor)), gate(AgentId::MoodSensor)),
                guard(memory, gate(AgentId::MemoryAgent)),
                guard(
                    SafetyMonitor::new(binding(AgentId::SafetyMonitor)),
                    gate(AgentId::SafetyMonitor),
                ),
            ],
            sequential: vec![
                guard(
                    EmotionReasoner::new(binding(AgentId::EmotionReasoner)),
                    gate(AgentId::EmotionReasoner),
                ),
                guard(responder, gate(AgentId::ResponseGenerator)),
            ],
        }
    }

    pub async fn run(
        &self,
        state: ConversationState,
        ctx: &PipelineContext,
    ) -> Result<ConversationState, PipelineError> {
        run_pipeline(state, ctx, &self.modules()).await
    }
}
