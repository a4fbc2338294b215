//! The calling route: owns the stream for one turn.
//!
//! Assigns the turn number, runs the pipeline on its own task, caches the
//! finished turn, and always closes the stream.

use std::sync::Arc;

use ml_agents::context::PipelineContext;
use ml_agents::pipeline::Pipeline;
use ml_core::conversation_cache::CachedTurn;
use ml_core::sanitize::{log_suspicious_input, sanitize_user_input};
use ml_core::types::ConversationState;
use ml_harness::stream::StreamChannel;
use ml_harness::trace::{RequestTracer, TraceBus};
use ml_intelligence::cost_tracker::CostAggregator;
use ml_telemetry::tracing_setup::{create_child_span, generate_turn_trace_id};
use serde_json::{json, Value};
use tracing::{error, info, warn, Instrument};

/// The only failure text a caller ever sees.
pub const GENERIC_ERROR: &str = "I'm sorry, something went wrong on my end. Please try again.";

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub user_id: String,
    pub message: String,
}

impl TurnRequest {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            message: message.into(),
        }
    }
}

/// Shared across turns: the pipeline (and its breaker registry), the trace
/// bus and the cost aggregator listening on it.
pub struct TurnRunner {
    pipeline: Pipeline,
    bus: TraceBus,
    costs: CostAggregator,
}

impl TurnRunner {
    /// Must be called inside a tokio runtime; spawns the cost aggregator.
    pub fn new(pipeline: Pipeline) -> Self {
        let bus = TraceBus::new();
        let costs = CostAggregator::new();
        costs.spawn(&bus);
        Self {
            pipeline,
            bus,
            costs,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn costs(&self) -> &CostAggregator {
        &self.costs
    }

    /// Run one turn, reporting on `stream`. Returns the final state unless
    /// the pipeline failed as a whole.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        stream: Arc<dyn StreamChannel>,
    ) -> Option<ConversationState> {
        let trace_id = generate_turn_trace_id();
        let cache = self.pipeline.cache();

        let input = sanitize_user_input(&request.message);
        log_suspicious_input(&trace_id, request.message.chars().count(), &input);

        let turn_number = match cache.get_next_turn_number(&request.session_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(trace_id = %trace_id, error = %e, "turn number lookup failed, assuming new session");
                1
            }
        };

        let state = ConversationState::new(
            request.session_id,
            request.user_id,
            trace_id.clone(),
            turn_number,
            input.sanitized,
        );
        let mut ctx = PipelineContext::for_state(&state).with_stream(Arc::clone(&stream));
        if self.pipeline.config().tracing.enabled {
            ctx = ctx.with_tracer(Arc::new(RequestTracer::with_bus(
                trace_id.clone(),
                self.bus.clone(),
            )));
        }

        let pipeline = self.pipeline.clone();
        let task = tokio::spawn(
            async move { pipeline.run(state, &ctx).await }
                .instrument(create_child_span(&trace_id, "pipeline.turn")),
        );
        let outcome = match task.await {
            Ok(Ok(state)) => Some(state),
            Ok(Err(e)) => {
                error!(trace_id = %trace_id, error = %e, "pipeline failed");
                None
            }
            Err(e) => {
                error!(trace_id = %trace_id, error = %e, "pipeline task died");
                None
            }
        };

        match &outcome {
            Some(state) if stream.is_aborted() => {
                info!(trace_id = %trace_id, turn = state.turn_number, "client gone, turn not cached");
            }
            Some(state) => {
                if let Err(e) = cache.cache_turn(CachedTurn::from_state(state)).await {
                    warn!(trace_id = %trace_id, error = %e, "failed to cache turn");
                }
                stream.send_result(result_payload(state)).await;
            }
            None => stream.send_error(GENERIC_ERROR).await,
        }
        stream.close().await;
        outcome
    }
}

/// Payload of the final `result` event.
pub fn result_payload(state: &ConversationState) -> Value {
    json!({
        "response": state.response,
        "trace_id": state.trace_id,
        "session_id": state.session_id,
        "turn_number": state.turn_number,
        "user_emotion": state.user_emotion,
        "mollei_emotion": state.mollei_emotion,
        "approach": state.approach,
        "crisis_detected": state.is_crisis(),
        "crisis_severity": state.severity(),
        "model_used": state.model_used,
        "latency_ms": state.latency_ms,
        "agent_errors": state.agent_errors,
    })
}
