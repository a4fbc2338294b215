use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ml_agents::agent::{Agent, AgentError, GuardedAgent, PipelineModule};
use ml_agents::context::PipelineContext;
use ml_core::types::{AgentId, ConversationState, EmotionState, PartialState};
use ml_harness::circuit_breaker::{
    AlwaysClosed, AlwaysOpen, CircuitBreaker, CircuitBreakerConfig, CircuitGate, CircuitState,
};
use ml_harness::trace::{AgentStatus, RequestTracer, Span, SpanStatus, TraceEventKind};
use serde_json::json;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Hang,
    Panic,
}

struct ScriptedAgent {
    behavior: Behavior,
    runs: Arc<AtomicUsize>,
    timeout: Duration,
}

impl ScriptedAgent {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            runs: Arc::new(AtomicUsize::new(0)),
            timeout: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> AgentId {
        AgentId::MoodSensor
    }

    fn model(&self) -> &str {
        "test-model"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn fallback(&self, _state: &ConversationState) -> PartialState {
        PartialState {
            user_emotion: Some(EmotionState::neutral()),
            ..PartialState::default()
        }
    }

    async fn run(
        &self,
        _state: &ConversationState,
        _ctx: &PipelineContext,
        span: &mut dyn Span,
    ) -> Result<PartialState, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => {
                span.add_event("ran", json!({}));
                Ok(PartialState {
                    user_emotion: Some(EmotionState::new("joy", 0.8, 0.7)),
                    ..PartialState::default()
                })
            }
            Behavior::Fail => Err(AgentError::InvalidOutput("bad shape".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(PartialState::default())
            }
            Behavior::Panic => {
                let empty: Vec<PartialState> = Vec::new();
                Ok(empty[0].clone())
            }
        }
    }
}

fn state() -> ConversationState {
    ConversationState::new("session-1", "user-1", "TURN-test", 1, "hello")
}

fn traced_ctx() -> (PipelineContext, RequestTracer) {
    let tracer = RequestTracer::new("TURN-test");
    let ctx = PipelineContext::new("TURN-test", "session-1", "user-1", 1)
        .with_tracer(Arc::new(tracer.clone()));
    (ctx, tracer)
}

fn end_status(tracer: &RequestTracer) -> Option<AgentStatus> {
    tracer.events().into_iter().find_map(|e| match e.kind {
        TraceEventKind::AgentEnd { status, .. } => Some(status),
        _ => None,
    })
}

#[tokio::test]
async fn success_passes_partial_through_with_latency() {
    let (ctx, tracer) = traced_ctx();
    let guarded = GuardedAgent::new(ScriptedAgent::new(Behavior::Succeed), Arc::new(AlwaysClosed));

    let partial = guarded.execute(&state(), &ctx).await;

    assert_eq!(partial.user_emotion.unwrap().primary, "joy");
    assert!(partial.agent_errors.is_empty());
    assert!(partial.latency_ms.contains_key("mood_sensor"));
    assert_eq!(guarded.agent().runs.load(Ordering::SeqCst), 1);

    assert_eq!(tracer.event_names(), vec!["agent_start", "agent_end"]);
    assert_eq!(end_status(&tracer), Some(AgentStatus::Complete));

    let spans = tracer.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "agent.mood_sensor");
    assert_eq!(spans[0].status, SpanStatus::Ok);
    assert_eq!(spans[0].events[0].name, "ran");
}

#[tokio::test]
async fn open_circuit_serves_fallback_without_running() {
    let (ctx, tracer) = traced_ctx();
    let guarded = GuardedAgent::new(ScriptedAgent::new(Behavior::Succeed), Arc::new(AlwaysOpen));

    let partial = guarded.execute(&state(), &ctx).await;

    assert_eq!(guarded.agent().runs.load(Ordering::SeqCst), 0);
    assert_eq!(partial.user_emotion.unwrap().primary, "neutral");
    assert!(partial.agent_errors.is_empty());
    assert!(partial.latency_ms.contains_key("mood_sensor"));
    assert_eq!(end_status(&tracer), Some(AgentStatus::Fallback));
    assert_eq!(tracer.spans()[0].events[0].name, "circuit_open");
}

#[tokio::test]
async fn failure_serves_fallback_and_records_error() {
    let (ctx, tracer) = traced_ctx();
    let guarded = GuardedAgent::new(ScriptedAgent::new(Behavior::Fail), Arc::new(AlwaysClosed));

    let partial = guarded.execute(&state(), &ctx).await;

    assert_eq!(partial.user_emotion.unwrap().primary, "neutral");
    assert_eq!(partial.agent_errors.len(), 1);
    assert!(partial.agent_errors[0].contains("bad shape"));
    assert!(partial.latency_ms.contains_key("mood_sensor"));

    assert_eq!(tracer.event_names(), vec!["agent_start", "error", "agent_end"]);
    assert_eq!(end_status(&tracer), Some(AgentStatus::Failed));
    assert!(matches!(tracer.spans()[0].status, SpanStatus::Error(_)));
}

#[tokio::test]
async fn panic_in_run_serves_fallback_and_counts_as_failure() {
    let (ctx, tracer) = traced_ctx();
    let breaker = Arc::new(CircuitBreaker::new("mood_sensor", CircuitBreakerConfig::default()));
    let guarded = GuardedAgent::new(
        ScriptedAgent::new(Behavior::Panic),
        breaker.clone() as Arc<dyn CircuitGate>,
    );

    let partial = guarded.execute(&state(), &ctx).await;

    assert_eq!(partial.user_emotion.unwrap().primary, "neutral");
    assert_eq!(partial.agent_errors.len(), 1);
    assert!(partial.agent_errors[0].contains("panicked"));
    assert!(partial.latency_ms.contains_key("mood_sensor"));
    assert_eq!(breaker.failure_count(), 1);

    assert_eq!(tracer.event_names(), vec!["agent_start", "error", "agent_end"]);
    assert_eq!(end_status(&tracer), Some(AgentStatus::Failed));
    assert!(matches!(tracer.spans()[0].status, SpanStatus::Error(_)));
}

#[tokio::test]
async fn timeout_cancels_run_and_serves_fallback() {
    let (ctx, _tracer) = traced_ctx();
    let mut agent = ScriptedAgent::new(Behavior::Hang);
    agent.timeout = Duration::from_millis(20);
    let guarded = GuardedAgent::new(agent, Arc::new(AlwaysClosed));

    let started = std::time::Instant::now();
    let partial = guarded.execute(&state(), &ctx).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(partial.user_emotion.unwrap().primary, "neutral");
    assert_eq!(partial.agent_errors.len(), 1);
    assert!(partial.agent_errors[0].contains("timed out"));
}

#[tokio::test]
async fn repeated_failures_open_the_breaker() {
    let ctx = PipelineContext::new("TURN-test", "session-1", "user-1", 1);
    let breaker = Arc::new(CircuitBreaker::new(
        "mood_sensor",
        CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            half_open_max_requests: 1,
        },
    ));
    let guarded = GuardedAgent::new(
        ScriptedAgent::new(Behavior::Fail),
        breaker.clone() as Arc<dyn CircuitGate>,
    );

    guarded.execute(&state(), &ctx).await;
    guarded.execute(&state(), &ctx).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    let partial = guarded.execute(&state(), &ctx).await;
    assert_eq!(guarded.agent().runs.load(Ordering::SeqCst), 2);
    // Refused calls are not errors.
    assert!(partial.agent_errors.is_empty());
    assert_eq!(partial.user_emotion.unwrap().primary, "neutral");
}

#[tokio::test]
async fn success_closes_the_breaker_count() {
    let ctx = PipelineContext::new("TURN-test", "session-1", "user-1", 1);
    let breaker = Arc::new(CircuitBreaker::new("mood_sensor", CircuitBreakerConfig::default()));
    let failing = GuardedAgent::new(
        ScriptedAgent::new(Behavior::Fail),
        breaker.clone() as Arc<dyn CircuitGate>,
    );
    let succeeding = GuardedAgent::new(
        ScriptedAgent::new(Behavior::Succeed),
        breaker.clone() as Arc<dyn CircuitGate>,
    );

    failing.execute(&state(), &ctx).await;
    failing.execute(&state(), &ctx).await;
    assert_eq!(breaker.failure_count(), 2);

    succeeding.execute(&state(), &ctx).await;
    assert_eq!(breaker.failure_count(), 0);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
