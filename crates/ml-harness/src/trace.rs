//! Observability-only spans and trace events.
//!
//! Nothing here may influence control flow: every pipeline path must behave
//! identically with [`NoopTracer`] and [`RequestTracer`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use ml_core::types::{AgentId, CrisisSeverity, SignalType};
use ml_telemetry::tracing_setup::generate_span_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ---------------------------------------------------------------------------
// Trace events
// ---------------------------------------------------------------------------

/// How an agent invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Complete,
    Failed,
    /// Circuit open; the static fallback was served without running.
    Fallback,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Complete => "complete",
            AgentStatus::Failed => "failed",
            AgentStatus::Fallback => "fallback",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    PipelineStart {
        session_id: String,
        user_id: String,
        turn_number: u32,
    },
    PipelineEnd {
        duration_ms: u64,
        success: bool,
        crisis_detected: bool,
    },
    AgentStart {
        agent_id: AgentId,
    },
    AgentEnd {
        agent_id: AgentId,
        status: AgentStatus,
        duration_ms: u64,
    },
    LlmCall {
        agent_id: AgentId,
        model: String,
        duration_ms: u64,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        success: bool,
    },
    CrisisDetected {
        session_id: String,
        severity: CrisisSeverity,
        signal_type: SignalType,
        confidence: f64,
    },
    /// Heuristics flagged the message but the model found no crisis.
    SafetyOverride {
        session_id: String,
        heuristic_signals: Vec<SignalType>,
        confidence: f64,
    },
    Error {
        agent_id: Option<AgentId>,
        message: String,
    },
}

impl TraceEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            TraceEventKind::PipelineStart { .. } => "pipeline_start",
            TraceEventKind::PipelineEnd { .. } => "pipeline_end",
            TraceEventKind::AgentStart { .. } => "agent_start",
            TraceEventKind::AgentEnd { .. } => "agent_end",
            TraceEventKind::LlmCall { .. } => "llm_call",
            TraceEventKind::CrisisDetected { .. } => "crisis_detected",
            TraceEventKind::SafetyOverride { .. } => "safety_override",
            TraceEventKind::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

impl TraceEvent {
    pub fn new(trace_id: impl Into<String>, kind: TraceEventKind) -> Self {
        Self {
            trace_id: trace_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// TraceBus
// ---------------------------------------------------------------------------

/// Broadcast bus for [`TraceEvent`]s built on flume channels.
///
/// Each [`subscribe`](Self::subscribe) returns a receiver that sees every
/// event published afterwards. Cheap to clone.
#[derive(Clone, Default)]
pub struct TraceBus {
    inner: Arc<Mutex<Vec<flume::Sender<TraceEvent>>>>,
}

impl TraceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> flume::Receiver<TraceEvent> {
        let (tx, rx) = flume::unbounded();
        self.senders().push(tx);
        rx
    }

    /// Publish to all current subscribers, pruning disconnected ones.
    pub fn publish(&self, event: TraceEvent) {
        self.senders().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders().len()
    }

    fn senders(&self) -> MutexGuard<'_, Vec<flume::Sender<TraceEvent>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TraceBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Spans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEventRecord {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Value,
}

/// A finished span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub attributes: Value,
    pub events: Vec<SpanEventRecord>,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A timing/annotation scope. Ending twice is a no-op.
pub trait Span: Send {
    fn add_event(&mut self, name: &str, attributes: Value);
    fn set_status(&mut self, status: SpanStatus);
    fn end(&mut self);
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, attributes: Value) -> Box<dyn Span>;
    fn emit(&self, event: TraceEvent);
}

// ---------------------------------------------------------------------------
// NoopTracer
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

#[derive(Debug, Default)]
pub struct NoopSpan;

impl Span for NoopSpan {
    fn add_event(&mut self, _name: &str, _attributes: Value) {}
    fn set_status(&mut self, _status: SpanStatus) {}
    fn end(&mut self) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _attributes: Value) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
    fn emit(&self, _event: TraceEvent) {}
}

// ---------------------------------------------------------------------------
// RequestTracer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RequestTracerInner {
    trace_id: String,
    root_span_id: String,
    bus: Option<TraceBus>,
    spans: Mutex<Vec<SpanRecord>>,
    events: Mutex<Vec<TraceEvent>>,
}

/// Tracer for one request: logs spans and events under the `mollei::trace`
/// target, keeps them for inspection and forwards events to a [`TraceBus`].
#[derive(Debug, Clone)]
pub struct RequestTracer {
    inner: Arc<RequestTracerInner>,
}

impl RequestTracer {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self::build(trace_id.into(), None)
    }

    pub fn with_bus(trace_id: impl Into<String>, bus: TraceBus) -> Self {
        Self::build(trace_id.into(), Some(bus))
    }

    fn build(trace_id: String, bus: Option<TraceBus>) -> Self {
        Self {
            inner: Arc::new(RequestTracerInner {
                trace_id,
                root_span_id: generate_span_id(),
                bus,
                spans: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    /// Spans ended so far, in end order.
    pub fn spans(&self) -> Vec<SpanRecord> {
        lock(&self.inner.spans).clone()
    }

    /// Events emitted so far, in emit order.
    pub fn events(&self) -> Vec<TraceEvent> {
        lock(&self.inner.events).clone()
    }

    /// Names of emitted events, handy for assertions.
    pub fn event_names(&self) -> Vec<&'static str> {
        lock(&self.inner.events)
            .iter()
            .map(|e| e.kind.name())
            .collect()
    }
}

impl Tracer for RequestTracer {
    fn start_span(&self, name: &str, attributes: Value) -> Box<dyn Span> {
        Box::new(RequestSpan {
            tracer: Arc::clone(&self.inner),
            record: SpanRecord {
                trace_id: self.inner.trace_id.clone(),
                span_id: generate_span_id(),
                parent_span_id: Some(self.inner.root_span_id.clone()),
                name: name.to_string(),
                attributes,
                events: Vec::new(),
                status: SpanStatus::Unset,
                started_at: Utc::now(),
                duration_ms: 0,
            },
            started: Instant::now(),
            ended: false,
        })
    }

    fn emit(&self, event: TraceEvent) {
        debug!(
            target: "mollei::trace",
            trace_id = %event.trace_id,
            event = event.kind.name(),
            payload = %serde_json::to_string(&event.kind).unwrap_or_default(),
            "trace event"
        );
        if let Some(bus) = &self.inner.bus {
            bus.publish(event.clone());
        }
        lock(&self.inner.events).push(event);
    }
}

struct RequestSpan {
    tracer: Arc<RequestTracerInner>,
    record: SpanRecord,
    started: Instant,
    ended: bool,
}

impl Span for RequestSpan {
    fn add_event(&mut self, name: &str, attributes: Value) {
        self.record.events.push(SpanEventRecord {
            name: name.to_string(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.record.status = status;
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.record.duration_ms = self.started.elapsed().as_millis() as u64;
        debug!(
            target: "mollei::trace",
            trace_id = %self.record.trace_id,
            span = %self.record.name,
            duration_ms = self.record.duration_ms,
            record = %serde_json::to_string(&self.record).unwrap_or_default(),
            "span ended"
        );
        lock(&self.tracer.spans).push(self.record.clone());
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        self.end();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn noop_tracer_does_nothing() {
        let tracer = NoopTracer;
        let mut span = tracer.start_span("x", json!({}));
        span.add_event("e", json!({}));
        span.set_status(SpanStatus::Ok);
        span.end();
        tracer.emit(TraceEvent::new(
            "t",
            TraceEventKind::AgentStart {
                agent_id: AgentId::MoodSensor,
            },
        ));
    }

    #[test]
    fn request_tracer_records_span() {
        let tracer = RequestTracer::new("TURN-1");
        let mut span = tracer.start_span("mood_sensor", json!({ "agent": "mood_sensor" }));
        span.add_event("retrieved", json!({ "turns": 2 }));
        span.set_status(SpanStatus::Ok);
        span.end();
        span.end();

        let spans = tracer.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "mood_sensor");
        assert_eq!(spans[0].trace_id, "TURN-1");
        assert_eq!(spans[0].status, SpanStatus::Ok);
        assert_eq!(spans[0].events[0].name, "retrieved");
        assert_eq!(spans[0].span_id.len(), 16);
        assert!(spans[0].parent_span_id.is_some());
    }

    #[test]
    fn dropped_span_is_ended() {
        let tracer = RequestTracer::new("TURN-2");
        {
            let _span = tracer.start_span("memory_agent", json!({}));
        }
        assert_eq!(tracer.spans().len(), 1);
    }

    #[test]
    fn emitted_events_reach_bus_subscribers() {
        let bus = TraceBus::new();
        let rx = bus.subscribe();
        let tracer = RequestTracer::with_bus("TURN-3", bus.clone());

        tracer.emit(TraceEvent::new(
            "TURN-3",
            TraceEventKind::AgentEnd {
                agent_id: AgentId::SafetyMonitor,
                status: AgentStatus::Fallback,
                duration_ms: 1,
            },
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind.name(), "agent_end");
        assert_eq!(tracer.event_names(), vec!["agent_end"]);
    }

    #[test]
    fn bus_prunes_dropped_subscribers() {
        let bus = TraceBus::new();
        let rx = bus.subscribe();
        let _keep = bus.subscribe();
        drop(rx);
        bus.publish(TraceEvent::new(
            "t",
            TraceEventKind::Error {
                agent_id: None,
                message: "x".into(),
            },
        ));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn trace_event_serializes_flat() {
        let event = TraceEvent::new(
            "TURN-4",
            TraceEventKind::AgentEnd {
                agent_id: AgentId::MoodSensor,
                status: AgentStatus::Complete,
                duration_ms: 12,
            },
        );
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "agent_end");
        assert_eq!(v["agent_id"], "mood_sensor");
        assert_eq!(v["status"], "complete");
        assert_eq!(v["trace_id"], "TURN-4");
    }
}
