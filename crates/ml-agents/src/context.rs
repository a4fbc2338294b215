use std::fmt;
use std::sync::Arc;

use ml_core::types::ConversationState;
use ml_harness::stream::StreamChannel;
use ml_harness::trace::{NoopSpan, Span, TraceEvent, TraceEventKind, Tracer};
use serde_json::Value;

/// Per-request bundle handed to every stage. Never mutated once built.
#[derive(Clone)]
pub struct PipelineContext {
    pub trace_id: String,
    pub session_id: String,
    pub user_id: String,
    pub turn_number: u32,
    pub stream: Option<Arc<dyn StreamChannel>>,
    pub tracer: Option<Arc<dyn Tracer>>,
}

impl PipelineContext {
    pub fn new(
        trace_id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        turn_number: u32,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            turn_number,
            stream: None,
            tracer: None,
        }
    }

    /// Context carrying the identity fields of `state`.
    pub fn for_state(state: &ConversationState) -> Self {
        Self::new(
            state.trace_id.clone(),
            state.session_id.clone(),
            state.user_id.clone(),
            state.turn_number,
        )
    }

    pub fn with_stream(mut self, stream: Arc<dyn StreamChannel>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// True once the caller's stream was aborted. Without a stream nothing
    /// can abort the run.
    pub fn is_aborted(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_aborted())
    }

    /// Stream that is still worth writing to.
    pub fn live_stream(&self) -> Option<&Arc<dyn StreamChannel>> {
        self.stream.as_ref().filter(|s| !s.is_aborted())
    }

    pub fn start_span(&self, name: &str, attributes: Value) -> Box<dyn Span> {
        match &self.tracer {
            Some(tracer) => tracer.start_span(name, attributes),
            None => Box::new(NoopSpan),
        }
    }

    pub fn emit(&self, kind: TraceEventKind) {
        if let Some(tracer) = &self.tracer {
            tracer.emit(TraceEvent::new(self.trace_id.clone(), kind));
        }
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("trace_id", &self.trace_id)
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("turn_number", &self.turn_number)
            .field("stream", &self.stream.is_some())
            .field("tracer", &self.tracer.is_some())
            .finish()
    }
}
