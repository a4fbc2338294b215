use uuid::Uuid;

/// Generate a span ID (16 hex characters).
pub fn generate_span_id() -> String {
    Uuid::new_v4().as_simple().to_string()[..16].to_string()
}

/// Short id for one conversation turn, e.g. `TURN-1a2b3c4d`.
pub fn generate_turn_trace_id() -> String {
    format!("TURN-{}", &Uuid::new_v4().as_simple().to_string()[..8])
}

/// Create a child span under an existing trace ID.
pub fn create_child_span(trace_id: &str, operation: &str) -> tracing::Span {
    let span_id = generate_span_id();
    tracing::info_span!(
        "operation",
        trace_id = %trace_id,
        span_id = %span_id,
        operation = %operation,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
