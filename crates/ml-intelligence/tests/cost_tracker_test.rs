use std::time::Duration;

use ml_core::types::AgentId;
use ml_harness::trace::{TraceBus, TraceEvent, TraceEventKind};
use ml_intelligence::cost_tracker::{estimate_cost, CostAggregator};
use ml_intelligence::models::{HAIKU, SONNET};

fn start(trace: &str) -> TraceEvent {
    TraceEvent::new(
        trace,
        TraceEventKind::PipelineStart {
            session_id: "s1".into(),
            user_id: "u1".into(),
            turn_number: 1,
        },
    )
}

fn end(trace: &str) -> TraceEvent {
    TraceEvent::new(
        trace,
        TraceEventKind::PipelineEnd {
            duration_ms: 900,
            success: true,
            crisis_detected: false,
        },
    )
}

fn call(trace: &str, agent: AgentId, model: &str, duration_ms: u64, success: bool) -> TraceEvent {
    TraceEvent::new(
        trace,
        TraceEventKind::LlmCall {
            agent_id: agent,
            model: model.into(),
            duration_ms,
            input_tokens: 1000,
            output_tokens: 200,
            cost_usd: estimate_cost(model, 1000, 200),
            success,
        },
    )
}

#[test]
fn aggregates_totals_and_per_agent_breakdown() {
    let agg = CostAggregator::new();
    agg.ingest(&start("TURN-1"));
    agg.ingest(&call("TURN-1", AgentId::MoodSensor, HAIKU, 100, true));
    agg.ingest(&call("TURN-1", AgentId::MoodSensor, HAIKU, 300, true));
    agg.ingest(&call("TURN-1", AgentId::ResponseGenerator, SONNET, 800, true));
    agg.ingest(&end("TURN-1"));

    let summary = agg.summary("TURN-1").unwrap();
    assert_eq!(summary.total_calls, 3);
    assert_eq!(summary.total_input_tokens, 3000);
    assert_eq!(summary.total_output_tokens, 600);
    assert_eq!(summary.total_duration_ms, 1200);
    assert_eq!(summary.entries.len(), 3);
    assert!(summary.ended_at.is_some());

    let mood = &summary.by_agent[&AgentId::MoodSensor];
    assert_eq!(mood.calls, 2);
    assert!((mood.avg_duration_ms - 200.0).abs() < 1e-9);

    let expected = 2.0 * estimate_cost(HAIKU, 1000, 200) + estimate_cost(SONNET, 1000, 200);
    assert!((summary.total_cost_usd - expected).abs() < 1e-12);
}

#[test]
fn failed_calls_are_ignored() {
    let agg = CostAggregator::new();
    agg.ingest(&start("t"));
    agg.ingest(&call("t", AgentId::SafetyMonitor, HAIKU, 50, false));
    assert_eq!(agg.summary("t").unwrap().total_calls, 0);
}

#[test]
fn calls_without_pipeline_start_are_dropped() {
    let agg = CostAggregator::new();
    agg.ingest(&call("orphan", AgentId::MoodSensor, HAIKU, 50, true));
    assert!(agg.summary("orphan").is_none());
    assert!(agg.is_empty());
}

#[test]
fn oldest_trace_is_evicted_at_capacity() {
    let agg = CostAggregator::with_capacity(2);
    agg.ingest(&start("a"));
    agg.ingest(&start("b"));
    agg.ingest(&start("c"));

    assert_eq!(agg.len(), 2);
    assert!(agg.summary("a").is_none());
    let ids: Vec<String> = agg.all().into_iter().map(|s| s.trace_id).collect();
    assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn clear_removes_one_trace() {
    let agg = CostAggregator::new();
    agg.ingest(&start("a"));
    agg.ingest(&start("b"));
    agg.clear("a");
    assert!(agg.summary("a").is_none());
    assert_eq!(agg.all().len(), 1);
}

#[tokio::test]
async fn spawned_aggregator_listens_on_bus() {
    let bus = TraceBus::new();
    let agg = CostAggregator::new();
    let handle = agg.spawn(&bus);

    bus.publish(start("TURN-bus"));
    bus.publish(call("TURN-bus", AgentId::EmotionReasoner, HAIKU, 120, true));
    bus.publish(end("TURN-bus"));

    let mut done = false;
    for _ in 0..50 {
        if agg
            .summary("TURN-bus")
            .is_some_and(|s| s.ended_at.is_some() && s.total_calls == 1)
        {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done, "aggregator never caught up");

    drop(bus);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
