//! Pricing and per-trace cost aggregation.
//!
//! Agents emit an `llm_call` trace event for every model call. The
//! [`CostAggregator`] listens on the trace bus and folds those events into a
//! summary per pipeline run.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ml_core::types::AgentId;
use ml_harness::trace::{TraceBus, TraceEvent, TraceEventKind};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

// ---------------------------------------------------------------------------
// Model Pricing
// ---------------------------------------------------------------------------

/// Per-model pricing in USD per 1M tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub provider: String,
    pub input_cost_per_1m: f64,
    pub output_cost_per_1m: f64,
    /// Relative quality score (0.0–1.0).
    pub quality_score: f64,
    /// Context window size in tokens.
    pub context_window: u64,
}

impl ModelPricing {
    /// Calculate cost for a request with the given token counts.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_1m
            + (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_1m
    }
}

/// Pricing for the three model tiers.
pub fn default_pricing_table() -> Vec<ModelPricing> {
    vec![
        ModelPricing {
            model: crate::models::OPUS.into(),
            provider: "anthropic".into(),
            input_cost_per_1m: 5.0,
            output_cost_per_1m: 25.0,
            quality_score: 0.98,
            context_window: 200_000,
        },
        ModelPricing {
            model: crate::models::SONNET.into(),
            provider: "anthropic".into(),
            input_cost_per_1m: 3.0,
            output_cost_per_1m: 15.0,
            quality_score: 0.92,
            context_window: 200_000,
        },
        ModelPricing {
            model: crate::models::HAIKU.into(),
            provider: "anthropic".into(),
            input_cost_per_1m: 1.0,
            output_cost_per_1m: 5.0,
            quality_score: 0.82,
            context_window: 200_000,
        },
    ]
}

/// Pricing for `model`, matched exactly or by family name.
pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    let table = default_pricing_table();
    if let Some(exact) = table.iter().find(|p| p.model == model) {
        return Some(exact.clone());
    }
    ["opus", "sonnet", "haiku"]
        .into_iter()
        .find(|family| model.contains(family))
        .and_then(|family| table.into_iter().find(|p| p.model.contains(family)))
}

/// Estimated USD cost of one call. Unknown models cost nothing.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    pricing_for(model)
        .map(|p| p.calculate_cost(input_tokens, output_tokens))
        .unwrap_or(0.0)
}

/// Rough token count for text whose usage the provider did not report.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

// ---------------------------------------------------------------------------
// Cost summaries
// ---------------------------------------------------------------------------

/// One successful model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub agent_id: AgentId,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCost {
    pub calls: u32,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_duration_ms: f64,
}

/// Cost of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceCostSummary {
    pub trace_id: String,
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_calls: u32,
    pub total_duration_ms: u64,
    pub by_agent: BTreeMap<AgentId, AgentCost>,
    pub entries: Vec<CostEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TraceCostSummary {
    fn new(trace_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            total_cost_usd: 0.0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_calls: 0,
            total_duration_ms: 0,
            by_agent: BTreeMap::new(),
            entries: Vec::new(),
            started_at,
            ended_at: None,
        }
    }

    fn record(&mut self, entry: CostEntry) {
        self.total_cost_usd += entry.cost_usd;
        self.total_input_tokens += entry.input_tokens;
        self.total_output_tokens += entry.output_tokens;
        self.total_calls += 1;
        self.total_duration_ms += entry.duration_ms;

        let stats = self.by_agent.entry(entry.agent_id).or_default();
        stats.calls += 1;
        stats.cost_usd += entry.cost_usd;
        stats.input_tokens += entry.input_tokens;
        stats.output_tokens += entry.output_tokens;
        stats.avg_duration_ms = (stats.avg_duration_ms * f64::from(stats.calls - 1)
            + entry.duration_ms as f64)
            / f64::from(stats.calls);

        self.entries.push(entry);
    }
}

// ---------------------------------------------------------------------------
// CostAggregator
// ---------------------------------------------------------------------------

/// Default number of traces kept before the oldest is evicted.
pub const MAX_TRACES: usize = 500;

#[derive(Debug, Default)]
struct AggregatorInner {
    summaries: HashMap<String, TraceCostSummary>,
    order: VecDeque<String>,
}

/// Bounded per-trace cost summaries. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CostAggregator {
    inner: Arc<Mutex<AggregatorInner>>,
    max_traces: usize,
}

impl CostAggregator {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRACES)
    }

    pub fn with_capacity(max_traces: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AggregatorInner::default())),
            max_traces: max_traces.max(1),
        }
    }

    /// Fold one trace event into the summaries.
    ///
    /// Calls for a trace that was never started (or already evicted) are
    /// dropped, as are failed calls.
    pub fn ingest(&self, event: &TraceEvent) {
        let mut inner = self.lock();
        match &event.kind {
            TraceEventKind::PipelineStart { .. } => {
                if inner.summaries.len() >= self.max_traces {
                    if let Some(oldest) = inner.order.pop_front() {
                        inner.summaries.remove(&oldest);
                    }
                }
                inner.order.retain(|id| id != &event.trace_id);
                inner.order.push_back(event.trace_id.clone());
                inner.summaries.insert(
                    event.trace_id.clone(),
                    TraceCostSummary::new(&event.trace_id, event.timestamp),
                );
            }
            TraceEventKind::PipelineEnd { .. } => {
                if let Some(summary) = inner.summaries.get_mut(&event.trace_id) {
                    summary.ended_at = Some(event.timestamp);
                    debug!(
                        trace_id = %summary.trace_id,
                        total_cost_usd = summary.total_cost_usd,
                        calls = summary.total_calls,
                        input_tokens = summary.total_input_tokens,
                        output_tokens = summary.total_output_tokens,
                        "pipeline cost summary"
                    );
                }
            }
            TraceEventKind::LlmCall {
                agent_id,
                model,
                duration_ms,
                input_tokens,
                output_tokens,
                cost_usd,
                success,
            } => {
                if !success {
                    return;
                }
                if let Some(summary) = inner.summaries.get_mut(&event.trace_id) {
                    summary.record(CostEntry {
                        agent_id: *agent_id,
                        model: model.clone(),
                        input_tokens: *input_tokens,
                        output_tokens: *output_tokens,
                        cost_usd: *cost_usd,
                        duration_ms: *duration_ms,
                        timestamp: event.timestamp,
                    });
                }
            }
            _ => {}
        }
    }

    /// Subscribe to `bus` and ingest events until every publisher is gone.
    pub fn spawn(&self, bus: &TraceBus) -> JoinHandle<()> {
        let rx = bus.subscribe();
        let aggregator = self.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                aggregator.ingest(&event);
            }
            debug!("cost aggregator stopped");
        })
    }

    pub fn summary(&self, trace_id: &str) -> Option<TraceCostSummary> {
        self.lock().summaries.get(trace_id).cloned()
    }

    /// All summaries, oldest first.
    pub fn all(&self) -> Vec<TraceCostSummary> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.summaries.get(id).cloned())
            .collect()
    }

    pub fn clear(&self, trace_id: &str) {
        let mut inner = self.lock();
        inner.summaries.remove(trace_id);
        inner.order.retain(|id| id != trace_id);
    }

    pub fn len(&self) -> usize {
        self.lock().summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CostAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_cost_per_million() {
        let haiku = pricing_for(crate::models::HAIKU).unwrap();
        let cost = haiku.calculate_cost(1_000_000, 1_000_000);
        assert!((cost - 6.0).abs() < 1e-9);
    }

    #[test]
    fn pricing_matches_by_family() {
        let p = pricing_for("claude-sonnet-4-5-latest").unwrap();
        assert_eq!(p.model, crate::models::SONNET);
        assert!(pricing_for("gpt-4o").is_none());
    }

    #[test]
    fn unknown_model_costs_nothing() {
        assert_eq!(estimate_cost("mystery", 1000, 1000), 0.0);
        let opus = estimate_cost(crate::models::OPUS, 1000, 1000);
        assert!((opus - 0.03).abs() < 1e-9);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("abcd"), 1);
    }
}
