use std::time::Duration;

use async_trait::async_trait;
use ml_core::types::{
    clamp_unit, AgentId, ConversationState, CrisisSeverity, PartialState, ResponseModifier,
    SignalType,
};
use ml_harness::trace::{Span, TraceEventKind};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::agent::{structured_call, Agent, AgentError, AgentModel};
use crate::context::PipelineContext;
use crate::prompts::SAFETY_MONITOR_PROMPT;
use crate::safety_heuristics::run_safety_heuristics;

/// Confidence reported when the heuristics find nothing.
pub const HEURISTIC_CLEAR_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyOutput {
    crisis_detected: bool,
    severity: CrisisSeverity,
    signal_type: SignalType,
    confidence: f64,
    #[serde(default)]
    key_phrases: Vec<String>,
    suggested_response_modifier: ResponseModifier,
}

/// Crisis detection: heuristics first, a model call only when they flag.
///
/// When the model call fails the stage assumes moderate risk (severity 3,
/// `distress`) instead of assuming the user is fine.
pub struct SafetyMonitor {
    model: AgentModel,
}

impl SafetyMonitor {
    pub fn new(model: AgentModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Agent for SafetyMonitor {
    fn id(&self) -> AgentId {
        AgentId::SafetyMonitor
    }

    fn model(&self) -> &str {
        &self.model.model
    }

    fn timeout(&self) -> Duration {
        self.model.timeout
    }

    fn fallback(&self, _state: &ConversationState) -> PartialState {
        PartialState {
            crisis_detected: Some(true),
            crisis_severity: Some(CrisisSeverity::SUGGEST_HUMAN),
            crisis_signal_type: Some(SignalType::Distress),
            crisis_confidence: Some(0.5),
            suggested_response_modifier: Some(ResponseModifier::SuggestProfessional),
            ..PartialState::default()
        }
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: &PipelineContext,
        span: &mut dyn Span,
    ) -> Result<PartialState, AgentError> {
        let heuristics = run_safety_heuristics(&state.user_message);

        if !heuristics.should_escalate {
            span.add_event("safety_clear", json!({ "method": "heuristics" }));
            return Ok(PartialState {
                crisis_detected: Some(false),
                crisis_severity: Some(CrisisSeverity::PROCEED),
                crisis_signal_type: Some(SignalType::None),
                crisis_confidence: Some(HEURISTIC_CLEAR_CONFIDENCE),
                suggested_response_modifier: Some(ResponseModifier::None),
                ..PartialState::default()
            });
        }

        info!(
            trace_id = %ctx.trace_id,
            signals = ?heuristics.signals,
            "heuristics flagged message, escalating to model"
        );

        let output: SafetyOutput = structured_call(
            ctx,
            self.id(),
            &self.model,
            SAFETY_MONITOR_PROMPT,
            state.user_message.clone(),
        )
        .await?;
        let confidence = clamp_unit(output.confidence, 0.5);

        if output.crisis_detected {
            warn!(
                trace_id = %ctx.trace_id,
                severity = output.severity.value(),
                signal = %output.signal_type,
                "crisis confirmed"
            );
            span.add_event(
                "crisis_detected",
                json!({
                    "severity": output.severity,
                    "signal_type": output.signal_type,
                    "key_phrases": output.key_phrases,
                }),
            );
            ctx.emit(TraceEventKind::CrisisDetected {
                session_id: ctx.session_id.clone(),
                severity: output.severity,
                signal_type: output.signal_type,
                confidence,
            });
        } else {
            info!(trace_id = %ctx.trace_id, "model overrode heuristic flag");
            span.add_event("safety_override", json!({ "method": "llm" }));
            ctx.emit(TraceEventKind::SafetyOverride {
                session_id: ctx.session_id.clone(),
                heuristic_signals: heuristics.signals.clone(),
                confidence,
            });
        }

        Ok(PartialState {
            crisis_detected: Some(output.crisis_detected),
            crisis_severity: Some(output.severity),
            crisis_signal_type: Some(output.signal_type),
            crisis_confidence: Some(confidence),
            suggested_response_modifier: Some(output.suggested_response_modifier),
            ..PartialState::default()
        })
    }
}
