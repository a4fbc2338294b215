use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use ml_core::types::{
    AgentId, ConversationState, CrisisSeverity, EmotionState, PartialState, ResponseModifier,
};
use ml_harness::stream::{StreamChannel, DELTA_EVENT};
use ml_harness::trace::{Span, TraceEventKind};
use ml_intelligence::cost_tracker::{estimate_cost, estimate_tokens};
use ml_intelligence::llm::{LlmConfig, LlmError, LlmMessage};
use serde_json::json;
use tracing::debug;

use crate::agent::{failed_call, traced_completion, Agent, AgentError, AgentModel};
use crate::context::PipelineContext;
use crate::crisis_resources::{append_crisis_resources, apply_severity_modifier};
use crate::prompts::RESPONSE_GENERATOR_PROMPT;

pub const FALLBACK_RESPONSE: &str =
    "I'm here with you. Something went wrong on my end, but please know I'm listening.";

/// Multiplier applied to intensity when the mood reading came with
/// ambiguity notes.
const AMBIGUITY_DISCOUNT: f64 = 0.7;

// ---------------------------------------------------------------------------
// Prompt building
// ---------------------------------------------------------------------------

/// How sure we are about the user's emotion, 0.0..=1.0. A missing reading
/// counts as no clarity at all.
pub fn emotion_clarity(emotion: Option<&EmotionState>) -> f64 {
    match emotion {
        None => 0.0,
        Some(e) if e.ambiguity_notes.is_some() => e.intensity * AMBIGUITY_DISCOUNT,
        Some(e) => e.intensity,
    }
}

pub fn clarity_label(clarity: f64) -> &'static str {
    if clarity >= 0.7 {
        "clear"
    } else if clarity >= 0.4 {
        "moderate"
    } else {
        "uncertain"
    }
}

fn clarity_guidance(label: &str) -> &'static str {
    match label {
        "clear" => "Name the feeling directly, e.g. \"It sounds like you're feeling...\"",
        "moderate" => "Offer the feeling tentatively, e.g. \"I'm sensing there might be...\"",
        _ => "Check your understanding first, e.g. \"I want to make sure I understand...\"",
    }
}

pub fn conversation_phase(turn_number: u32) -> &'static str {
    match turn_number {
        0..=2 => "early",
        3..=9 => "building",
        _ => "established",
    }
}

/// Composite prompt for the reply.
pub fn build_prompt(state: &ConversationState) -> String {
    let to_json = |emotion: &Option<EmotionState>| {
        serde_json::to_string_pretty(emotion).unwrap_or_else(|_| "null".into())
    };
    let clarity = emotion_clarity(state.user_emotion.as_ref());
    let label = clarity_label(clarity);
    let crisis = if state.is_crisis() {
        format!("CRISIS DETECTED (severity {})", state.severity())
    } else {
        "No crisis detected".to_string()
    };

    format!(
        "## User Message\n{message}\n\n\
         ## User Emotional State\n{user_emotion}\n\n\
         ## Emotion Clarity\n{clarity:.2} ({label}). {guidance}\n\n\
         ## Mollei's Emotional Response\n{mollei_emotion}\n\n\
         ## Context\n{context}\n\n\
         ## Conversation Phase\nTurn {turn} ({phase})\n\n\
         ## Approach\n{approach}\n\n\
         ## Presence\n{presence}\n\n\
         ## Response Modifier\n{modifier}\n\n\
         ## Crisis Status\n{crisis}\n\n\
         Generate a response that:\n\
         1. Acknowledges the user's emotion before content\n\
         2. Maintains Mollei's warm, thoughtful personality\n\
         3. Uses confidence-modulated language based on emotion clarity\n\
         4. References context naturally (if available)\n\
         5. Does NOT rush to solutions unless asked",
        message = state.user_message,
        user_emotion = to_json(&state.user_emotion),
        guidance = clarity_guidance(label),
        mollei_emotion = to_json(&state.mollei_emotion),
        context = state
            .context_summary
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or("No prior context"),
        turn = state.turn_number,
        phase = conversation_phase(state.turn_number),
        approach = state.approach.map(|a| a.as_str()).unwrap_or("validate"),
        presence = state.presence_quality.as_deref().unwrap_or("attentive"),
        modifier = state
            .suggested_response_modifier
            .unwrap_or(ResponseModifier::None),
    )
}

// ---------------------------------------------------------------------------
// ResponseGenerator
// ---------------------------------------------------------------------------

/// Writes the reply, streaming deltas when a live stream is attached.
pub struct ResponseGenerator {
    model: AgentModel,
    crisis_model: String,
    crisis_max_tokens: u32,
}

impl ResponseGenerator {
    pub fn new(model: AgentModel, crisis_model: impl Into<String>, crisis_max_tokens: u32) -> Self {
        Self {
            model,
            crisis_model: crisis_model.into(),
            crisis_max_tokens,
        }
    }

    /// Model call settings for `severity`: the crisis tier from
    /// [`CrisisSeverity::CRISIS_SUPPORT`] up.
    pub fn llm_config_for(&self, severity: CrisisSeverity) -> LlmConfig {
        let config = self.model.llm_config(RESPONSE_GENERATOR_PROMPT);
        if severity >= CrisisSeverity::CRISIS_SUPPORT {
            LlmConfig {
                model: self.crisis_model.clone(),
                max_tokens: self.crisis_max_tokens,
                ..config
            }
        } else {
            config
        }
    }

    async fn complete_text(
        &self,
        ctx: &PipelineContext,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<String, AgentError> {
        let response =
            traced_completion(ctx, self.id(), self.model.provider.as_ref(), messages, config)
                .await?;
        Ok(response.content)
    }

    /// Forward every chunk as a delta until the stream ends or the caller
    /// aborts. Text received before an abort is kept.
    async fn stream_text(
        &self,
        stream: &Arc<dyn StreamChannel>,
        ctx: &PipelineContext,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<String, AgentError> {
        let started = Instant::now();
        let mut chunks = match self.model.provider.stream(messages, config).await {
            Ok(chunks) => chunks,
            Err(LlmError::Unsupported(reason)) => {
                debug!(trace_id = %ctx.trace_id, %reason, "streaming unsupported, completing whole");
                return self.complete_text(ctx, messages, config).await;
            }
            Err(e) => {
                ctx.emit(failed_call(self.id(), &config.model, elapsed_ms(started)));
                return Err(e.into());
            }
        };

        let abort = stream.abort_signal();
        let mut text = String::new();
        loop {
            tokio::select! {
                biased;
                _ = abort.aborted() => {
                    debug!(trace_id = %ctx.trace_id, "stream aborted, no longer forwarding deltas");
                    break;
                }
                next = chunks.next() => match next {
                    Some(Ok(chunk)) => {
                        stream.send_event(DELTA_EVENT, json!({ "text": chunk })).await;
                        text.push_str(&chunk);
                    }
                    Some(Err(e)) => {
                        ctx.emit(failed_call(self.id(), &config.model, elapsed_ms(started)));
                        return Err(e.into());
                    }
                    None => break,
                },
            }
        }

        // Streamed responses carry no usage; estimate it.
        let input_tokens = messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<u64>()
            + config.system_prompt.as_deref().map(estimate_tokens).unwrap_or(0);
        let output_tokens = estimate_tokens(&text);
        ctx.emit(TraceEventKind::LlmCall {
            agent_id: self.id(),
            model: config.model.clone(),
            duration_ms: elapsed_ms(started),
            input_tokens,
            output_tokens,
            cost_usd: estimate_cost(&config.model, input_tokens, output_tokens),
            success: true,
        });
        Ok(text)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl Agent for ResponseGenerator {
    fn id(&self) -> AgentId {
        AgentId::ResponseGenerator
    }

    fn model(&self) -> &str {
        &self.model.model
    }

    fn timeout(&self) -> Duration {
        self.model.timeout
    }

    /// Crisis turns keep the hotlines even when generation failed; the
    /// lower-band footers are left off the canned text.
    fn fallback(&self, state: &ConversationState) -> PartialState {
        let response = if state.severity() >= CrisisSeverity::CRISIS_SUPPORT {
            append_crisis_resources(FALLBACK_RESPONSE)
        } else {
            FALLBACK_RESPONSE.to_string()
        };
        PartialState {
            response: Some(response),
            ..PartialState::default()
        }
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: &PipelineContext,
        span: &mut dyn Span,
    ) -> Result<PartialState, AgentError> {
        let severity = state.severity();
        let config = self.llm_config_for(severity);
        let messages = [LlmMessage::user(build_prompt(state))];

        let text = match ctx.live_stream() {
            Some(stream) => {
                span.add_event("streaming", json!({ "model": config.model }));
                self.stream_text(stream, ctx, &messages, &config).await?
            }
            None => self.complete_text(ctx, &messages, &config).await?,
        };

        Ok(PartialState {
            response: Some(apply_severity_modifier(&text, severity)),
            model_used: Some(config.model),
            ..PartialState::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_labels_by_turn() {
        assert_eq!(conversation_phase(0), "early");
        assert_eq!(conversation_phase(2), "early");
        assert_eq!(conversation_phase(3), "building");
        assert_eq!(conversation_phase(9), "building");
        assert_eq!(conversation_phase(10), "established");
    }

    #[test]
    fn clarity_discounts_ambiguous_readings() {
        let mut emotion = EmotionState::new("anxious", 0.8, -0.5);
        assert_eq!(clarity_label(emotion_clarity(Some(&emotion))), "clear");

        emotion.ambiguity_notes = Some("masking".into());
        let clarity = emotion_clarity(Some(&emotion));
        assert!((clarity - 0.56).abs() < 1e-9);
        assert_eq!(clarity_label(clarity), "moderate");
    }

    #[test]
    fn missing_emotion_is_uncertain() {
        assert_eq!(emotion_clarity(None), 0.0);
        assert_eq!(clarity_label(0.0), "uncertain");
        assert_eq!(clarity_label(0.39), "uncertain");
        assert_eq!(clarity_label(0.4), "moderate");
    }

    #[test]
    fn prompt_embeds_state() {
        let mut state = ConversationState::new("s", "u", "t", 4, "I got the job!");
        state.approach = Some(ml_core::types::Approach::Explore);
        state.context_summary = Some("Interview last week".into());
        let prompt = build_prompt(&state);
        assert!(prompt.contains("I got the job!"));
        assert!(prompt.contains("Turn 4 (building)"));
        assert!(prompt.contains("## Approach\nexplore"));
        assert!(prompt.contains("Interview last week"));
        assert!(prompt.contains("No crisis detected"));
        assert!(prompt.contains("(uncertain)"));
    }
}
