use std::time::Duration;

use async_trait::async_trait;
use ml_core::types::{AgentId, Approach, ConversationState, EmotionState, PartialState};
use ml_harness::trace::Span;
use serde::Deserialize;
use serde_json::json;

use crate::agent::{structured_call, Agent, AgentError, AgentModel};
use crate::context::PipelineContext;
use crate::prompts::EMOTION_REASONER_PROMPT;

/// Valence of every emotion Mollei intends to show.
const MOLLEI_VALENCE: f64 = 0.3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReasonerOutput {
    primary: String,
    energy: f64,
    approach: Approach,
    #[serde(default)]
    tone_modifiers: Vec<String>,
    presence_quality: String,
}

/// Decides Mollei's emotional stance, approach and presence for the reply.
pub struct EmotionReasoner {
    model: AgentModel,
}

impl EmotionReasoner {
    pub fn new(model: AgentModel) -> Self {
        Self { model }
    }

    /// Model input summarizing everything the parallel group produced.
    pub fn build_context(state: &ConversationState) -> String {
        let user_emotion = serde_json::to_string(&state.user_emotion).unwrap_or_default();
        let trajectory = state
            .emotional_trajectory
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unknown".into());

        format!(
            "User message: {}\n\
             User emotion: {}\n\
             Context summary: {}\n\
             Emotional trajectory: {}\n\
             Crisis detected: {}\n\
             Crisis severity: {}\n\
             Turn number: {}",
            state.user_message,
            user_emotion,
            state.context_summary.as_deref().unwrap_or("None"),
            trajectory,
            state.is_crisis(),
            state.severity(),
            state.turn_number,
        )
    }
}

#[async_trait]
impl Agent for EmotionReasoner {
    fn id(&self) -> AgentId {
        AgentId::EmotionReasoner
    }

    fn model(&self) -> &str {
        &self.model.model
    }

    fn timeout(&self) -> Duration {
        self.model.timeout
    }

    fn fallback(&self, _state: &ConversationState) -> PartialState {
        PartialState {
            mollei_emotion: Some(EmotionState::new("warmth", 0.6, MOLLEI_VALENCE)),
            approach: Some(Approach::Validate),
            presence_quality: Some("attentive".into()),
            ..PartialState::default()
        }
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: &PipelineContext,
        span: &mut dyn Span,
    ) -> Result<PartialState, AgentError> {
        let output: ReasonerOutput = structured_call(
            ctx,
            self.id(),
            &self.model,
            EMOTION_REASONER_PROMPT,
            Self::build_context(state),
        )
        .await?;

        span.add_event(
            "emotion_reasoned",
            json!({ "primary": output.primary, "approach": output.approach }),
        );

        let mut emotion = EmotionState::new(output.primary, output.energy, MOLLEI_VALENCE);
        emotion.signals = output.tone_modifiers;

        Ok(PartialState {
            mollei_emotion: Some(emotion),
            approach: Some(output.approach),
            presence_quality: Some(output.presence_quality),
            ..PartialState::default()
        })
    }
}
