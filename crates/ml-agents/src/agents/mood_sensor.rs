use std::time::Duration;

use async_trait::async_trait;
use ml_core::types::{AgentId, ConversationState, EmotionState, PartialState};
use ml_harness::trace::Span;
use serde::Deserialize;

use crate::agent::{structured_call, Agent, AgentError, AgentModel};
use crate::context::PipelineContext;
use crate::prompts::MOOD_SENSOR_PROMPT;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoodOutput {
    primary: String,
    #[serde(default)]
    secondary: Option<String>,
    intensity: f64,
    valence: f64,
    #[serde(default)]
    signals: Vec<String>,
    #[serde(default)]
    ambiguity_notes: Option<String>,
}

impl From<MoodOutput> for EmotionState {
    fn from(out: MoodOutput) -> Self {
        EmotionState {
            primary: out.primary,
            secondary: out.secondary,
            intensity: out.intensity,
            valence: out.valence,
            signals: out.signals,
            ambiguity_notes: out.ambiguity_notes,
        }
        .clamped()
    }
}

/// Reads the user's emotional state from the message alone.
pub struct MoodSensor {
    model: AgentModel,
}

impl MoodSensor {
    pub fn new(model: AgentModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Agent for MoodSensor {
    fn id(&self) -> AgentId {
        AgentId::MoodSensor
    }

    fn model(&self) -> &str {
        &self.model.model
    }

    fn timeout(&self) -> Duration {
        self.model.timeout
    }

    fn fallback(&self, _state: &ConversationState) -> PartialState {
        PartialState {
            user_emotion: Some(EmotionState::neutral()),
            ..PartialState::default()
        }
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: &PipelineContext,
        _span: &mut dyn Span,
    ) -> Result<PartialState, AgentError> {
        let output: MoodOutput = structured_call(
            ctx,
            self.id(),
            &self.model,
            MOOD_SENSOR_PROMPT,
            state.user_message.clone(),
        )
        .await?;

        Ok(PartialState {
            user_emotion: Some(output.into()),
            ..PartialState::default()
        })
    }
}
