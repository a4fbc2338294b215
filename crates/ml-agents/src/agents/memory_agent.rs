use std::time::Duration;

use async_trait::async_trait;
use ml_core::conversation_cache::ConversationCache;
use ml_core::types::{
    AgentId, ConversationState, EmotionalTrajectory, PartialState, RelationshipStage,
};
use ml_harness::trace::Span;
use serde::Deserialize;
use serde_json::json;

use crate::agent::{structured_call, Agent, AgentError, AgentModel};
use crate::context::PipelineContext;
use crate::prompts::MEMORY_AGENT_PROMPT;

/// Turns of history the memory agent reads by default.
pub const DEFAULT_CONTEXT_TURNS: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryOutput {
    context_summary: String,
    #[serde(default)]
    callback_opportunities: Vec<String>,
    relationship_stage: RelationshipStage,
    #[serde(default)]
    recurring_themes: Vec<String>,
    emotional_trajectory: EmotionalTrajectory,
}

/// Summarizes prior turns of the session. Reads the cache, never writes it.
pub struct MemoryAgent {
    model: AgentModel,
    cache: ConversationCache,
    max_turns: usize,
}

impl MemoryAgent {
    pub fn new(model: AgentModel, cache: ConversationCache) -> Self {
        Self {
            model,
            cache,
            max_turns: DEFAULT_CONTEXT_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

#[async_trait]
impl Agent for MemoryAgent {
    fn id(&self) -> AgentId {
        AgentId::MemoryAgent
    }

    fn model(&self) -> &str {
        &self.model.model
    }

    fn timeout(&self) -> Duration {
        self.model.timeout
    }

    fn fallback(&self, _state: &ConversationState) -> PartialState {
        PartialState {
            context_summary: Some(String::new()),
            callback_opportunities: Some(Vec::new()),
            recurring_themes: Some(Vec::new()),
            emotional_trajectory: Some(EmotionalTrajectory::Stable),
            ..PartialState::default()
        }
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: &PipelineContext,
        span: &mut dyn Span,
    ) -> Result<PartialState, AgentError> {
        let session_context = self
            .cache
            .get_session_context(&state.session_id, self.max_turns)
            .await?;

        let output: MemoryOutput = structured_call(
            ctx,
            self.id(),
            &self.model,
            MEMORY_AGENT_PROMPT,
            format!(
                "Session context: {session_context}\n\nCurrent message: {}",
                state.user_message
            ),
        )
        .await?;

        span.add_event(
            "memory_retrieved",
            json!({
                "themes": output.recurring_themes.len(),
                "trajectory": output.emotional_trajectory,
            }),
        );

        Ok(PartialState {
            context_summary: Some(output.context_summary),
            callback_opportunities: Some(output.callback_opportunities),
            relationship_stage: Some(output.relationship_stage),
            recurring_themes: Some(output.recurring_themes),
            emotional_trajectory: Some(output.emotional_trajectory),
            ..PartialState::default()
        })
    }
}
