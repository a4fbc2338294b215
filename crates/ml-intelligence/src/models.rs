//! Model tiers.
//!
//! Every agent runs on one of three tiers. The concrete model id of each
//! tier comes from [`ModelsConfig`] so deployments can pin snapshots.

use std::fmt;

use ml_core::config::ModelsConfig;
use ml_core::types::AgentId;
use serde::{Deserialize, Serialize};

pub const HAIKU: &str = "claude-haiku-4-5-20241022";
pub const SONNET: &str = "claude-sonnet-4-5-20241022";
pub const OPUS: &str = "claude-opus-4-5-20250101";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheap, low-latency analysis calls.
    Fast,
    /// The user-facing reply.
    Standard,
    /// Replies at crisis severity.
    Crisis,
}

impl ModelTier {
    /// Default tier for an agent outside a crisis.
    pub fn for_agent(agent: AgentId) -> Self {
        match agent {
            AgentId::ResponseGenerator => ModelTier::Standard,
            AgentId::MoodSensor
            | AgentId::MemoryAgent
            | AgentId::SafetyMonitor
            | AgentId::EmotionReasoner => ModelTier::Fast,
        }
    }

    pub fn model_id<'a>(&self, models: &'a ModelsConfig) -> &'a str {
        match self {
            ModelTier::Fast => &models.fast,
            ModelTier::Standard => &models.standard,
            ModelTier::Crisis => &models.crisis,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModelTier::Fast => "fast",
            ModelTier::Standard => "standard",
            ModelTier::Crisis => "crisis",
        };
        f.write_str(label)
    }
}

/// Model id for `agent`, honoring a per-agent override.
pub fn resolve_model(agent: AgentId, override_model: Option<&str>, models: &ModelsConfig) -> String {
    override_model
        .map(str::to_string)
        .unwrap_or_else(|| ModelTier::for_agent(agent).model_id(models).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_agents_use_fast_tier() {
        for agent in [
            AgentId::MoodSensor,
            AgentId::MemoryAgent,
            AgentId::SafetyMonitor,
            AgentId::EmotionReasoner,
        ] {
            assert_eq!(ModelTier::for_agent(agent), ModelTier::Fast);
        }
        assert_eq!(
            ModelTier::for_agent(AgentId::ResponseGenerator),
            ModelTier::Standard
        );
    }

    #[test]
    fn default_config_maps_tiers_to_known_models() {
        let models = ModelsConfig::default();
        assert_eq!(ModelTier::Fast.model_id(&models), HAIKU);
        assert_eq!(ModelTier::Standard.model_id(&models), SONNET);
        assert_eq!(ModelTier::Crisis.model_id(&models), OPUS);
    }

    #[test]
    fn override_wins() {
        let models = ModelsConfig::default();
        assert_eq!(
            resolve_model(AgentId::MoodSensor, Some("custom"), &models),
            "custom"
        );
        assert_eq!(resolve_model(AgentId::MoodSensor, None, &models), HAIKU);
    }
}
