use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::AgentId;

/// Top-level configuration loaded from `~/.mollei/config.toml`.
///
/// **Security**: This struct NEVER stores API keys. Credentials are read at
/// runtime from the environment variable named in [`ProvidersConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

impl Config {
    /// Load config from `~/.mollei/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.circuit_breaker.validate()?;
        self.cache.validate()?;
        for (name, model) in [
            ("models.fast", &self.models.fast),
            ("models.standard", &self.models.standard),
            ("models.crisis", &self.models.crisis),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mollei")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_service_name() -> String {
    "mollei".into()
}
fn default_log_level() -> String {
    "info".into()
}

/// Per-agent execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub timeout_ms: u64,
    pub max_tokens: u32,
    /// Overrides the tier model when set.
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentSettings {
    fn new(timeout_ms: u64, max_tokens: u32) -> Self {
        Self {
            timeout_ms,
            max_tokens,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_mood_sensor")]
    pub mood_sensor: AgentSettings,
    #[serde(default = "default_memory_agent")]
    pub memory_agent: AgentSettings,
    #[serde(default = "default_safety_monitor")]
    pub safety_monitor: AgentSettings,
    #[serde(default = "default_emotion_reasoner")]
    pub emotion_reasoner: AgentSettings,
    #[serde(default = "default_response_generator")]
    pub response_generator: AgentSettings,
    /// Token budget for responses generated on the crisis model.
    #[serde(default = "default_crisis_max_tokens")]
    pub crisis_max_tokens: u32,
    /// How many recent turns the memory agent reads.
    #[serde(default = "default_memory_max_turns")]
    pub memory_max_turns: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mood_sensor: default_mood_sensor(),
            memory_agent: default_memory_agent(),
            safety_monitor: default_safety_monitor(),
            emotion_reasoner: default_emotion_reasoner(),
            response_generator: default_response_generator(),
            crisis_max_tokens: default_crisis_max_tokens(),
            memory_max_turns: default_memory_max_turns(),
        }
    }
}

impl PipelineConfig {
    pub fn agent(&self, id: AgentId) -> &AgentSettings {
        match id {
            AgentId::MoodSensor => &self.mood_sensor,
            AgentId::MemoryAgent => &self.memory_agent,
            AgentId::SafetyMonitor => &self.safety_monitor,
            AgentId::EmotionReasoner => &self.emotion_reasoner,
            AgentId::ResponseGenerator => &self.response_generator,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for id in AgentId::ALL {
            let settings = self.agent(id);
            if settings.timeout_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "pipeline.{id}.timeout_ms must be greater than zero"
                )));
            }
            if settings.max_tokens == 0 {
                return Err(ConfigError::Validation(format!(
                    "pipeline.{id}.max_tokens must be greater than zero"
                )));
            }
        }
        if self.memory_max_turns == 0 {
            return Err(ConfigError::Validation(
                "pipeline.memory_max_turns must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_mood_sensor() -> AgentSettings {
    AgentSettings::new(300, 450)
}
fn default_memory_agent() -> AgentSettings {
    AgentSettings::new(500, 600)
}
fn default_safety_monitor() -> AgentSettings {
    AgentSettings::new(300, 450)
}
fn default_emotion_reasoner() -> AgentSettings {
    AgentSettings::new(500, 550)
}
fn default_response_generator() -> AgentSettings {
    AgentSettings::new(1500, 1000)
}
fn default_crisis_max_tokens() -> u32 {
    2000
}
fn default_memory_max_turns() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl CircuitBreakerSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "circuit_breaker.failure_threshold must be greater than zero".into(),
            ));
        }
        if self.half_open_max_requests == 0 {
            return Err(ConfigError::Validation(
                "circuit_breaker.half_open_max_requests must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_half_open_max_requests() -> u32 {
    2
}

/// Model ids per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Analysis agents.
    #[serde(default = "default_fast_model")]
    pub fast: String,
    /// Response generation.
    #[serde(default = "default_standard_model")]
    pub standard: String,
    /// Crisis responses.
    #[serde(default = "default_crisis_model")]
    pub crisis: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_model(),
            standard: default_standard_model(),
            crisis: default_crisis_model(),
        }
    }
}

fn default_fast_model() -> String {
    "claude-haiku-4-5-20241022".into()
}
fn default_standard_model() -> String {
    "claude-sonnet-4-5-20241022".into()
}
fn default_crisis_model() -> String {
    "claude-opus-4-5-20250101".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Name of the env var holding the Anthropic API key.
    #[serde(default = "default_anthropic_key_env")]
    pub anthropic_key_env: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            anthropic_key_env: default_anthropic_key_env(),
            anthropic_base_url: default_anthropic_base_url(),
        }
    }
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_turns_per_session")]
    pub max_turns_per_session: usize,
    #[serde(default = "default_summary_ttl_secs")]
    pub summary_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_turns_per_session: default_max_turns_per_session(),
            summary_ttl_secs: default_summary_ttl_secs(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns_per_session == 0 {
            return Err(ConfigError::Validation(
                "cache.max_turns_per_session must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_turns_per_session() -> usize {
    50
}
fn default_summary_ttl_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}
