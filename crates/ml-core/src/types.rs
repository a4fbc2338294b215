use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key under which the orchestrator records whole-pipeline latency.
pub const TOTAL_LATENCY_KEY: &str = "total";

// ---------------------------------------------------------------------------
// AgentId
// ---------------------------------------------------------------------------

/// Identity of one pipeline stage. Used as the key in `latency_ms`, as the
/// circuit-breaker registry key and as the span name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    MoodSensor,
    MemoryAgent,
    SafetyMonitor,
    EmotionReasoner,
    ResponseGenerator,
}

impl AgentId {
    pub const ALL: [AgentId; 5] = [
        AgentId::MoodSensor,
        AgentId::MemoryAgent,
        AgentId::SafetyMonitor,
        AgentId::EmotionReasoner,
        AgentId::ResponseGenerator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::MoodSensor => "mood_sensor",
            AgentId::MemoryAgent => "memory_agent",
            AgentId::SafetyMonitor => "safety_monitor",
            AgentId::EmotionReasoner => "emotion_reasoner",
            AgentId::ResponseGenerator => "response_generator",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CrisisSeverity
// ---------------------------------------------------------------------------

/// Errors raised when constructing a [`CrisisSeverity`] from a raw integer.
#[derive(Debug, thiserror::Error)]
pub enum SeverityError {
    #[error("crisis severity must be within 1..=5, got {0}")]
    OutOfRange(i64),
}

/// Ordinal 1..=5 risk scale. Construction always validates the range, so a
/// value of this type is never out of bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct CrisisSeverity(u8);

impl CrisisSeverity {
    pub const PROCEED: Self = Self(1);
    pub const PROCEED_WITH_CARE: Self = Self(2);
    pub const SUGGEST_HUMAN: Self = Self(3);
    pub const CRISIS_SUPPORT: Self = Self(4);
    pub const IMMEDIATE_DANGER: Self = Self(5);

    pub fn new(value: i64) -> Result<Self, SeverityError> {
        if (1..=5).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(SeverityError::OutOfRange(value))
        }
    }

    /// Clamp an arbitrary integer into range.
    pub fn saturating(value: i64) -> Self {
        Self(value.clamp(1, 5) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "proceed",
            2 => "proceed_with_care",
            3 => "suggest_human",
            4 => "crisis_support",
            _ => "immediate_danger",
        }
    }
}

impl Default for CrisisSeverity {
    fn default() -> Self {
        Self::PROCEED
    }
}

impl TryFrom<i64> for CrisisSeverity {
    type Error = SeverityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CrisisSeverity> for u8 {
    fn from(s: CrisisSeverity) -> Self {
        s.0
    }
}

impl fmt::Display for CrisisSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    SuicidalIdeation,
    SelfHarm,
    Abuse,
    Safety,
    Distress,
    None,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::SuicidalIdeation => "suicidal_ideation",
            SignalType::SelfHarm => "self_harm",
            SignalType::Abuse => "abuse",
            SignalType::Safety => "safety",
            SignalType::Distress => "distress",
            SignalType::None => "none",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the response generator should shape its reply given the safety
/// assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseModifier {
    None,
    IncludeSafetyCheck,
    WarmValidationFirst,
    GentleResources,
    SuggestProfessional,
    CrisisResources,
}

impl ResponseModifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseModifier::None => "none",
            ResponseModifier::IncludeSafetyCheck => "include_safety_check",
            ResponseModifier::WarmValidationFirst => "warm_validation_first",
            ResponseModifier::GentleResources => "gentle_resources",
            ResponseModifier::SuggestProfessional => "suggest_professional",
            ResponseModifier::CrisisResources => "crisis_resources",
        }
    }
}

impl fmt::Display for ResponseModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    Validate,
    Support,
    Explore,
    CrisisSupport,
}

impl Approach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Approach::Validate => "validate",
            Approach::Support => "support",
            Approach::Explore => "explore",
            Approach::CrisisSupport => "crisis_support",
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStage {
    New,
    Building,
    Established,
}

impl fmt::Display for RelationshipStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RelationshipStage::New => "new",
            RelationshipStage::Building => "building",
            RelationshipStage::Established => "established",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTrajectory {
    Improving,
    Stable,
    Declining,
}

impl fmt::Display for EmotionalTrajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EmotionalTrajectory::Improving => "improving",
            EmotionalTrajectory::Stable => "stable",
            EmotionalTrajectory::Declining => "declining",
        };
        f.write_str(label)
    }
}

/// Coarse progress of one pipeline run, mirrored to the streaming channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    #[default]
    Idle,
    Sensing,
    Reasoning,
    Complete,
    Error,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Idle => "idle",
            PipelinePhase::Sensing => "sensing",
            PipelinePhase::Reasoning => "reasoning",
            PipelinePhase::Complete => "complete",
            PipelinePhase::Error => "error",
        }
    }

    /// User-facing progress text for phases that are announced on the stream.
    pub fn progress_message(&self) -> Option<&'static str> {
        match self {
            PipelinePhase::Sensing => Some("Understanding how you feel..."),
            PipelinePhase::Reasoning => Some("Thinking about how to respond..."),
            PipelinePhase::Error => Some("Something went wrong"),
            PipelinePhase::Idle | PipelinePhase::Complete => None,
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EmotionState
// ---------------------------------------------------------------------------

/// An emotion reading, either detected in the user or intended for Mollei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionState {
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
    /// 0.0..=1.0
    pub intensity: f64,
    /// -1.0..=1.0
    pub valence: f64,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub ambiguity_notes: Option<String>,
}

impl EmotionState {
    pub fn new(primary: impl Into<String>, intensity: f64, valence: f64) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
            intensity,
            valence,
            signals: Vec::new(),
            ambiguity_notes: None,
        }
        .clamped()
    }

    /// Reading used when no emotion could be detected.
    pub fn neutral() -> Self {
        Self::new("neutral", 0.5, 0.0)
    }

    /// Force intensity and valence back into their declared bounds.
    pub fn clamped(mut self) -> Self {
        self.intensity = clamp_unit(self.intensity, 0.0);
        self.valence = if self.valence.is_nan() {
            0.0
        } else {
            self.valence.clamp(-1.0, 1.0)
        };
        self
    }
}

/// Clamp into 0.0..=1.0, mapping NaN to `fallback`.
pub fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// PartialState
// ---------------------------------------------------------------------------

/// The sparse set of fields one agent contributes to the conversation state.
///
/// `None` means "not contributed"; overlaying a partial never clears a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_emotion: Option<EmotionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mollei_emotion: Option<EmotionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_trajectory: Option<EmotionalTrajectory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_stage: Option<RelationshipStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_opportunities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_themes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crisis_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crisis_severity: Option<CrisisSeverity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crisis_signal_type: Option<SignalType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crisis_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_response_modifier: Option<ResponseModifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<Approach>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default)]
    pub latency_ms: BTreeMap<String, u64>,
    #[serde(default)]
    pub agent_errors: Vec<String>,
}

impl PartialState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the partial contributes nothing at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_latency(mut self, agent: AgentId, elapsed_ms: u64) -> Self {
        self.latency_ms.insert(agent.as_str().to_string(), elapsed_ms);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.agent_errors.push(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

/// The single record threaded through one pipeline run.
///
/// Created once per request with only the identifying fields populated, then
/// enriched by overlaying each agent's [`PartialState`]. Overlaying consumes
/// the previous state and returns the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub user_id: String,
    pub trace_id: String,
    pub turn_number: u32,
    pub user_message: String,

    pub user_emotion: Option<EmotionState>,
    pub mollei_emotion: Option<EmotionState>,
    pub context_summary: Option<String>,
    pub emotional_trajectory: Option<EmotionalTrajectory>,
    pub relationship_stage: Option<RelationshipStage>,
    pub callback_opportunities: Option<Vec<String>>,
    pub recurring_themes: Option<Vec<String>>,

    pub crisis_detected: Option<bool>,
    pub crisis_severity: Option<CrisisSeverity>,
    pub crisis_signal_type: Option<SignalType>,
    pub crisis_confidence: Option<f64>,
    pub suggested_response_modifier: Option<ResponseModifier>,

    pub presence_quality: Option<String>,
    pub approach: Option<Approach>,

    pub response: Option<String>,
    pub model_used: Option<String>,
    pub phase: PipelinePhase,

    pub latency_ms: BTreeMap<String, u64>,
    pub agent_errors: Vec<String>,
}

impl ConversationState {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        trace_id: impl Into<String>,
        turn_number: u32,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            trace_id: trace_id.into(),
            turn_number,
            user_message: user_message.into(),
            user_emotion: None,
            mollei_emotion: None,
            context_summary: None,
            emotional_trajectory: None,
            relationship_stage: None,
            callback_opportunities: None,
            recurring_themes: None,
            crisis_detected: None,
            crisis_severity: None,
            crisis_signal_type: None,
            crisis_confidence: None,
            suggested_response_modifier: None,
            presence_quality: None,
            approach: None,
            response: None,
            model_used: None,
            phase: PipelinePhase::Idle,
            latency_ms: BTreeMap::new(),
            agent_errors: Vec::new(),
        }
    }

    /// Overlay a partial result: contributed scalar fields replace the current
    /// value, `latency_ms` is key-unioned and `agent_errors` is appended.
    pub fn overlay(mut self, partial: PartialState) -> Self {
        let PartialState {
            user_emotion,
            mollei_emotion,
            context_summary,
            emotional_trajectory,
            relationship_stage,
            callback_opportunities,
            recurring_themes,
            crisis_detected,
            crisis_severity,
            crisis_signal_type,
            crisis_confidence,
            suggested_response_modifier,
            presence_quality,
            approach,
            response,
            model_used,
            latency_ms,
            agent_errors,
        } = partial;

        replace_if_some(&mut self.user_emotion, user_emotion);
        replace_if_some(&mut self.mollei_emotion, mollei_emotion);
        replace_if_some(&mut self.context_summary, context_summary);
        replace_if_some(&mut self.emotional_trajectory, emotional_trajectory);
        replace_if_some(&mut self.relationship_stage, relationship_stage);
        replace_if_some(&mut self.callback_opportunities, callback_opportunities);
        replace_if_some(&mut self.recurring_themes, recurring_themes);
        replace_if_some(&mut self.crisis_detected, crisis_detected);
        replace_if_some(&mut self.crisis_severity, crisis_severity);
        replace_if_some(&mut self.crisis_signal_type, crisis_signal_type);
        replace_if_some(&mut self.crisis_confidence, crisis_confidence);
        replace_if_some(
            &mut self.suggested_response_modifier,
            suggested_response_modifier,
        );
        replace_if_some(&mut self.presence_quality, presence_quality);
        replace_if_some(&mut self.approach, approach);
        replace_if_some(&mut self.response, response);
        replace_if_some(&mut self.model_used, model_used);

        self.latency_ms.extend(latency_ms);
        self.agent_errors.extend(agent_errors);
        self
    }

    pub fn is_crisis(&self) -> bool {
        self.crisis_detected.unwrap_or(false)
    }

    /// Severity, treating "not assessed" as proceed.
    pub fn severity(&self) -> CrisisSeverity {
        self.crisis_severity.unwrap_or_default()
    }
}

fn replace_if_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
