use std::fmt;

use ml_core::types::PipelinePhase;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Parallel group launched.
    Start,
    /// Parallel results merged; sequential group begins.
    Reason,
    /// Sequential group ran to the end.
    Finish,
    /// Caller aborted; remaining stages skipped.
    Abort,
    /// A stage escaped its wrapper.
    Fail,
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineEvent::Start => "start",
            PipelineEvent::Reason => "reason",
            PipelineEvent::Finish => "finish",
            PipelineEvent::Abort => "abort",
            PipelineEvent::Fail => "fail",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid transition: cannot apply {event} in phase {phase}")]
    InvalidTransition {
        phase: PipelinePhase,
        event: PipelineEvent,
    },
}

// ---------------------------------------------------------------------------
// PipelineStateMachine
// ---------------------------------------------------------------------------

/// Phase tracking for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStateMachine {
    current: PipelinePhase,
    history: Vec<(PipelinePhase, PipelineEvent, PipelinePhase)>,
}

impl PipelineStateMachine {
    /// Create a new state machine starting in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> PipelinePhase {
        self.current
    }

    pub fn history(&self) -> &[(PipelinePhase, PipelineEvent, PipelinePhase)] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.current, PipelinePhase::Complete | PipelinePhase::Error)
    }

    /// Valid transitions:
    /// - Idle      + Start  -> Sensing
    /// - Sensing   + Reason -> Reasoning
    /// - Reasoning + Finish -> Complete
    /// - Sensing   + Abort  -> Complete
    /// - Reasoning + Abort  -> Complete
    /// - Sensing   + Fail   -> Error
    /// - Reasoning + Fail   -> Error
    pub fn transition(&mut self, event: PipelineEvent) -> Result<PipelinePhase, StateMachineError> {
        let next = Self::target(self.current, event).ok_or(StateMachineError::InvalidTransition {
            phase: self.current,
            event,
        })?;

        let from = self.current;
        self.current = next;
        self.history.push((from, event, next));
        tracing::debug!(from = %from, event = %event, to = %next, "pipeline phase transition");
        Ok(next)
    }

    pub fn can_transition(&self, event: PipelineEvent) -> bool {
        Self::target(self.current, event).is_some()
    }

    fn target(phase: PipelinePhase, event: PipelineEvent) -> Option<PipelinePhase> {
        match (phase, event) {
            (PipelinePhase::Idle, PipelineEvent::Start) => Some(PipelinePhase::Sensing),
            (PipelinePhase::Sensing, PipelineEvent::Reason) => Some(PipelinePhase::Reasoning),
            (PipelinePhase::Reasoning, PipelineEvent::Finish) => Some(PipelinePhase::Complete),
            (PipelinePhase::Sensing | PipelinePhase::Reasoning, PipelineEvent::Abort) => {
                Some(PipelinePhase::Complete)
            }
            (PipelinePhase::Sensing | PipelinePhase::Reasoning, PipelineEvent::Fail) => {
                Some(PipelinePhase::Error)
            }
            _ => None,
        }
    }
}
