use ml_agents::state_machine::{PipelineEvent, PipelineStateMachine};
use ml_core::types::PipelinePhase;

#[test]
fn happy_path_idle_to_complete() {
    let mut sm = PipelineStateMachine::new();
    assert_eq!(sm.phase(), PipelinePhase::Idle);

    assert_eq!(sm.transition(PipelineEvent::Start).unwrap(), PipelinePhase::Sensing);
    assert_eq!(sm.transition(PipelineEvent::Reason).unwrap(), PipelinePhase::Reasoning);
    assert_eq!(sm.transition(PipelineEvent::Finish).unwrap(), PipelinePhase::Complete);

    assert!(sm.is_terminal());
    assert_eq!(sm.history().len(), 3);
}

#[test]
fn finish_requires_reasoning() {
    let mut sm = PipelineStateMachine::new();
    sm.transition(PipelineEvent::Start).unwrap();

    let result = sm.transition(PipelineEvent::Finish);
    assert!(result.is_err());
    // Phase is unchanged after a rejected transition.
    assert_eq!(sm.phase(), PipelinePhase::Sensing);
    assert_eq!(sm.history().len(), 1);
}

#[test]
fn abort_completes_from_either_active_phase() {
    let mut sensing = PipelineStateMachine::new();
    sensing.transition(PipelineEvent::Start).unwrap();
    assert_eq!(sensing.transition(PipelineEvent::Abort).unwrap(), PipelinePhase::Complete);

    let mut reasoning = PipelineStateMachine::new();
    reasoning.transition(PipelineEvent::Start).unwrap();
    reasoning.transition(PipelineEvent::Reason).unwrap();
    assert_eq!(reasoning.transition(PipelineEvent::Abort).unwrap(), PipelinePhase::Complete);
}

#[test]
fn fail_moves_to_error() {
    let mut sm = PipelineStateMachine::new();
    sm.transition(PipelineEvent::Start).unwrap();
    sm.transition(PipelineEvent::Reason).unwrap();
    assert_eq!(sm.transition(PipelineEvent::Fail).unwrap(), PipelinePhase::Error);
    assert!(sm.is_terminal());
}

#[test]
fn terminal_phases_accept_nothing() {
    let mut sm = PipelineStateMachine::new();
    sm.transition(PipelineEvent::Start).unwrap();
    sm.transition(PipelineEvent::Reason).unwrap();
    sm.transition(PipelineEvent::Finish).unwrap();

    for event in [
        PipelineEvent::Start,
        PipelineEvent::Reason,
        PipelineEvent::Finish,
        PipelineEvent::Abort,
        PipelineEvent::Fail,
    ] {
        assert!(!sm.can_transition(event), "complete accepted {event}");
    }
}

#[test]
fn idle_only_starts() {
    let sm = PipelineStateMachine::new();
    assert!(sm.can_transition(PipelineEvent::Start));
    assert!(!sm.can_transition(PipelineEvent::Abort));
    assert!(!sm.can_transition(PipelineEvent::Fail));
}

#[test]
fn error_message_names_phase_and_event() {
    let mut sm = PipelineStateMachine::new();
    let err = sm.transition(PipelineEvent::Reason).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("reason"));
    assert!(msg.contains("idle"));
}
