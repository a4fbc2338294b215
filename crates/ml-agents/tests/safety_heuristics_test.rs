use ml_agents::safety_heuristics::run_safety_heuristics;
use ml_core::types::SignalType;

fn escalates(message: &str) -> bool {
    run_safety_heuristics(message).should_escalate
}

#[test]
fn suicidal_phrasings_escalate() {
    for message in [
        "I want to die",
        "I don't want to be alive anymore",
        "Everyone would be better off without me",
        "I can't go on anymore",
        "there's no point in living",
    ] {
        let result = run_safety_heuristics(message);
        assert!(result.should_escalate, "expected escalation for {message:?}");
        assert_eq!(result.signals, vec![SignalType::SuicidalIdeation], "{message:?}");
    }
}

#[test]
fn each_category_is_detected() {
    let cases = [
        ("I've been cutting myself again", SignalType::SelfHarm),
        ("my partner hits me when he drinks", SignalType::Abuse),
        ("I don't feel safe at home", SignalType::Safety),
        ("someone has been stalking me", SignalType::Safety),
        ("I feel completely hopeless", SignalType::Distress),
    ];
    for (message, signal) in cases {
        let result = run_safety_heuristics(message);
        assert!(result.should_escalate, "{message:?}");
        assert!(result.signals.contains(&signal), "{message:?} -> {:?}", result.signals);
    }
}

#[test]
fn colloquial_speech_stays_clear() {
    for message in [
        "this joke is killing me",
        "You're killing me with these puns",
        "I'm dead tired after that shift",
        "that cake was to die for",
        "I was bored to death in the meeting",
    ] {
        assert!(!escalates(message), "unexpected escalation for {message:?}");
    }
}

#[test]
fn override_beats_crisis_pattern_in_same_message() {
    // Over-matching the override is accepted: the whole message is cleared.
    let result = run_safety_heuristics("this joke is killing me, I feel hopeless about my puns");
    assert!(!result.should_escalate);
    assert!(result.signals.is_empty());
}

#[test]
fn matching_is_case_insensitive() {
    assert!(escalates("I WANT TO DIE"));
    assert!(!escalates("THIS JOKE IS KILLING ME"));
}

#[test]
fn multiple_categories_are_reported_in_table_order() {
    let result = run_safety_heuristics("I feel hopeless and I keep hurting myself");
    assert_eq!(result.signals, vec![SignalType::SelfHarm, SignalType::Distress]);
    assert_eq!(result.matched_phrases, vec!["hurting myself", "hopeless"]);
}

#[test]
fn everyday_messages_stay_clear() {
    for message in [
        "I'm feeling anxious about my job interview tomorrow",
        "I got the promotion!",
        "Can we talk about my weekend?",
        "",
    ] {
        assert!(!escalates(message), "{message:?}");
    }
}
