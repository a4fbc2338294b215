//! Deterministic crisis pre-filter.
//!
//! Most messages are benign, so the safety monitor only pays for a model call
//! when these patterns flag something. The tables deliberately over-match;
//! the model call and its fail-safe fallback sort out false positives.

use std::sync::OnceLock;

use ml_core::types::SignalType;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeuristicResult {
    pub should_escalate: bool,
    pub signals: Vec<SignalType>,
    /// First matched substring per signal, aligned with `signals`.
    pub matched_phrases: Vec<String>,
}

struct SignalPatterns {
    signal: SignalType,
    patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect()
}

fn crisis_patterns() -> &'static [SignalPatterns] {
    static TABLE: OnceLock<Vec<SignalPatterns>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            SignalPatterns {
                signal: SignalType::SuicidalIdeation,
                patterns: compile(&[
                    r"\b(want to die|end (it|my life)|kill myself|suicide|suicidal)\b",
                    r"\b(no (point|reason) (to|in) liv(e|ing))\b",
                    r"\b(better off (dead|without me))\b",
                    r"\b(can'?t (go on|take it|do this) anymore)\b",
                    r"\b(don'?t want to (be here|be alive|exist|live|wake up))\b",
                ]),
            },
            SignalPatterns {
                signal: SignalType::SelfHarm,
                patterns: compile(&[
                    r"\b(cut(ting)? myself|hurt(ing)? myself|self[- ]?harm)\b",
                    r"\b(burn(ing)? myself|scratch(ing)? myself)\b",
                    r"\b(hit(ting)? myself|punch(ing)? myself)\b",
                ]),
            },
            SignalPatterns {
                signal: SignalType::Abuse,
                patterns: compile(&[
                    r"\b((he|she|they|partner|spouse|parent) (hit|hits|beat|beats|hurt|hurts) me)\b",
                    r"\b(being (abused|beaten|hit))\b",
                    r"\b(domestic (violence|abuse))\b",
                    r"\b((physically|sexually|emotionally) (abused|assaulted))\b",
                ]),
            },
            SignalPatterns {
                signal: SignalType::Safety,
                patterns: compile(&[
                    r"\b(not safe|don'?t feel safe|unsafe)\b",
                    r"\b(threatened|threatening me|stalking me|being stalked)\b",
                    r"\b(scared for my life)\b",
                ]),
            },
            SignalPatterns {
                signal: SignalType::Distress,
                patterns: compile(&[
                    r"\b(hopeless|no hope|lost all hope)\b",
                    r"\b(worthless|no one cares|nobody cares)\b",
                    r"\b(can'?t cope|falling apart|breaking down)\b",
                    r"\b(desperate|despair)\b",
                ]),
            },
        ]
    })
}

fn colloquial_overrides() -> &'static [Regex] {
    static OVERRIDES: OnceLock<Vec<Regex>> = OnceLock::new();
    OVERRIDES.get_or_init(|| {
        compile(&[
            r"\b(killing (it|me)|kill(s|ed)? it|so funny|hilarious|dying (of|from) laughter)\b",
            r"\b(to die for|drop[- ]dead gorgeous)\b",
            r"\b(dead tired|dead serious|deadly serious)\b",
            r"\b(bored to death|scared to death|worried to death)\b",
            r"\b(you'?re killing me|that kills|this kills)\b",
        ])
    })
}

/// Classify `message`. A colloquial match wins over every crisis pattern.
pub fn run_safety_heuristics(message: &str) -> HeuristicResult {
    let normalized = message.to_lowercase();

    if colloquial_overrides().iter().any(|re| re.is_match(&normalized)) {
        return HeuristicResult::default();
    }

    let mut result = HeuristicResult::default();
    for group in crisis_patterns() {
        if let Some(found) = group.patterns.iter().find_map(|re| re.find(&normalized)) {
            result.signals.push(group.signal);
            result.matched_phrases.push(found.as_str().to_string());
        }
    }
    result.should_escalate = !result.signals.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        for group in crisis_patterns() {
            assert!(!group.patterns.is_empty());
        }
        assert_eq!(colloquial_overrides().len(), 5);
        let total: usize = crisis_patterns().iter().map(|g| g.patterns.len()).sum();
        assert_eq!(total, 19);
    }

    #[test]
    fn benign_message_is_clear() {
        let result = run_safety_heuristics("Hello, how are you today?");
        assert!(!result.should_escalate);
        assert!(result.signals.is_empty());
        assert!(result.matched_phrases.is_empty());
    }

    #[test]
    fn first_match_per_signal_is_recorded() {
        let result = run_safety_heuristics("I want to die, I'm so hopeless and worthless");
        assert_eq!(
            result.signals,
            vec![SignalType::SuicidalIdeation, SignalType::Distress]
        );
        assert_eq!(result.matched_phrases, vec!["want to die", "hopeless"]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let result = run_safety_heuristics("I Feel HOPELESS");
        assert_eq!(result.signals, vec![SignalType::Distress]);
        assert_eq!(result.matched_phrases, vec!["hopeless"]);
    }
}
