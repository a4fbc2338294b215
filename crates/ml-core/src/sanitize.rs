//! Prompt-injection filtering for inbound user messages.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// Messages longer than this many characters are truncated.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedInput {
    pub sanitized: String,
    pub was_modified: bool,
    pub detected_patterns: Vec<&'static str>,
}

impl SanitizedInput {
    pub fn is_suspicious(&self) -> bool {
        !self.detected_patterns.is_empty()
    }
}

struct InjectionPattern {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

fn injection_patterns() -> &'static [InjectionPattern] {
    static PATTERNS: OnceLock<Vec<InjectionPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                "system_override",
                r"(?i)\b(ignore (all )?(previous|prior|above) (instructions?|prompts?|rules?))\b",
                "[filtered]",
            ),
            (
                "role_injection",
                r"(?i)\b(you are now|act as|pretend (to be|you'?re)|roleplay as)\b",
                "[filtered]",
            ),
            (
                "prompt_leak",
                r"(?i)\b(show (me )?(your|the) (system )?(prompt|instructions?)|what are your instructions)\b",
                "[filtered]",
            ),
            // "DAN" only as an uppercase token so the name Dan passes through.
            (
                "jailbreak_attempt",
                r"\b(DAN|(?i:do anything now|jailbreak|bypass (safety|restrictions|filters)))\b",
                "[filtered]",
            ),
            (
                "delimiter_injection",
                r"(?i)(\[SYSTEM\]|\[/INST\]|<\|im_start\|>|<\|im_end\|>|###\s*(System|User|Assistant):)",
                "",
            ),
            (
                "xml_injection",
                r"(?i)</?(system|assistant|user|prompt|instruction)\b[^>]*>",
                "",
            ),
        ]
        .into_iter()
        .filter_map(|(name, pattern, replacement)| {
            Regex::new(pattern).ok().map(|regex| InjectionPattern {
                name,
                regex,
                replacement,
            })
        })
        .collect()
    })
}

/// Truncate, strip injection markers and control characters, then trim.
pub fn sanitize_user_input(input: &str) -> SanitizedInput {
    let mut detected_patterns = Vec::new();

    let mut sanitized: String = if input.chars().count() > MAX_MESSAGE_CHARS {
        detected_patterns.push("message_truncated");
        input.chars().take(MAX_MESSAGE_CHARS).collect()
    } else {
        input.to_string()
    };

    for pattern in injection_patterns() {
        if pattern.regex.is_match(&sanitized) {
            detected_patterns.push(pattern.name);
            sanitized = pattern
                .regex
                .replace_all(&sanitized, pattern.replacement)
                .into_owned();
        }
    }

    let sanitized: String = sanitized
        .chars()
        .filter(|c| !is_stripped_control(*c))
        .collect::<String>()
        .trim()
        .to_string();

    SanitizedInput {
        was_modified: sanitized != input,
        sanitized,
        detected_patterns,
    }
}

/// Control characters other than tab, newline and carriage return.
fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
}

/// Warn when sanitization found injection markers.
pub fn log_suspicious_input(trace_id: &str, original_len: usize, result: &SanitizedInput) {
    if result.is_suspicious() {
        warn!(
            trace_id,
            patterns = ?result.detected_patterns,
            original_len,
            sanitized_len = result.sanitized.len(),
            "suspicious input detected"
        );
    }
}
