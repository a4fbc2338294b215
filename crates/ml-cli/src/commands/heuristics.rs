use ml_agents::safety_heuristics::run_safety_heuristics;
use ml_core::sanitize::sanitize_user_input;
use serde_json::json;

/// Report what the pre-filters make of `message`, without any model call.
pub fn run(message: &str) -> anyhow::Result<()> {
    let input = sanitize_user_input(message);
    let heuristics = run_safety_heuristics(&input.sanitized);

    let report = json!({
        "escalate": heuristics.should_escalate,
        "signals": heuristics.signals,
        "matched_phrases": heuristics.matched_phrases,
        "sanitized": input.sanitized,
        "injection_patterns": input.detected_patterns,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
