//! Footers appended to a generated reply according to crisis severity.
//!
//! Policy, one footer per band:
//!
//! | severity | footer |
//! |---|---|
//! | 4, 5 | crisis hotlines |
//! | 3 | suggest human support |
//! | 2 | gentle safety check |
//! | 1 | none |

use ml_core::types::CrisisSeverity;

pub const CRISIS_RESOURCES: &str = "\n\n---\n\n\
If you're in crisis, please know you're not alone:\n\
- National Suicide Prevention Lifeline: 988 (US)\n\
- Crisis Text Line: Text HOME to 741741\n\
- International Association for Suicide Prevention: https://www.iasp.info/resources/Crisis_Centres/\n\n\
I'm here with you, and these resources are too.";

pub const SUGGEST_HUMAN: &str = "\n\n---\n\n\
What you're experiencing sounds significant. While I'm here to listen, a counselor or \
therapist can offer the kind of ongoing support that might be really valuable right now. \
Would you like to talk about what finding that kind of support might look like?";

pub const SAFETY_CHECK: &str = "\n\n---\n\n\
I want to make sure I'm being helpful. If you're going through something difficult, \
talking to someone who can really support you, like a counselor, therapist, or trusted \
friend, can make a real difference.";

pub fn append_crisis_resources(response: &str) -> String {
    format!("{response}{CRISIS_RESOURCES}")
}

pub fn append_suggest_human(response: &str) -> String {
    format!("{response}{SUGGEST_HUMAN}")
}

pub fn append_safety_check(response: &str) -> String {
    format!("{response}{SAFETY_CHECK}")
}

pub fn apply_severity_modifier(response: &str, severity: CrisisSeverity) -> String {
    if severity >= CrisisSeverity::CRISIS_SUPPORT {
        append_crisis_resources(response)
    } else if severity == CrisisSeverity::SUGGEST_HUMAN {
        append_suggest_human(response)
    } else if severity == CrisisSeverity::PROCEED_WITH_CARE {
        append_safety_check(response)
    } else {
        response.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_band_gets_its_footer() {
        let base = "I'm here.";
        assert_eq!(apply_severity_modifier(base, CrisisSeverity::PROCEED), base);
        assert!(apply_severity_modifier(base, CrisisSeverity::PROCEED_WITH_CARE)
            .ends_with(SAFETY_CHECK));
        assert!(apply_severity_modifier(base, CrisisSeverity::SUGGEST_HUMAN)
            .ends_with(SUGGEST_HUMAN));
        assert!(apply_severity_modifier(base, CrisisSeverity::CRISIS_SUPPORT)
            .ends_with(CRISIS_RESOURCES));
        assert!(apply_severity_modifier(base, CrisisSeverity::IMMEDIATE_DANGER)
            .ends_with(CRISIS_RESOURCES));
    }

    #[test]
    fn crisis_footer_lists_hotlines() {
        let text = append_crisis_resources("");
        assert!(text.contains("988"));
        assert!(text.contains("741741"));
        assert!(text.contains("iasp.info"));
    }

    #[test]
    fn original_text_is_kept_first() {
        assert!(append_safety_check("Hello").starts_with("Hello\n\n---"));
    }
}
