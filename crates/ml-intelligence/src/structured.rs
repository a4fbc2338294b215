//! Structured output: decode a completion into a typed value.
//!
//! Agents ask for a JSON object in their system prompt. Models sometimes wrap
//! it in prose or a code fence, so the first balanced `{...}` is extracted
//! before decoding.

use serde::de::DeserializeOwned;

use crate::llm::LlmError;

/// Slice of `text` holding the first balanced JSON object, if any.
///
/// Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode `text` into `T`.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let json = extract_json_object(text)
        .ok_or_else(|| LlmError::SchemaError("no JSON object in completion".into()))?;
    serde_json::from_str(json).map_err(|e| LlmError::SchemaError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Mood {
        primary: String,
        intensity: f64,
    }

    #[test]
    fn extracts_bare_object() {
        assert_eq!(extract_json_object(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn extracts_from_code_fence_and_prose() {
        let text = "Here you go:\n```json\n{\"a\": {\"b\": 2}}\n```\nThanks";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn ignores_braces_in_strings() {
        let text = r#"{"note": "a } in \"text\" {", "n": 1} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"note": "a } in \"text\" {", "n": 1}"#)
        );
    }

    #[test]
    fn unbalanced_is_none() {
        assert_eq!(extract_json_object("{\"a\": 1"), None);
        assert_eq!(extract_json_object("no json"), None);
    }

    #[test]
    fn schema_mismatch_is_schema_error() {
        let result: Result<Mood, _> = parse_structured(r#"{"primary": 3}"#);
        assert!(matches!(result, Err(LlmError::SchemaError(_))));
    }

    #[test]
    fn decodes_object_wrapped_in_prose() {
        let mood: Mood =
            parse_structured("Sure:\n{\"primary\": \"sadness\", \"intensity\": 0.7}").unwrap();
        assert_eq!(
            mood,
            Mood {
                primary: "sadness".into(),
                intensity: 0.7
            }
        );
    }
}
