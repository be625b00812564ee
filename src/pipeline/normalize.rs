//! Response normalisation: raw service reply → JSON object.
//!
//! Models are told to return only the JSON object, yet regularly wrap it in a
//! ```` ```json ```` fence anyway. The fence is stripped here, before parsing,
//! so the extraction client only ever sees a clean payload. Nothing else is
//! repaired: a reply that still is not a JSON object is a
//! [`MalformedResponseError`] and fails the page.

use crate::error::MalformedResponseError;
use crate::record::ExtractionResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Opening fence line: three backticks plus an optional language tag.
static RE_OPENING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[^\n]*\n").unwrap());

const FENCE: &str = "```";

/// Parse a raw reply into an extraction result.
pub fn normalize_response(raw: &str) -> Result<ExtractionResult, MalformedResponseError> {
    let payload = strip_fences(&clean_text(raw));
    let payload = payload.trim();

    if payload.is_empty() {
        return Err(MalformedResponseError::new("empty reply", payload));
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(ExtractionResult::from(map)),
        Ok(other) => Err(MalformedResponseError::new(
            format!("expected a JSON object, got {}", json_kind(&other)),
            payload,
        )),
        Err(e) => Err(MalformedResponseError::new(e.to_string(), payload)),
    }
}

/// Trim, drop a leading BOM, and normalise line endings.
fn clean_text(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{FEFF}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Remove the opening fence line, then cut at the last closing fence,
/// dropping whatever trails it. Text without a leading fence is returned
/// unchanged.
fn strip_fences(text: &str) -> String {
    if !text.starts_with(FENCE) {
        return text.to_string();
    }
    let body = RE_OPENING_FENCE.replace(text, "");
    match body.rfind(FENCE) {
        Some(end) => body[..end].to_string(),
        None => body.into_owned(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"first_name": "Maria", "allergies": ["Penicillin"]}"#;

    #[test]
    fn plain_object_parses() {
        let r = normalize_response(PAYLOAD).unwrap();
        assert_eq!(r.fields()["first_name"], "Maria");
    }

    #[test]
    fn fenced_with_language_tag_matches_unwrapped() {
        let fenced = format!("```json\n{PAYLOAD}\n```");
        assert_eq!(
            normalize_response(&fenced).unwrap(),
            normalize_response(PAYLOAD).unwrap()
        );
    }

    #[test]
    fn fenced_without_language_tag() {
        let fenced = format!("```\n{PAYLOAD}\n```\n");
        assert_eq!(
            normalize_response(&fenced).unwrap(),
            normalize_response(PAYLOAD).unwrap()
        );
    }

    #[test]
    fn normalising_twice_is_stable() {
        let fenced = format!("```json\n{PAYLOAD}\n```");
        let once = normalize_response(&fenced).unwrap();
        let again = normalize_response(&serde_json::to_string(&once).unwrap()).unwrap();
        assert_eq!(once, again);
    }

    #[test]
    fn crlf_and_bom_are_tolerated() {
        let fenced = format!("\u{FEFF}```json\r\n{PAYLOAD}\r\n```\r\n");
        assert_eq!(
            normalize_response(&fenced).unwrap(),
            normalize_response(PAYLOAD).unwrap()
        );
    }

    #[test]
    fn trailing_note_after_fence_is_dropped() {
        let reply = "```json\n{\"phone\": \"555\"}\n```\nNote: `phone` was smudged.";
        let r = normalize_response(reply).unwrap();
        assert_eq!(r.fields()["phone"], "555");
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn unterminated_fence_still_strips_opening_line() {
        let fenced = format!("```json\n{PAYLOAD}");
        assert!(normalize_response(&fenced).is_ok());
    }

    #[test]
    fn backticks_inside_values_survive_when_unfenced() {
        let r = normalize_response(r#"{"additional_notes": "wrote ``` on form"}"#).unwrap();
        assert_eq!(r.fields()["additional_notes"], "wrote ``` on form");
    }

    #[test]
    fn prose_is_malformed() {
        let err = normalize_response("I'm sorry, I can't read this form.").unwrap_err();
        assert!(err.excerpt.starts_with("I'm sorry"));
    }

    #[test]
    fn array_is_malformed() {
        let err = normalize_response(r#"[{"first_name": "Maria"}]"#).unwrap_err();
        assert!(err.reason.contains("an array"), "got: {}", err.reason);
    }

    #[test]
    fn empty_reply_is_malformed() {
        assert!(normalize_response("   ").is_err());
        assert!(normalize_response("```json\n```").is_err());
    }
}
