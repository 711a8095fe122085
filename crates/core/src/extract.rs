//! Text extraction across the response envelopes the hosted API produces.
//!
//! Each extractor looks at one shape and returns `None` when the shape does
//! not match. Chains are tried in order and the first non-empty text wins.

use serde_json::Value;

/// Pulls text out of one response shape.
pub type Extractor = fn(&Value) -> Option<String>;

/// Extractors for incremental frames of a streamed response.
pub const DELTA_EXTRACTORS: &[Extractor] = &[delta_field, choice_delta, text_field, content_field];

/// Extractors for a complete, non-streamed response envelope.
pub const ENVELOPE_EXTRACTORS: &[Extractor] = &[
    output_array,
    wrapped_output_array,
    choice_message,
    output_text_field,
    text_field,
    content_field,
];

/// Runs `chain` against `value` and returns the first non-empty result.
pub fn first_match(chain: &[Extractor], value: &Value) -> Option<String> {
    chain
        .iter()
        .filter_map(|extract| extract(value))
        .find(|text| !text.is_empty())
}

pub fn delta_text(value: &Value) -> Option<String> {
    first_match(DELTA_EXTRACTORS, value)
}

pub fn envelope_text(value: &Value) -> Option<String> {
    first_match(ENVELOPE_EXTRACTORS, value)
}

/// Whether a streamed frame recaps text already delivered as deltas.
pub fn is_terminal_summary(value: &Value) -> bool {
    value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with(".done") || kind.ends_with(".completed"))
}

fn string_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn delta_field(value: &Value) -> Option<String> {
    string_at(value, "delta").map(str::to_string)
}

fn text_field(value: &Value) -> Option<String> {
    string_at(value, "text").map(str::to_string)
}

fn content_field(value: &Value) -> Option<String> {
    string_at(value, "content").map(str::to_string)
}

fn output_text_field(value: &Value) -> Option<String> {
    string_at(value, "output_text").map(str::to_string)
}

fn choice_delta(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn choice_message(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Joins the text parts of every message item in an `output` array.
fn collect_output(output: &Value) -> Option<String> {
    let items = output.as_array()?;
    let text: String = items
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| {
            matches!(
                part.get("type").and_then(Value::as_str),
                None | Some("output_text") | Some("text")
            )
        })
        .filter_map(|part| string_at(part, "text"))
        .collect();
    Some(text)
}

fn output_array(value: &Value) -> Option<String> {
    value.get("output").and_then(collect_output)
}

fn wrapped_output_array(value: &Value) -> Option<String> {
    value
        .get("response")
        .and_then(|response| response.get("output"))
        .and_then(collect_output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_output_array() {
        let value = json!({
            "output": [
                {"type": "web_search_call", "status": "completed"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Sunny, "},
                    {"type": "output_text", "text": "22C"}
                ]}
            ]
        });
        assert_eq!(envelope_text(&value).as_deref(), Some("Sunny, 22C"));
    }

    #[test]
    fn test_wrapped_output_array() {
        let value = json!({
            "response": {"output": [{"content": [{"type": "output_text", "text": "wrapped"}]}]}
        });
        assert_eq!(envelope_text(&value).as_deref(), Some("wrapped"));
    }

    #[test]
    fn test_chat_completion_choices() {
        let value = json!({"choices": [{"message": {"role": "assistant", "content": "from choices"}}]});
        assert_eq!(envelope_text(&value).as_deref(), Some("from choices"));

        let chunk = json!({"choices": [{"delta": {"content": "chunk"}}]});
        assert_eq!(delta_text(&chunk).as_deref(), Some("chunk"));
    }

    #[test]
    fn test_bare_fields() {
        assert_eq!(envelope_text(&json!({"text": "bare"})).as_deref(), Some("bare"));
        assert_eq!(envelope_text(&json!({"content": "c"})).as_deref(), Some("c"));
        assert_eq!(
            envelope_text(&json!({"output_text": "convenience"})).as_deref(),
            Some("convenience")
        );
    }

    #[test]
    fn test_priority_skips_empty_results() {
        // An empty output array must not shadow a later shape.
        let value = json!({"output": [], "text": "fallback"});
        assert_eq!(envelope_text(&value).as_deref(), Some("fallback"));

        let value = json!({"output": [{"content": [{"type": "output_text", "text": "first"}]}], "text": "second"});
        assert_eq!(envelope_text(&value).as_deref(), Some("first"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(envelope_text(&json!({"status": "ok"})), None);
        assert_eq!(delta_text(&json!({"type": "status", "message": "Searching"})), None);
        assert_eq!(delta_text(&json!({"content": 42})), None);
    }

    #[test]
    fn test_terminal_summary_detection() {
        assert!(is_terminal_summary(&json!({"type": "response.output_text.done"})));
        assert!(is_terminal_summary(&json!({"type": "response.completed"})));
        assert!(!is_terminal_summary(&json!({"type": "response.output_text.delta"})));
        assert!(!is_terminal_summary(&json!({"delta": "x"})));
    }
}
