//! Stateless classification of raw AI CLI output lines into structured
//! [`ParsedLine`] values.
//!
//! The parser never raises: malformed JSON, or a recognisable-but-unknown
//! `type` field, both fall through to [`LogType::Raw`] with the original
//! line preserved as `fallback_message`.

use serde_json::Value;

use taskforge_db::models::LogType;

/// The result of classifying one raw line of AI CLI output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub log_type: LogType,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub parsed_content: Option<Value>,
    pub is_error: bool,
    pub duration_ms: Option<i64>,
    pub num_turns: Option<i64>,
    pub fallback_message: Option<String>,
}

impl ParsedLine {
    fn raw(line: &str) -> Self {
        Self {
            log_type: LogType::Raw,
            tool_name: None,
            tool_use_id: None,
            parsed_content: None,
            is_error: false,
            duration_ms: None,
            num_turns: None,
            fallback_message: Some(line.to_string()),
        }
    }
}

/// Classify one line of stdout/stderr from an AI CLI invocation.
pub fn parse_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::raw(line);
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return ParsedLine::raw(line);
    };

    let Some(type_str) = value.get("type").and_then(Value::as_str) else {
        return ParsedLine::raw(line);
    };

    let log_type = match type_str {
        "user" => LogType::User,
        "assistant" => LogType::Assistant,
        "tool_use" => LogType::ToolUse,
        "tool_result" => LogType::ToolResult,
        "result" => LogType::Result,
        "system" => LogType::System,
        _ => return ParsedLine::raw(line),
    };

    let tool_name = extract_tool_name(&value);
    let tool_use_id = value
        .get("tool_use_id")
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let duration_ms = value
        .get("duration_ms")
        .or_else(|| value.get("duration_api_ms"))
        .and_then(Value::as_i64);
    let num_turns = value.get("num_turns").and_then(Value::as_i64);

    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || value.get("error").is_some();

    ParsedLine {
        log_type,
        tool_name,
        tool_use_id,
        parsed_content: Some(value),
        is_error,
        duration_ms,
        num_turns,
        fallback_message: None,
    }
}

fn extract_tool_name(value: &Value) -> Option<String> {
    if let Some(name) = value.get("name").or_else(|| value.get("tool")).and_then(Value::as_str) {
        return Some(name.to_string());
    }

    // Assistant messages carry tool_use blocks nested under message.content.
    let content = value.get("message").and_then(|m| m.get("content"))?.as_array()?;
    content
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .and_then(|block| block.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_assistant_line() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#;
        let parsed = parse_line(line);
        assert_eq!(parsed.log_type, LogType::Assistant);
        assert!(!parsed.is_error);
        assert!(parsed.fallback_message.is_none());
    }

    #[test]
    fn classifies_tool_use_with_name() {
        let line = r#"{"type":"tool_use","name":"Bash","input":{"command":"ls"}}"#;
        let parsed = parse_line(line);
        assert_eq!(parsed.log_type, LogType::ToolUse);
        assert_eq!(parsed.tool_name.as_deref(), Some("Bash"));
    }

    #[test]
    fn classifies_nested_tool_use_in_assistant_message() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{}}]}}"#;
        let parsed = parse_line(line);
        assert_eq!(parsed.log_type, LogType::Assistant);
        assert_eq!(parsed.tool_name.as_deref(), Some("Read"));
    }

    #[test]
    fn classifies_result_with_duration_and_turns() {
        let line = r#"{"type":"result","duration_ms":1234,"num_turns":3,"result":"done"}"#;
        let parsed = parse_line(line);
        assert_eq!(parsed.log_type, LogType::Result);
        assert_eq!(parsed.duration_ms, Some(1234));
        assert_eq!(parsed.num_turns, Some(3));
    }

    #[test]
    fn marks_error_from_explicit_field() {
        let line = r#"{"type":"tool_result","name":"Bash","is_error":true,"output":"failed"}"#;
        let parsed = parse_line(line);
        assert!(parsed.is_error);
    }

    #[test]
    fn marks_error_from_error_payload() {
        let line = r#"{"type":"system","error":{"message":"boom"}}"#;
        let parsed = parse_line(line);
        assert!(parsed.is_error);
    }

    #[test]
    fn falls_back_on_malformed_json() {
        let parsed = parse_line("not json at all {{{");
        assert_eq!(parsed.log_type, LogType::Raw);
        assert_eq!(parsed.fallback_message.as_deref(), Some("not json at all {{{"));
    }

    #[test]
    fn falls_back_on_unknown_type() {
        let parsed = parse_line(r#"{"type":"heartbeat"}"#);
        assert_eq!(parsed.log_type, LogType::Raw);
    }

    #[test]
    fn falls_back_on_empty_line() {
        let parsed = parse_line("");
        assert_eq!(parsed.log_type, LogType::Raw);
    }

    #[test]
    fn never_panics_on_arbitrary_input() {
        let inputs = [
            "{}",
            "[1,2,3]",
            "null",
            "\"just a string\"",
            "{\"type\":123}",
        ];
        for input in inputs {
            let _ = parse_line(input);
        }
    }
}
