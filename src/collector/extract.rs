//! Typed field extraction from agent output.
//!
//! Agent CLIs emit newline-delimited JSON events whose shape varies by tool
//! and version. Instead of probing arbitrary keys, each value of interest has
//! a fixed, ordered list of [`FieldPath`]s; the first path that resolves on an
//! event wins.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::runner::TokenUsage;

/// A dotted path into a JSON object, e.g. `tool_input.file_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath(&'static [&'static str]);

impl FieldPath {
    pub const fn new(segments: &'static [&'static str]) -> Self {
        Self(segments)
    }

    /// Resolves the path against `value`.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(value, |current, segment| current.get(*segment))
    }

    /// Resolves the path to a non-empty string.
    pub fn resolve_str<'a>(&self, value: &'a Value) -> Option<&'a str> {
        self.resolve(value)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Resolves the path to an unsigned integer.
    pub fn resolve_u64(&self, value: &Value) -> Option<u64> {
        self.resolve(value).and_then(Value::as_u64)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Where tool events carry the file they operate on.
pub const FILE_PATH_STRATEGIES: &[FieldPath] = &[
    FieldPath::new(&["tool_input", "file_path"]),
    FieldPath::new(&["input", "file_path"]),
    FieldPath::new(&["input", "path"]),
    FieldPath::new(&["params", "path"]),
    FieldPath::new(&["file_path"]),
    FieldPath::new(&["path"]),
];

/// Where agents report their generated session id.
pub const SESSION_ID_STRATEGIES: &[FieldPath] = &[
    FieldPath::new(&["session_id"]),
    FieldPath::new(&["sessionId"]),
    FieldPath::new(&["session", "id"]),
];

/// Pairs of (input, output) token counters.
const USAGE_STRATEGIES: &[(FieldPath, FieldPath)] = &[
    (
        FieldPath::new(&["usage", "input_tokens"]),
        FieldPath::new(&["usage", "output_tokens"]),
    ),
    (
        FieldPath::new(&["message", "usage", "input_tokens"]),
        FieldPath::new(&["message", "usage", "output_tokens"]),
    ),
];

/// Applies `strategies` in order and returns the first string match.
pub fn first_match<'a>(value: &'a Value, strategies: &[FieldPath]) -> Option<&'a str> {
    strategies.iter().find_map(|path| path.resolve_str(value))
}

/// Parses each line of a log as JSON, skipping lines that are not objects.
fn json_events(log: &str) -> impl Iterator<Item = Value> + '_ {
    log.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
}

/// Tool events may be nested inside `message.content[]`.
fn candidate_objects(event: &Value) -> Vec<&Value> {
    let mut out = vec![event];
    if let Some(items) = event
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    {
        out.extend(items.iter().filter(|i| i.is_object()));
    }
    out
}

/// Files the agent touched, as reported by its tool events. Sorted and deduplicated.
pub fn extract_file_paths(log: &str) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for event in json_events(log) {
        for object in candidate_objects(&event) {
            if let Some(path) = first_match(object, FILE_PATH_STRATEGIES) {
                paths.insert(path.to_string());
            }
        }
    }
    paths.into_iter().collect()
}

/// Session id reported by the agent in its output.
///
/// JSON events are checked first; plain-text output falls back to a
/// `session id: <id>` style pattern.
pub fn extract_session_id(output: &str) -> Option<String> {
    for event in json_events(output) {
        if let Some(id) = first_match(&event, SESSION_ID_STRATEGIES) {
            return Some(id.to_string());
        }
    }

    let re = Regex::new(r#"(?i)session[_ -]?id["':= ]+([A-Za-z0-9_-]+)"#).ok()?;
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn usage_of(event: &Value) -> Option<TokenUsage> {
    USAGE_STRATEGIES.iter().find_map(|(input, output)| {
        let i = input.resolve_u64(event);
        let o = output.resolve_u64(event);
        (i.is_some() || o.is_some()).then(|| TokenUsage::new(i.unwrap_or(0), o.unwrap_or(0)))
    })
}

/// Token usage reported by the agent.
///
/// A final `result` event carries cumulative usage and is preferred;
/// otherwise per-message usage is summed.
pub fn extract_token_usage(log: &str) -> Option<TokenUsage> {
    let mut summed = TokenUsage::default();
    let mut final_usage = None;

    for event in json_events(log) {
        let Some(usage) = usage_of(&event) else {
            continue;
        };
        if event.get("type").and_then(Value::as_str) == Some("result") {
            final_usage = Some(usage);
        } else {
            summed.add(usage);
        }
    }

    final_usage.or((!summed.is_empty()).then_some(summed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_priority() {
        let event = json!({"tool_input": {"file_path": "a.py"}, "path": "b.py"});
        assert_eq!(first_match(&event, FILE_PATH_STRATEGIES), Some("a.py"));

        let event = json!({"path": "b.py"});
        assert_eq!(first_match(&event, FILE_PATH_STRATEGIES), Some("b.py"));

        let event = json!({"input": {"file_path": ""}, "params": {"path": "c.py"}});
        assert_eq!(first_match(&event, FILE_PATH_STRATEGIES), Some("c.py"));
    }

    #[test]
    fn test_extract_file_paths_from_log() {
        let log = [
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","input":{"file_path":"src/app.py"}}]}}"#,
            "plain text line",
            r#"{"type":"tool","tool_input":{"file_path":"tests/test_app.py"}}"#,
            r#"{"type":"tool","tool_input":{"file_path":"src/app.py"}}"#,
            "{not json",
        ]
        .join("\n");
        assert_eq!(
            extract_file_paths(&log),
            vec!["src/app.py".to_string(), "tests/test_app.py".to_string()]
        );
    }

    #[test]
    fn test_extract_session_id_json_then_text() {
        let out = "{\"type\":\"system\",\"session\":{\"id\":\"remote-42\"}}\n";
        assert_eq!(extract_session_id(out).as_deref(), Some("remote-42"));

        let out = "Started. Session ID: abc_123-x\nworking...";
        assert_eq!(extract_session_id(out).as_deref(), Some("abc_123-x"));

        assert_eq!(extract_session_id("nothing here"), None);
    }

    #[test]
    fn test_token_usage_prefers_result_event() {
        let log = [
            r#"{"type":"assistant","message":{"usage":{"input_tokens":10,"output_tokens":5}}}"#,
            r#"{"type":"assistant","message":{"usage":{"input_tokens":20,"output_tokens":7}}}"#,
        ]
        .join("\n");
        assert_eq!(extract_token_usage(&log), Some(TokenUsage::new(30, 12)));

        let with_result = format!(
            "{}\n{}",
            log, r#"{"type":"result","usage":{"input_tokens":100,"output_tokens":40}}"#
        );
        assert_eq!(extract_token_usage(&with_result), Some(TokenUsage::new(100, 40)));
        assert_eq!(extract_token_usage("no json"), None);
    }

    #[test]
    fn test_field_path_display() {
        assert_eq!(FILE_PATH_STRATEGIES[0].to_string(), "tool_input.file_path");
    }
}
