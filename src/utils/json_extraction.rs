//! JSON extraction from judge responses.
//!
//! Judges are asked for a JSON object but often wrap it in markdown fences
//! or surround it with prose. Strategies, tried in order:
//! 1. A ```json fenced block
//! 2. A generic ``` fenced block
//! 3. The whole trimmed content when it starts with '{'
//! 4. The last balanced object in the content
//! 5. The first balanced object in the content

use serde_json::Value;
use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated ({unclosed} unclosed braces)")]
    Truncated { unclosed: usize },
    #[error("No JSON object found in response. Content starts with: '{preview}'")]
    NotFound { preview: String },
}

/// Extracts the JSON object a judge returned.
pub fn extract_json_object(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    let fenced = [fenced_block(trimmed, "```json"), fenced_block(trimmed, "```")];
    for candidate in fenced.into_iter().flatten() {
        if let Some(value) = parse_object(&candidate) {
            return Ok(value);
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            if let Some(value) = parse_object(&trimmed[..=end]) {
                return Ok(value);
            }
        }
    }

    if let Some(value) = last_balanced_object(trimmed) {
        return Ok(value);
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = find_matching_brace(&trimmed[start..]) {
            if let Some(value) = parse_object(&trimmed[start..=start + end]) {
                return Ok(value);
            }
        }
        let unclosed = unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            return Err(JsonExtractionError::Truncated { unclosed });
        }
    }

    Err(JsonExtractionError::NotFound {
        preview: trimmed.chars().take(50).collect(),
    })
}

fn parse_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// Content of the first block opened by `fence` and closed by ```.
fn fenced_block(content: &str, fence: &str) -> Option<String> {
    let start = content.find(fence)? + fence.len();
    let rest = &content[start..];
    // Skip the remainder of the opening line (language tag).
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// Index of the brace closing the object that starts at `s[0]`.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

/// Reasoning-style judges think out loud before answering, so the final
/// object is usually the one we want.
fn last_balanced_object(content: &str) -> Option<Value> {
    let starts: Vec<usize> = content.match_indices('{').map(|(i, _)| i).collect();
    for &start in starts.iter().rev() {
        if let Some(end) = find_matching_brace(&content[start..]) {
            if let Some(value) = parse_object(&content[start..=start + end]) {
                // Prefer outermost objects: skip ones nested in a later match.
                let enclosing = starts
                    .iter()
                    .filter(|&&s| s < start)
                    .any(|&s| {
                        find_matching_brace(&content[s..])
                            .map(|e| s + e > start + end && parse_object(&content[s..=s + e]).is_some())
                            .unwrap_or(false)
                    });
                if !enclosing {
                    return Some(value);
                }
            }
        }
    }
    None
}
