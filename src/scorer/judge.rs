//! Judge backends and response parsing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::rubric::Rubric;
use crate::config::{JudgeBackend, JudgeSettings};
use crate::error::{JudgeError, LlmError};
use crate::llm::{ChatClient, ChatRequest, LlmProvider, Message};
use crate::process::run_with_timeout;
use crate::runner::result::truncate;
use crate::runner::TokenUsage;
use crate::utils::extract_json_object;

const JUDGE_SYSTEM_PROMPT: &str = "You are a strict code reviewer. Grade the submission \
against the rubric and answer with a single JSON object only.";

/// Input for one judge call.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub rubric: Rubric,
    /// `(label, content)` pairs, usually relative path and file content.
    pub files: Vec<(String, String)>,
    pub max_score: f64,
    pub max_chars_per_file: usize,
}

impl JudgeRequest {
    /// Renders the prompt sent to the judge.
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "# Rubric: {}\n\n{}\n\n# Files\n",
            self.rubric.name,
            self.rubric.content.trim()
        );
        for (label, content) in &self.files {
            prompt.push_str(&format!(
                "\n## {}\n```\n{}\n```\n",
                label,
                truncate(content, self.max_chars_per_file)
            ));
        }
        prompt.push_str(&format!(
            "\n# Response format\nReturn JSON: {{\"score\": <0-{max}>, \
             \"dimensions\": {{\"<name>\": <0-{max}>}}, \
             \"strengths\": [\"...\"], \"weaknesses\": [\"...\"]}}\n",
            max = self.max_score
        ));
        prompt
    }
}

/// Parsed judge verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeResponse {
    pub score: f64,
    pub dimensions: BTreeMap<String, f64>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub usage: Option<TokenUsage>,
}

/// Anything that can grade files against a rubric.
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeResponse, JudgeError>;
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(o) => o.get("score").and_then(number),
        _ => None,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Parses a judge's text answer into a [`JudgeResponse`].
///
/// Accepts `score` or `overall_score`; scores are clamped to `0..=max_score`.
pub fn parse_response(text: &str, max_score: f64) -> Result<JudgeResponse, JudgeError> {
    let object = extract_json_object(text).map_err(|e| JudgeError::Parse(e.to_string()))?;

    let score = ["score", "overall_score"]
        .iter()
        .find_map(|key| object.get(*key).and_then(number))
        .ok_or_else(|| JudgeError::Parse("response has no numeric score".to_string()))?;

    let clamp = |v: f64| v.clamp(0.0, max_score);
    let dimensions = object
        .get("dimensions")
        .and_then(Value::as_object)
        .map(|dims| {
            dims.iter()
                .filter_map(|(k, v)| number(v).map(|n| (k.clone(), clamp(n))))
                .collect()
        })
        .unwrap_or_default();

    Ok(JudgeResponse {
        score: clamp(score),
        dimensions,
        strengths: strings(object.get("strengths")),
        weaknesses: strings(object.get("weaknesses")),
        usage: None,
    })
}

/// Some CLIs wrap the model's text in a JSON envelope with `result` and `usage`.
fn unwrap_envelope(stdout: &str) -> (String, Option<TokenUsage>) {
    let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(stdout.trim()) else {
        return (stdout.to_string(), None);
    };
    let usage = envelope.get("usage").map(|u| {
        TokenUsage::new(
            u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        )
    });
    match envelope.get("result").and_then(Value::as_str) {
        Some(inner) if !envelope.contains_key("score") => (inner.to_string(), usage),
        _ => (stdout.to_string(), usage),
    }
}

/// Runs an external executable with the prompt on stdin.
pub struct CommandJudge {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandJudge {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Judge for CommandJudge {
    fn name(&self) -> &str {
        &self.program
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeResponse, JudgeError> {
        let prompt = format!("{}\n\n{}", JUDGE_SYSTEM_PROMPT, request.prompt());
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = run_with_timeout(cmd, Some(prompt.as_bytes()), self.timeout)
            .await
            .map_err(|e| JudgeError::Invocation(format!("{}: {}", self.program, e)))?;
        if output.timed_out {
            return Err(JudgeError::Timeout(self.timeout));
        }
        if !output.success() {
            return Err(JudgeError::Invocation(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.exit_code,
                truncate(output.stderr.trim(), 500)
            )));
        }

        let (text, usage) = unwrap_envelope(&output.stdout);
        let mut response = parse_response(&text, request.max_score)?;
        response.usage = usage;
        debug!(rubric = %request.rubric.name, score = response.score, "Command judge answered");
        Ok(response)
    }
}

/// Judges through a chat-completions endpoint.
pub struct LlmJudge {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn name(&self) -> &str {
        &self.model
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeResponse, JudgeError> {
        let chat = ChatRequest::new(
            self.model.clone(),
            vec![
                Message::system(JUDGE_SYSTEM_PROMPT),
                Message::user(request.prompt()),
            ],
        )
        .with_temperature(0.0);

        let reply = self.provider.complete(chat).await?;
        let mut response = parse_response(&reply.content, request.max_score)?;
        response.usage = Some(TokenUsage::new(
            reply.usage.prompt_tokens,
            reply.usage.completion_tokens,
        ));
        Ok(response)
    }
}

/// Builds the configured judge backend.
pub fn build_judge(settings: &JudgeSettings) -> Result<Arc<dyn Judge>, JudgeError> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    match &settings.backend {
        JudgeBackend::Command { program, args } => {
            Ok(Arc::new(CommandJudge::new(program.clone(), args.clone(), timeout)))
        }
        JudgeBackend::Llm {
            api_base,
            model,
            api_key,
        } => {
            if api_key.is_none() && !is_local(api_base) {
                return Err(JudgeError::Llm(LlmError::MissingApiKey));
            }
            let client = ChatClient::new(api_base.clone(), api_key.clone(), model.clone(), timeout)?;
            Ok(Arc::new(LlmJudge::new(Arc::new(client), model.clone())))
        }
    }
}

fn is_local(api_base: &str) -> bool {
    api_base.contains("localhost") || api_base.contains("127.0.0.1")
}
