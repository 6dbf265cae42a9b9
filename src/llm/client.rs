//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier; empty means the client default.
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token counts reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// A completed chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub model: String,
    pub content: String,
    pub usage: Usage,
}

/// Anything that can complete a chat.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Client for `<api_base>/chat/completions`.
pub struct ChatClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl ChatClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Maps a non-success HTTP status and body to an error.
fn api_error(status_code: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.to_string());
    if status_code == 429 {
        LlmError::RateLimited(message)
    } else {
        LlmError::ApiError {
            code: status_code,
            message,
        }
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut request = request;
        if request.model.is_empty() {
            request.model = self.default_model.clone();
        }

        let url = format!("{}/chat/completions", self.api_base);
        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", key));
        }

        let http_response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let body = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(api_error(status.as_u16(), &body));
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::ParseError("response has no choices".to_string()))?;

        Ok(ChatResponse {
            model: api_response.model,
            content,
            usage: api_response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = ChatClient::new(
            "http://localhost:4000/",
            Some("k".to_string()),
            "judge-model",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.api_base, "http://localhost:4000");
        assert_eq!(client.default_model, "judge-model");
    }

    #[test]
    fn test_request_serialization_skips_unset() {
        let request = ChatRequest::new("m", vec![Message::user("hi")]).with_temperature(0.0);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"temperature\":0.0"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_api_error_mapping() {
        let body = r#"{"error":{"message":"slow down"}}"#;
        assert!(matches!(api_error(429, body), LlmError::RateLimited(m) if m == "slow down"));
        assert!(matches!(
            api_error(500, "oops"),
            LlmError::ApiError { code: 500, ref message } if message == "oops"
        ));
    }

    #[tokio::test]
    async fn test_connection_error() {
        let client =
            ChatClient::new("http://127.0.0.1:9", None, "m", Duration::from_secs(2)).unwrap();
        let result = client
            .complete(ChatRequest::new("", vec![Message::user("test")]))
            .await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running chat-completions endpoint"]
    async fn test_live_completion() {
        let client =
            ChatClient::new("http://localhost:4000", None, "gpt-4o-mini", Duration::from_secs(60))
                .unwrap();
        let response = client
            .complete(ChatRequest::new("", vec![Message::user("Reply with OK")]))
            .await
            .unwrap();
        assert!(!response.content.is_empty());
    }
}
