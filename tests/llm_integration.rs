//! Integration tests for the chat-completions client and LLM judge.
//!
//! These tests make real API calls.
//! Run with: JUDGE_API_KEY=your_key cargo test --test llm_integration -- --ignored
//! `JUDGE_API_BASE` and `JUDGE_MODEL` override the endpoint and model.

use std::sync::Arc;
use std::time::Duration;

use variant_forge::llm::{ChatClient, ChatRequest, LlmProvider, Message};
use variant_forge::scorer::rubric::Rubric;
use variant_forge::scorer::{Judge, JudgeRequest, LlmJudge};

fn create_test_client() -> ChatClient {
    let api_key = std::env::var("JUDGE_API_KEY")
        .expect("JUDGE_API_KEY environment variable must be set for integration tests");
    let api_base =
        std::env::var("JUDGE_API_BASE").unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());
    ChatClient::new(api_base, Some(api_key), test_model(), Duration::from_secs(120))
        .expect("client should build")
}

fn test_model() -> String {
    std::env::var("JUDGE_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".into())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_completion() {
    let client = create_test_client();

    let request = ChatRequest::new(
        test_model(),
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.complete(request).await;
    assert!(response.is_ok(), "Completion failed: {:?}", response.err());

    let response = response.expect("Should have response");
    assert!(
        response.content.contains('4'),
        "Response should contain '4', got: {}",
        response.content
    );
    assert!(response.usage.prompt_tokens > 0, "Should have token usage");
}

#[tokio::test]
#[ignore]
async fn test_llm_judge_scores_small_file() {
    let judge = LlmJudge::new(Arc::new(create_test_client()), test_model());
    let request = JudgeRequest {
        rubric: Rubric {
            name: "code-quality".into(),
            content: "Score readability and correctness from 0 to 10.".into(),
        },
        files: vec![(
            "add.py".into(),
            "def add(a: int, b: int) -> int:\n    return a + b\n".into(),
        )],
        max_score: 10.0,
        max_chars_per_file: 5_000,
    };

    let response = judge.judge(&request).await.expect("judge should answer");
    assert!((0.0..=10.0).contains(&response.score));
}
