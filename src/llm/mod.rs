//! Chat-completions client used by the LLM judge backend.

pub mod client;

pub use client::{ChatClient, ChatRequest, ChatResponse, LlmProvider, Message, Usage};
