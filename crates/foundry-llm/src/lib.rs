//! Prompt-in, text-out model client for Foundry agents.
//!
//! Provides the `ModelBackend` trait, the `DynBackend` wrapper, middleware,
//! provider adapters (Anthropic, OpenAI and OpenAI-compatible vLLM, Gemini,
//! Ollama) and `Model`, which binds a backend to a model id, a system prompt
//! and a request timeout.

mod anthropic;
mod backend;
mod client;
mod gemini;
mod http;
mod ollama;
mod openai;
mod types;

pub use anthropic::AnthropicAdapter;
pub use backend::*;
pub use client::*;
pub use gemini::GeminiAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use types::*;
