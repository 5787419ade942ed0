use async_trait::async_trait;
use serde_json::json;

use foundry_types::FoundryError;

use crate::http::post_json;
use crate::{Completion, CompletionRequest, ModelBackend, Usage};

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

/// Chat Completions client. Also drives self-hosted OpenAI-compatible servers
/// such as vLLM through [`OpenAiAdapter::vllm_from_env`].
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    name: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            name: "openai".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, FoundryError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| FoundryError::AuthError {
            provider: "openai".into(),
        })?;
        Ok(Self::new(key))
    }

    /// vLLM server at `VLLM_BASE_URL` (default `http://localhost:8000/v1`).
    /// `VLLM_API_KEY` is optional.
    pub fn vllm_from_env() -> Self {
        let base = std::env::var("VLLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000/v1".to_string());
        let key = std::env::var("VLLM_API_KEY").unwrap_or_else(|_| "EMPTY".to_string());
        Self::new(key)
            .with_base_url(base)
            .with_name("vllm")
            .with_default_model("Qwen/Qwen2.5-Coder-32B-Instruct")
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Request / response translation
// ---------------------------------------------------------------------------

fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(ref system) = request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    body
}

fn parse_response(provider: &str, body: &serde_json::Value) -> Result<Completion, FoundryError> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| FoundryError::ProviderError {
            provider: provider.into(),
            status: 200,
            message: "Response has no choices[0].message.content".into(),
            retryable: true,
        })?
        .to_string();

    Ok(Completion {
        text,
        model: body["model"].as_str().unwrap_or("").to_string(),
        usage: Usage {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        },
    })
}

// ---------------------------------------------------------------------------
// ModelBackend implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ModelBackend for OpenAiAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FoundryError> {
        let body = build_request_body(request);
        let builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json(&self.name, builder, &body).await?;
        parse_response(&self.name, &json)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
