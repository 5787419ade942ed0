use async_trait::async_trait;
use serde_json::json;

use foundry_types::FoundryError;

use crate::http::post_json;
use crate::{Completion, CompletionRequest, ModelBackend, Usage};

// ---------------------------------------------------------------------------
// OllamaAdapter
// ---------------------------------------------------------------------------

/// Local Ollama server via `/api/chat`. No credentials.
#[derive(Debug)]
pub struct OllamaAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Server at `OLLAMA_HOST`, defaulting to `http://localhost:11434`.
    pub fn from_env() -> Self {
        let host =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost:11434".to_string());
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("http://{host}")
        };
        Self::new(host)
    }
}

fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(ref system) = request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
    });

    let mut options = serde_json::Map::new();
    if let Some(temp) = request.temperature {
        options.insert("temperature".into(), json!(temp));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".into(), json!(max_tokens));
    }
    if !options.is_empty() {
        body["options"] = serde_json::Value::Object(options);
    }

    body
}

fn parse_response(body: &serde_json::Value) -> Completion {
    Completion {
        text: body["message"]["content"].as_str().unwrap_or("").to_string(),
        model: body["model"].as_str().unwrap_or("").to_string(),
        usage: Usage {
            input_tokens: body["prompt_eval_count"].as_u64().unwrap_or(0),
            output_tokens: body["eval_count"].as_u64().unwrap_or(0),
        },
    }
}

#[async_trait]
impl ModelBackend for OllamaAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FoundryError> {
        let body = build_request_body(request);
        let builder = self.client.post(format!("{}/api/chat", self.base_url));
        let json = post_json("ollama", builder, &body).await?;
        Ok(parse_response(&json))
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        "qwen2.5-coder:32b"
    }
}
