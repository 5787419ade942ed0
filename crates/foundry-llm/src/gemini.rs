use async_trait::async_trait;
use serde_json::json;

use foundry_types::FoundryError;

use crate::http::post_json;
use crate::{Completion, CompletionRequest, ModelBackend, Usage};

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn from_env() -> Result<Self, FoundryError> {
        let key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| FoundryError::AuthError {
                provider: "gemini".into(),
            })?;
        Ok(Self::new(key))
    }
}

fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let mut body = json!({
        "contents": [
            { "role": "user", "parts": [ { "text": request.prompt } ] }
        ],
    });

    if let Some(ref system) = request.system {
        body["systemInstruction"] = json!({ "parts": [ { "text": system } ] });
    }

    let mut generation = serde_json::Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if let Some(temp) = request.temperature {
        generation.insert("temperature".into(), json!(temp));
    }
    if !generation.is_empty() {
        body["generationConfig"] = serde_json::Value::Object(generation);
    }

    body
}

fn parse_response(model: &str, body: &serde_json::Value) -> Completion {
    let text = body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let meta = &body["usageMetadata"];
    Completion {
        text,
        model: body["modelVersion"].as_str().unwrap_or(model).to_string(),
        usage: Usage {
            input_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0),
            output_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0),
        },
    }
}

#[async_trait]
impl ModelBackend for GeminiAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FoundryError> {
        let body = build_request_body(request);
        let builder = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &self.api_key);
        let json = post_json("gemini", builder, &body).await?;
        Ok(parse_response(&request.model, &json))
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        "gemini-2.5-pro"
    }
}
