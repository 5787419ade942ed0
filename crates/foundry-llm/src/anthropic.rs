use async_trait::async_trait;
use serde_json::json;

use foundry_types::FoundryError;

use crate::http::post_json;
use crate::{Completion, CompletionRequest, ModelBackend, Usage};

// ---------------------------------------------------------------------------
// AnthropicAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn from_env() -> Result<Self, FoundryError> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| FoundryError::AuthError {
            provider: "anthropic".into(),
        })?;
        Ok(Self::new(key))
    }
}

// ---------------------------------------------------------------------------
// Request / response translation
// ---------------------------------------------------------------------------

fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(8192),
        "messages": [
            { "role": "user", "content": request.prompt }
        ],
    });

    if let Some(ref system) = request.system {
        body["system"] = json!(system);
    }

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    body
}

fn parse_response(body: &serde_json::Value) -> Completion {
    let text = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    Completion {
        text,
        model: body["model"].as_str().unwrap_or("").to_string(),
        usage: Usage {
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        },
    }
}

// ---------------------------------------------------------------------------
// ModelBackend implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ModelBackend for AnthropicAdapter {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, FoundryError> {
        let body = build_request_body(request);
        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");
        let json = post_json("anthropic", builder, &body).await?;
        Ok(parse_response(&json))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        "claude-sonnet-4-5-20250929"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_places_system_prompt_at_top_level() {
        let req = CompletionRequest::new("claude-sonnet-4-5-20250929", "Write code")
            .with_system("You are a developer.");
        let body = build_request_body(&req);

        assert_eq!(body["system"], "You are a developer.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Write code");
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn body_omits_unset_options() {
        let body = build_request_body(&CompletionRequest::new("m", "p"));
        assert!(body.get("system").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parse_joins_text_blocks_and_reads_usage() {
        let body = json!({
            "model": "claude-sonnet-4-5-20250929",
            "content": [
                { "type": "text", "text": "<req>" },
                { "type": "thinking", "thinking": "hmm" },
                { "type": "text", "text": "1</req>" }
            ],
            "usage": { "input_tokens": 12, "output_tokens": 34 }
        });
        let c = parse_response(&body);
        assert_eq!(c.text, "<req>1</req>");
        assert_eq!(c.usage.input_tokens, 12);
        assert_eq!(c.usage.output_tokens, 34);
        assert_eq!(c.model, "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn parse_tolerates_missing_content() {
        let c = parse_response(&json!({}));
        assert_eq!(c.text, "");
        assert_eq!(c.usage, Usage::default());
    }
}
