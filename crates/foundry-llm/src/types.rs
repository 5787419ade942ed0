use serde::{Deserialize, Serialize};

use foundry_markup::TagTree;

// ---------------------------------------------------------------------------
// CompletionRequest
// ---------------------------------------------------------------------------

/// A single-turn prompt sent to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Usage / Completion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Backend reply before tag extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A model reply paired with its extracted tag tree.
#[derive(Debug, Clone)]
pub struct Response {
    pub raw_text: String,
    /// `None` when the reply carried no tags at all.
    pub props: Option<TagTree>,
}

impl Response {
    pub fn new(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let props = foundry_markup::extract(&raw_text);
        Self { raw_text, props }
    }

    /// Top-level tag names present in the reply, in first-appearance order.
    pub fn returned_tags(&self) -> Vec<String> {
        self.props
            .as_ref()
            .map(|t| t.tags().map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn is_text_only(&self) -> bool {
        self.props.is_none()
    }
}
