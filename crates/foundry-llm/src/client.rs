use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use foundry_types::{FoundryError, Result};

use crate::{
    AnthropicAdapter, Completion, CompletionRequest, DynBackend, GeminiAdapter, ModelBackend,
    OllamaAdapter, OpenAiAdapter, Response,
};

/// Default bound on one backend round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut CompletionRequest) {}
    fn after(&self, _request: &CompletionRequest, _completion: &mut Completion) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

/// Records every model interaction: sizes at info, full text at debug.
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut CompletionRequest) {
        tracing::info!(
            model = %request.model,
            prompt_chars = request.prompt.len(),
            "Model request"
        );
        tracing::debug!(model = %request.model, prompt = %request.prompt, "Model prompt");
    }

    fn after(&self, _request: &CompletionRequest, completion: &mut Completion) {
        tracing::info!(
            model = %completion.model,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Model response"
        );
        tracing::debug!(model = %completion.model, response = %completion.text, "Model reply");
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTracker
// ---------------------------------------------------------------------------

/// Accumulates token usage across every model that shares it.
///
/// Clones share the same counters, so one tracker can be attached to each
/// agent's model and read once at the end of a run.
#[derive(Clone, Default)]
pub struct UsageTracker {
    input: Arc<AtomicU64>,
    output: Arc<AtomicU64>,
    requests: Arc<AtomicU64>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Cost estimate given per-million-token prices.
    pub fn estimated_cost(&self, input_per_mtok: f64, output_per_mtok: f64) -> f64 {
        (self.total_input_tokens() as f64 * input_per_mtok
            + self.total_output_tokens() as f64 * output_per_mtok)
            / 1_000_000.0
    }
}

impl Middleware for UsageTracker {
    fn after(&self, _request: &CompletionRequest, completion: &mut Completion) {
        self.input
            .fetch_add(completion.usage.input_tokens, Ordering::Relaxed);
        self.output
            .fetch_add(completion.usage.output_tokens, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A backend bound to one model id and system prompt.
///
/// `prompt` sends one turn and returns the raw reply with its extracted tag
/// tree. Every call is bounded by `request_timeout`.
#[derive(Clone)]
pub struct Model {
    backend: DynBackend,
    model: String,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    request_timeout: Duration,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Model {
    pub fn new(backend: impl ModelBackend + 'static) -> Self {
        Self::from_backend(DynBackend::new(backend))
    }

    pub fn from_backend(backend: DynBackend) -> Self {
        let model = backend.default_model().to_string();
        Self {
            backend,
            model,
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            middleware: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(m));
        self
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = Some(prompt.into());
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Model id sent to the backend.
    pub fn name(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &str {
        self.backend.name()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn prompt(&self, text: &str) -> Result<Response> {
        let mut request = CompletionRequest {
            model: self.model.clone(),
            system: self.system_prompt.clone(),
            prompt: text.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        for m in &self.middleware {
            m.before(&mut request);
        }

        let mut completion =
            match tokio::time::timeout(self.request_timeout, self.backend.complete(&request)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(FoundryError::RequestTimeout {
                        provider: self.backend.name().to_string(),
                        timeout_ms: self.request_timeout.as_millis() as u64,
                    })
                }
            };

        for m in &self.middleware {
            m.after(&request, &mut completion);
        }

        Ok(Response::new(completion.text))
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("provider", &self.backend.name())
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Construction from a model spec string
// ---------------------------------------------------------------------------

/// Guess the provider for a bare model id.
pub fn provider_for_model(model: &str) -> Option<&'static str> {
    let m = model.to_lowercase();
    if m.starts_with("claude") {
        Some("anthropic")
    } else if m.starts_with("gpt") || m.starts_with("o1") || m.starts_with("o3") {
        Some("openai")
    } else if m.starts_with("gemini") {
        Some("gemini")
    } else {
        None
    }
}

/// Split `provider:model` into its parts. A bare id goes through
/// [`provider_for_model`]. Only the first `:` separates, so Ollama tags such
/// as `ollama:qwen2.5-coder:32b` keep theirs.
pub fn parse_model_spec(spec: &str) -> Result<(String, Option<String>)> {
    let spec = spec.trim();
    if let Some((provider, model)) = spec.split_once(':') {
        let provider = provider.to_lowercase();
        if matches!(
            provider.as_str(),
            "anthropic" | "openai" | "gemini" | "ollama" | "vllm"
        ) {
            let model = (!model.is_empty()).then(|| model.to_string());
            return Ok((provider, model));
        }
    }
    match provider_for_model(spec) {
        Some(p) => Ok((p.to_string(), Some(spec.to_string()))),
        None => Err(FoundryError::Config(format!(
            "Cannot determine provider for model '{spec}'; use provider:model"
        ))),
    }
}

/// Build a [`Model`] from a `provider:model` spec and credentials in the
/// environment. Provider names: anthropic, openai, gemini, ollama, vllm.
pub fn model_from_env(spec: &str) -> Result<Model> {
    let (provider, model) = parse_model_spec(spec)?;
    let backend = match provider.as_str() {
        "anthropic" => DynBackend::new(AnthropicAdapter::from_env()?),
        "openai" => DynBackend::new(OpenAiAdapter::from_env()?),
        "gemini" => DynBackend::new(GeminiAdapter::from_env()?),
        "ollama" => DynBackend::new(OllamaAdapter::from_env()),
        "vllm" => DynBackend::new(OpenAiAdapter::vllm_from_env()),
        other => {
            return Err(FoundryError::Config(format!("Unknown provider '{other}'")));
        }
    };
    let mut m = Model::from_backend(backend);
    if let Some(model) = model {
        m = m.with_model(model);
    }
    Ok(m)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Usage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedBackend {
        reply: String,
        delay: Duration,
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    impl ScriptedBackend {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                delay: Duration::ZERO,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            self.seen.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Completion {
                text: self.reply.clone(),
                model: request.model.clone(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }
    }

    #[tokio::test]
    async fn prompt_sends_system_prompt_and_extracts_props() {
        let backend = ScriptedBackend::new("<req><requirement_id>1</requirement_id></req>");
        let seen = backend.seen.clone();
        let mut model = Model::new(backend);
        model.set_system_prompt("You are a Product Owner.");

        let resp = model.prompt("list requirements").await.unwrap();
        assert_eq!(resp.returned_tags(), vec!["req"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system.as_deref(), Some("You are a Product Owner."));
        assert_eq!(seen[0].model, "scripted-1");
        assert_eq!(seen[0].prompt, "list requirements");
    }

    #[tokio::test]
    async fn prompt_times_out_as_retryable_network_error() {
        let mut backend = ScriptedBackend::new("late");
        backend.delay = Duration::from_secs(5);
        let model = Model::new(backend).with_timeout(Duration::from_millis(50));

        let err = model.prompt("hi").await.unwrap_err();
        assert!(matches!(
            err,
            FoundryError::RequestTimeout {
                timeout_ms: 50,
                ..
            }
        ));
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn usage_tracker_accumulates_across_clones() {
        let tracker = UsageTracker::new();
        let model = Model::new(ScriptedBackend::new("ok")).with_middleware(tracker.clone());
        let other = model.clone();

        model.prompt("a").await.unwrap();
        other.prompt("b").await.unwrap();

        assert_eq!(tracker.request_count(), 2);
        assert_eq!(tracker.total_input_tokens(), 20);
        assert_eq!(tracker.total_output_tokens(), 10);
        let cost = tracker.estimated_cost(3.0, 15.0);
        assert!((cost - (20.0 * 3.0 + 10.0 * 15.0) / 1_000_000.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn middleware_can_rewrite_request() {
        struct Upper;
        impl Middleware for Upper {
            fn before(&self, request: &mut CompletionRequest) {
                request.prompt = request.prompt.to_uppercase();
            }
        }

        let backend = ScriptedBackend::new("ok");
        let seen = backend.seen.clone();
        let model = Model::new(backend).with_middleware(Upper);
        model.prompt("quiet").await.unwrap();
        assert_eq!(seen.lock().unwrap()[0].prompt, "QUIET");
    }

    #[test]
    fn model_spec_with_explicit_provider() {
        assert_eq!(
            parse_model_spec("anthropic:claude-opus-4").unwrap(),
            ("anthropic".to_string(), Some("claude-opus-4".to_string()))
        );
        assert_eq!(
            parse_model_spec("ollama:qwen2.5-coder:32b").unwrap(),
            ("ollama".to_string(), Some("qwen2.5-coder:32b".to_string()))
        );
        assert_eq!(
            parse_model_spec("vllm:").unwrap(),
            ("vllm".to_string(), None)
        );
    }

    #[test]
    fn model_spec_infers_provider_from_bare_id() {
        assert_eq!(parse_model_spec("gpt-4o").unwrap().0, "openai");
        assert_eq!(parse_model_spec("claude-sonnet-4-5").unwrap().0, "anthropic");
        assert_eq!(parse_model_spec("gemini-2.5-pro").unwrap().0, "gemini");
        assert!(parse_model_spec("mystery-model").is_err());
    }

    #[test]
    fn model_from_env_builds_keyless_backends() {
        let m = model_from_env("ollama:llama3").unwrap();
        assert_eq!(m.provider(), "ollama");
        assert_eq!(m.name(), "llama3");
        assert_eq!(m.request_timeout(), DEFAULT_REQUEST_TIMEOUT);

        let v = model_from_env("vllm").unwrap_err();
        assert!(matches!(v, FoundryError::Config(_)));
    }
}
