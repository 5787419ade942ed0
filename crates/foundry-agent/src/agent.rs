//! The agent: a model bound to a role, executing tasks with retries.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use foundry_llm::{Model, Response};
use foundry_tools::{truncate_output, EnvironmentInfo, TruncationMode};
use foundry_types::{merge_data, Data, FoundryError, Result};

use crate::events::{AgentEvent, EventEmitter};
use crate::handler::HandlerRegistry;
use crate::retry::BackoffPolicy;
use crate::task::Task;

/// Attempts per task unless the caller says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Characters of prompt and reply kept in per-attempt log entries.
const LOG_EXCERPT_CHARS: usize = 2_000;

/// What a successful task produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Merged result fragments of every handler that ran.
    Data(Data),
    /// The raw reply, when it carried no tags.
    Text(String),
}

impl TaskOutput {
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            TaskOutput::Data(d) => Some(d),
            TaskOutput::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TaskOutput::Text(t) => Some(t),
            TaskOutput::Data(_) => None,
        }
    }

    pub fn into_data(self) -> Data {
        match self {
            TaskOutput::Data(d) => d,
            TaskOutput::Text(_) => Data::new(),
        }
    }
}

pub struct Agent {
    model: Model,
    role: String,
    system_prompt: String,
    handlers: Arc<HandlerRegistry>,
    environment: Option<EnvironmentInfo>,
    emitter: Option<EventEmitter>,
    backoff: BackoffPolicy,
    current_task: Mutex<Option<String>>,
    /// Reserved for multi-turn use; not sent to the model.
    conversation: Vec<Value>,
}

impl Agent {
    /// Bind `model` to `role`. The model's system prompt is replaced with
    /// `system_prompt`.
    pub fn new(
        mut model: Model,
        role: impl Into<String>,
        system_prompt: impl Into<String>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let system_prompt = system_prompt.into();
        model.set_system_prompt(system_prompt.clone());
        Self {
            model,
            role: role.into(),
            system_prompt,
            handlers,
            environment: None,
            emitter: None,
            backoff: BackoffPolicy::default(),
            current_task: Mutex::new(None),
            conversation: Vec::new(),
        }
    }

    /// Prefix every prompt with this environment summary.
    pub fn with_environment(mut self, env: EnvironmentInfo) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn conversation(&self) -> &[Value] {
        &self.conversation
    }

    /// Name of the task most recently started by this agent.
    pub fn current_task(&self) -> Option<String> {
        self.current_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run `task` with `inputs`, retrying up to `max_attempts` times.
    ///
    /// Network failures and replies that fail tag or record validation are
    /// retried; any other error is returned at once. `Ok(None)` means every
    /// attempt failed with a retryable error.
    pub async fn perform_task(
        &self,
        task: &Task,
        inputs: &Data,
        max_attempts: usize,
    ) -> Result<Option<TaskOutput>> {
        *self.current_task.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(task.name().to_string());

        let mut prompt = self
            .environment
            .as_ref()
            .map(EnvironmentInfo::summary)
            .unwrap_or_default();
        prompt.push_str(&task.prompt(inputs)?);

        self.emit(AgentEvent::TaskStarted {
            role: self.role.clone(),
            task: task.name().to_string(),
        });

        for attempt in 1..=max_attempts {
            match self.attempt(task, &prompt, attempt).await {
                Ok((output, tags)) => {
                    tracing::info!(role = %self.role, task = %task.name(), attempt, "Task completed");
                    self.emit(AgentEvent::TaskCompleted {
                        role: self.role.clone(),
                        task: task.name().to_string(),
                        attempts: attempt,
                        tags,
                    });
                    return Ok(Some(output));
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        role = %self.role,
                        task = %task.name(),
                        attempt,
                        max_attempts,
                        category = e.category(),
                        error = %e,
                        "Task attempt failed, retrying"
                    );
                    self.emit(AgentEvent::TaskRetrying {
                        role: self.role.clone(),
                        task: task.name().to_string(),
                        attempt,
                        category: e.category().to_string(),
                        error: e.to_string(),
                    });
                    if attempt < max_attempts {
                        let delay = self.backoff.delay_after(attempt - 1, &e);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(role = %self.role, task = %task.name(), attempt, error = %e, "Task failed");
                    return Err(e);
                }
            }
        }

        tracing::error!(role = %self.role, task = %task.name(), max_attempts, "Task attempts exhausted");
        self.emit(AgentEvent::TaskExhausted {
            role: self.role.clone(),
            task: task.name().to_string(),
            attempts: max_attempts,
        });
        Ok(None)
    }

    async fn attempt(
        &self,
        task: &Task,
        prompt: &str,
        attempt: usize,
    ) -> Result<(TaskOutput, Vec<String>)> {
        let response = self.model.prompt(prompt).await?;
        tracing::debug!(
            role = %self.role,
            task = %task.name(),
            model = %self.model.name(),
            attempt,
            prompt = %truncate_output(prompt, LOG_EXCERPT_CHARS, TruncationMode::HeadTail),
            response = %truncate_output(&response.raw_text, LOG_EXCERPT_CHARS, TruncationMode::HeadTail),
            "Model interaction"
        );
        self.process_response(task, response).await
    }

    async fn process_response(
        &self,
        task: &Task,
        response: Response,
    ) -> Result<(TaskOutput, Vec<String>)> {
        let Some(props) = response.props else {
            return Ok((TaskOutput::Text(response.raw_text), Vec::new()));
        };

        let unexpected: Vec<String> = props
            .tags()
            .filter(|t| !task.expects(t))
            .map(String::from)
            .collect();
        if !unexpected.is_empty() {
            return Err(FoundryError::TaskValidation {
                task: task.name().to_string(),
                unexpected,
                declared: task.expected_tags().into_iter().map(String::from).collect(),
            });
        }

        // Every batch is checked before any handler runs.
        let mut plan = Vec::with_capacity(props.len());
        for (tag, raw) in props.iter() {
            if let Some(handler) = self.handlers.resolve(tag)? {
                handler.validate(raw)?;
                plan.push((tag, handler, raw));
            }
        }
        if plan.is_empty() {
            return Ok((TaskOutput::Text(response.raw_text), Vec::new()));
        }

        let mut data = Data::new();
        let mut tags = Vec::with_capacity(plan.len());
        for (tag, handler, raw) in plan {
            merge_data(&mut data, handler.process(raw).await?);
            tags.push(tag.to_string());
        }
        Ok((TaskOutput::Data(data), tags))
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event);
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("model", &self.model)
            .finish()
    }
}
