//! Shared types and errors for the Foundry agent pipeline.
//!
//! This crate provides the foundational types used across all other Foundry crates:
//! - `FoundryError`: unified error taxonomy with retry classification
//! - `ElementValidationError`: every problem found in one batch of records
//! - `Data`: the result map handlers return and phases accumulate

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type for all Foundry subsystems.
#[derive(Debug, thiserror::Error)]
pub enum FoundryError {
    // === Model Backend Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    // === Agent Errors ===
    #[error("Reply to task '{task}' used undeclared tags {unexpected:?} (declared: {declared:?})")]
    TaskValidation {
        task: String,
        unexpected: Vec<String>,
        declared: Vec<String>,
    },

    #[error(transparent)]
    ElementValidation(#[from] ElementValidationError),

    #[error("No handler registered for tag <{tag}>")]
    UnknownTag { tag: String },

    #[error("Task '{task}' has no input for placeholder '{placeholder}'")]
    TaskRender { task: String, placeholder: String },

    // === Shell Errors ===
    #[error("Shell error: {0}")]
    Shell(String),

    // === Pipeline Errors ===
    #[error("Phase '{phase}' failed: {message}")]
    PhaseError { phase: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FoundryError {
    /// Returns `true` for transport or backend failures talking to a model.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FoundryError::RateLimited { .. }
                | FoundryError::RequestTimeout { .. }
                | FoundryError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is transient and the operation may succeed on retry.
    ///
    /// Network failures are retried, and so are replies that fail tag or record
    /// validation: the next reply from the model may be well formed.
    pub fn is_retryable(&self) -> bool {
        self.is_network()
            || matches!(
                self,
                FoundryError::TaskValidation { .. } | FoundryError::ElementValidation(_)
            )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Short category label used in structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            e if e.is_network() => "network",
            FoundryError::TaskValidation { .. } => "task_validation",
            FoundryError::ElementValidation(_) => "element_validation",
            _ => "fatal",
        }
    }
}

/// A convenience alias for `Result<T, FoundryError>`.
pub type Result<T> = std::result::Result<T, FoundryError>;

// ---------------------------------------------------------------------------
// ElementValidationError: all problems found in one record batch
// ---------------------------------------------------------------------------

/// One problem with one record of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Position of the record within the batch.
    pub index: usize,
    /// Offending field, or `None` when the record itself has the wrong shape.
    pub field: Option<String>,
    pub reason: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "record #{} field '{}': {}", self.index, field, self.reason),
            None => write!(f, "record #{}: {}", self.index, self.reason),
        }
    }
}

/// Raised when at least one record of a batch fails its schema.
///
/// The whole batch is rejected; `issues` lists every problem found, not only
/// the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementValidationError {
    pub tag: String,
    pub issues: Vec<FieldIssue>,
}

impl fmt::Display for ElementValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid <{}> records: ", self.tag)?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ElementValidationError {}

// ---------------------------------------------------------------------------
// Data: result map shared by handlers and phases
// ---------------------------------------------------------------------------

/// Result fragment returned by handlers and accumulated by phases.
pub type Data = HashMap<String, serde_json::Value>;

/// Shallow merge: keys from `incoming` overwrite keys already in `target`.
pub fn merge_data(target: &mut Data, incoming: Data) {
    target.extend(incoming);
}

/// Returns a new map holding `base` overlaid with `overlay`.
pub fn merged(base: Data, overlay: &Data) -> Data {
    let mut out = base;
    out.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn network_errors_are_retryable() {
        let rate = FoundryError::RateLimited {
            provider: "anthropic".into(),
            retry_after_ms: 1000,
        };
        let timeout = FoundryError::RequestTimeout {
            provider: "openai".into(),
            timeout_ms: 600_000,
        };
        let server = FoundryError::ProviderError {
            provider: "ollama".into(),
            status: 503,
            message: "busy".into(),
            retryable: true,
        };
        for e in [&rate, &timeout, &server] {
            assert!(e.is_network());
            assert!(e.is_retryable());
            assert_eq!(e.category(), "network");
        }
    }

    #[test]
    fn validation_errors_are_retryable_but_not_network() {
        let task = FoundryError::TaskValidation {
            task: "generate_code".into(),
            unexpected: vec!["req".into()],
            declared: vec!["file".into(), "cmd".into()],
        };
        let elem = FoundryError::ElementValidation(ElementValidationError {
            tag: "file".into(),
            issues: vec![],
        });
        assert!(task.is_retryable() && !task.is_network());
        assert!(elem.is_retryable() && !elem.is_network());
        assert_eq!(task.category(), "task_validation");
        assert_eq!(elem.category(), "element_validation");
    }

    #[test]
    fn other_errors_are_terminal() {
        let cases = [
            FoundryError::AuthError {
                provider: "anthropic".into(),
            },
            FoundryError::UnknownTag { tag: "zzz".into() },
            FoundryError::TaskRender {
                task: "t".into(),
                placeholder: "specs".into(),
            },
            FoundryError::ProviderError {
                provider: "openai".into(),
                status: 400,
                message: "bad request".into(),
                retryable: false,
            },
            FoundryError::Shell("spawn failed".into()),
            FoundryError::Other("boom".into()),
        ];
        for e in &cases {
            assert!(e.is_terminal(), "{e} should be terminal");
            assert_eq!(e.category(), "fatal");
        }
    }

    #[test]
    fn element_validation_error_lists_every_issue() {
        let err = ElementValidationError {
            tag: "file".into(),
            issues: vec![
                FieldIssue {
                    index: 2,
                    field: Some("file_content".into()),
                    reason: "missing required field".into(),
                },
                FieldIssue {
                    index: 4,
                    field: None,
                    reason: "expected nested tags, found text".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("invalid <file> records: "));
        assert!(msg.contains("record #2 field 'file_content': missing required field"));
        assert!(msg.contains("record #4: expected nested tags, found text"));
    }

    #[test]
    fn task_render_error_names_placeholder() {
        let err = FoundryError::TaskRender {
            task: "generate_requirements".into(),
            placeholder: "specs".into(),
        };
        assert_eq!(
            err.to_string(),
            "Task 'generate_requirements' has no input for placeholder 'specs'"
        );
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut data = Data::new();
        data.insert("specs".into(), json!("build a calculator"));
        data.insert("files".into(), json!([]));

        let mut incoming = Data::new();
        incoming.insert("files".into(), json!([{"file_name": "main.py"}]));
        merge_data(&mut data, incoming);

        assert_eq!(data["specs"], json!("build a calculator"));
        assert_eq!(data["files"][0]["file_name"], "main.py");
    }

    #[test]
    fn merged_prefers_overlay() {
        let mut loaded = Data::new();
        loaded.insert("requirements".into(), json!(["from disk"]));
        loaded.insert("tests".into(), json!(["t1"]));

        let mut current = Data::new();
        current.insert("requirements".into(), json!(["in memory"]));

        let out = merged(loaded, &current);
        assert_eq!(out["requirements"], json!(["in memory"]));
        assert_eq!(out["tests"], json!(["t1"]));
    }
}
