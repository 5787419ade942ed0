//! Phase state machine.
//!
//! A phase wraps a [`PhaseBehavior`] (run, validate, load) and tracks when it
//! last ran and whether its artifacts passed validation afterwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foundry_types::{Data, Result};

// ---------------------------------------------------------------------------
// PhaseBehavior trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PhaseBehavior: Send + Sync {
    fn title(&self) -> &str;

    fn description(&self) -> &str;

    /// Do the phase's work, returning the updated pipeline data.
    async fn run(&self, data: Data) -> Result<Data>;

    /// Whether the phase's artifacts are present. Reads disk only.
    fn validate(&self) -> bool;

    /// Rebuild the phase's contribution to pipeline data from its artifacts.
    /// `None` when the phase has nothing to load.
    async fn load(&self, _data: &Data) -> Result<Option<Data>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    NotStarted,
    Running,
    Validated,
    FailedValidation,
}

pub struct Phase {
    behavior: Box<dyn PhaseBehavior>,
    state: PhaseState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    data: Data,
}

impl Phase {
    pub fn new(behavior: impl PhaseBehavior + 'static) -> Self {
        Self {
            behavior: Box::new(behavior),
            state: PhaseState::NotStarted,
            started_at: None,
            ended_at: None,
            data: Data::new(),
        }
    }

    pub fn title(&self) -> &str {
        self.behavior.title()
    }

    pub fn description(&self) -> &str {
        self.behavior.description()
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Data produced by the last `run` or `load`.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Evaluate the completion check against what is on disk now.
    pub fn is_complete(&self) -> bool {
        self.behavior.validate()
    }

    /// Run the phase unconditionally, then re-check completion.
    pub async fn run(&mut self, data: Data) -> Result<Data> {
        self.state = PhaseState::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        tracing::info!(phase = %self.title(), "Phase started");

        let result = self.behavior.run(data).await;
        let validated = result.is_ok() && self.behavior.validate();
        self.ended_at = Some(Utc::now());
        self.state = if validated {
            PhaseState::Validated
        } else {
            PhaseState::FailedValidation
        };

        let duration_ms = self.duration().map(|d| d.num_milliseconds()).unwrap_or(0);
        match result {
            Ok(out) => {
                tracing::info!(phase = %self.title(), validated, duration_ms, "Phase finished");
                self.data = out.clone();
                Ok(out)
            }
            Err(e) => {
                tracing::error!(phase = %self.title(), error = %e, duration_ms, "Phase failed");
                Err(e)
            }
        }
    }

    /// Reconstruct state from artifacts instead of running.
    pub async fn load(&mut self, data: &Data) -> Result<Option<Data>> {
        let loaded = self.behavior.load(data).await?;
        if let Some(loaded) = &loaded {
            self.data = loaded.clone();
        }
        if self.behavior.validate() {
            self.state = PhaseState::Validated;
        }
        tracing::info!(phase = %self.title(), keys = loaded.as_ref().map(Data::len).unwrap_or(0), "Phase data loaded");
        Ok(loaded)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("title", &self.title())
            .field("state", &self.state)
            .field("started_at", &self.started_at)
            .field("ended_at", &self.ended_at)
            .finish()
    }
}

/// Fetch a key a phase needs from pipeline data, naming the phase that
/// should have produced it when missing.
pub(crate) fn required<'a>(
    data: &'a Data,
    key: &str,
    phase: &str,
    producer: &str,
) -> Result<&'a serde_json::Value> {
    data.get(key)
        .ok_or_else(|| foundry_types::FoundryError::PhaseError {
            phase: phase.to_string(),
            message: format!("'{key}' is missing from pipeline data; run the {producer} phase first"),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
