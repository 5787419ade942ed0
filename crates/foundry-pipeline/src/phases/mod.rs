//! The three concrete phases and the context they share.

mod development;
mod planning;
mod testing;

pub use development::{normalize_code, segments_reassemble, DevelopmentPhase};
pub use planning::PlanningPhase;
pub use testing::TestingPhase;

use std::sync::Arc;

use foundry_agent::{Agent, CommandHandler, Task, TaskOutput};
use foundry_types::{Data, FoundryError, Result};

use crate::catalog::{Agents, TaskCatalog};
use crate::workspace::Workspace;

/// Everything a phase needs to do its work.
#[derive(Clone)]
pub struct PhaseContext {
    pub workspace: Arc<Workspace>,
    pub agents: Agents,
    pub tasks: Arc<TaskCatalog>,
    /// Runs commands the phases issue themselves, such as the test script.
    pub commands: Arc<CommandHandler>,
}

impl PhaseContext {
    fn max_attempts(&self) -> usize {
        self.workspace.config().max_attempts
    }

    /// Perform a task the phase cannot continue without. Exhausted attempts
    /// become a [`FoundryError::PhaseError`].
    async fn perform(
        &self,
        phase: &str,
        agent: &Agent,
        task: &Task,
        inputs: &Data,
    ) -> Result<TaskOutput> {
        agent
            .perform_task(task, inputs, self.max_attempts())
            .await?
            .ok_or_else(|| FoundryError::PhaseError {
                phase: phase.to_string(),
                message: format!(
                    "task '{}' failed after {} attempts",
                    task.name(),
                    self.max_attempts()
                ),
            })
    }
}

/// The user's specs, present from the start of every run.
fn specs(data: &Data, phase: &str) -> Result<serde_json::Value> {
    data.get("specs").cloned().ok_or_else(|| FoundryError::PhaseError {
        phase: phase.to_string(),
        message: "no user specs in pipeline data".into(),
    })
}

fn inputs<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Data {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
