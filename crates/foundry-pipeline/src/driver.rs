//! Pipeline driver: wires the shell, handlers and agents together and walks
//! the phases from a chosen starting point.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use foundry_agent::{CommandHandler, EventEmitter, HandlerRegistry};
use foundry_llm::Model;
use foundry_tools::{EnvironmentInfo, ShellManager};
use foundry_types::{merged, Data, FoundryError, Result};

use crate::catalog::{Agents, TaskCatalog};
use crate::phase::Phase;
use crate::phases::{DevelopmentPhase, PhaseContext, PlanningPhase, TestingPhase};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// PhaseName
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseName {
    Planning,
    Development,
    Testing,
}

impl PhaseName {
    pub const ALL: [PhaseName; 3] = [
        PhaseName::Planning,
        PhaseName::Development,
        PhaseName::Testing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Planning => "planning",
            PhaseName::Development => "development",
            PhaseName::Testing => "testing",
        }
    }
}

impl FromStr for PhaseName {
    type Err = FoundryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "plan" | "planning" => Ok(PhaseName::Planning),
            "development" | "developing" => Ok(PhaseName::Development),
            "test" | "testing" => Ok(PhaseName::Testing),
            other => Err(FoundryError::Config(format!(
                "unknown phase '{other}' (expected planning, development or testing)"
            ))),
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    workspace: Arc<Workspace>,
    shell: Arc<ShellManager>,
    emitter: EventEmitter,
    phases: Vec<(PhaseName, Phase)>,
}

impl Pipeline {
    /// Build the pipeline for `workspace`, with both agents backed by `model`.
    pub fn new(workspace: Workspace, model: Model) -> Self {
        Self::with_emitter(workspace, model, EventEmitter::default())
    }

    pub fn with_emitter(workspace: Workspace, model: Model, emitter: EventEmitter) -> Self {
        let workspace = Arc::new(workspace);
        let config = workspace.config();
        let shell = Arc::new(ShellManager::new(workspace.shell_config()));

        let handlers = Arc::new(HandlerRegistry::standard(
            &workspace.handler_paths(),
            shell.clone(),
            config.interpreter.clone(),
            config.command_timeout,
            config.unknown_tag_policy,
        ));
        let commands = Arc::new(CommandHandler::new(
            shell.clone(),
            config.interpreter.clone(),
            config.command_timeout,
        ));
        let environment = EnvironmentInfo::detect(workspace.src_dir());
        let agents = Agents::standard(
            &model,
            handlers,
            environment,
            emitter.clone(),
            config.backoff.clone(),
        );

        let ctx = PhaseContext {
            workspace: workspace.clone(),
            agents,
            tasks: Arc::new(TaskCatalog::standard(&workspace)),
            commands,
        };
        let phases = vec![
            (PhaseName::Planning, Phase::new(PlanningPhase::new(ctx.clone()))),
            (PhaseName::Development, Phase::new(DevelopmentPhase::new(ctx.clone()))),
            (PhaseName::Testing, Phase::new(TestingPhase::new(ctx))),
        ];

        Self {
            workspace,
            shell,
            emitter,
            phases,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn shell(&self) -> Arc<ShellManager> {
        self.shell.clone()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn phase(&self, name: PhaseName) -> Option<&Phase> {
        self.phases.iter().find(|(n, _)| *n == name).map(|(_, p)| p)
    }

    /// Run every phase from `start` on, with `specs` as the user's request.
    ///
    /// A phase whose artifacts are already on disk is loaded instead of run.
    /// Phases before `start` are never run, but their artifacts are loaded
    /// when present so later phases find their inputs.
    pub async fn run(&mut self, start: PhaseName, specs: String) -> Result<Data> {
        self.workspace.ensure_dirs().await?;

        let mut data = Data::new();
        data.insert("specs".into(), Value::String(specs));

        for (name, phase) in &mut self.phases {
            let complete = phase.is_complete();
            if *name < start {
                if complete {
                    tracing::info!(phase = %name, "Loading data of earlier phase");
                    if let Some(loaded) = phase.load(&data).await? {
                        data = merged(loaded, &data);
                    }
                }
                continue;
            }

            if complete {
                tracing::info!(phase = %name, "Phase already complete, loading data");
                if let Some(loaded) = phase.load(&data).await? {
                    data = merged(loaded, &data);
                }
            } else {
                tracing::info!(phase = %name, description = %phase.description(), "Starting phase");
                data = phase.run(data).await?;
            }
        }

        tracing::info!(project = %self.workspace.name(), "Pipeline finished");
        Ok(data)
    }

    /// Stop the shell, if one was started.
    pub async fn shutdown(&self) {
        self.shell.shutdown().await;
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("project", &self.workspace.name())
            .field("phases", &self.phases.iter().map(|(n, _)| *n).collect::<Vec<_>>())
            .finish()
    }
}

/// Read the user's specs file.
pub async fn read_specs(path: &Path) -> Result<String> {
    let specs = tokio::fs::read_to_string(path).await.map_err(|e| {
        FoundryError::Config(format!("cannot read specs file '{}': {e}", path.display()))
    })?;
    if specs.trim().is_empty() {
        return Err(FoundryError::Config(format!(
            "specs file '{}' is empty",
            path.display()
        )));
    }
    tracing::debug!(path = %path.display(), chars = specs.len(), "User specs read");
    Ok(specs)
}
