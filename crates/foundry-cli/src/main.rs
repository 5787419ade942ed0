//! CLI binary that runs the Foundry pipeline for one project.

mod logging;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use foundry_agent::{AgentEvent, BackoffPolicy, UnknownTagPolicy};
use foundry_llm::{model_from_env, LoggingMiddleware, UsageTracker};
use foundry_pipeline::{read_specs, PhaseName, Pipeline, ProjectConfig, Workspace, DEFAULT_MODEL_SPEC};
use foundry_types::Data;

use crate::logging::LogLevel;

/// How long an agent waits before retrying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RetryBackoff {
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Parser)]
#[command(
    name = "foundry",
    version,
    about = "Plan, write and test a project from a plain-text spec using LLM agents"
)]
struct Cli {
    /// Project name; the project lives in <projects-root>/<name>
    #[arg(long)]
    name: String,

    /// Phase to start from (planning, development, testing)
    #[arg(long, default_value = "planning")]
    phase: PhaseName,

    /// Mirror the log file to the console
    #[arg(long)]
    log_to_console: bool,

    /// Log level
    #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// File holding the stakeholder specs
    #[arg(long, default_value = "user_specs.txt")]
    specs: PathBuf,

    /// Model as provider:model (anthropic, openai, gemini, ollama, vllm)
    #[arg(long, default_value = DEFAULT_MODEL_SPEC)]
    model: String,

    /// Interpreter that runs the generated code
    #[arg(long, default_value = "python3")]
    python: String,

    /// Directory holding all projects
    #[arg(long, default_value = "projects")]
    projects_root: PathBuf,

    /// Seconds a single shell command may run
    #[arg(long, default_value = "20")]
    command_timeout: u64,

    /// Attempts per agent task
    #[arg(long, default_value = "3")]
    max_attempts: usize,

    /// Delay between attempts of one task
    #[arg(long, value_enum, default_value_t = RetryBackoff::None)]
    retry_backoff: RetryBackoff,

    /// Base delay in milliseconds for --retry-backoff fixed or exponential
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// Segment the generated code into llm_data/code_segments.json
    #[arg(long)]
    index_code: bool,

    /// Fail on reply tags that have no handler instead of skipping them
    #[arg(long)]
    strict_tags: bool,

    /// Run commands without creating a virtual environment
    #[arg(long)]
    no_venv: bool,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

impl Cli {
    fn project_config(&self) -> ProjectConfig {
        let mut config = ProjectConfig::new(&self.name);
        config.projects_root = self.projects_root.clone();
        config.interpreter = self.python.clone();
        config.command_timeout = Duration::from_secs(self.command_timeout);
        config.provision_venv = !self.no_venv;
        config.max_attempts = self.max_attempts;
        config.backoff = self.backoff();
        config.index_code = self.index_code;
        if self.strict_tags {
            config.unknown_tag_policy = UnknownTagPolicy::Fail;
        }
        config
    }

    fn backoff(&self) -> BackoffPolicy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        match self.retry_backoff {
            RetryBackoff::None => BackoffPolicy::None,
            RetryBackoff::Fixed => BackoffPolicy::Fixed(delay),
            RetryBackoff::Exponential => BackoffPolicy::exponential(delay),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = logging::init(&cli.log_dir, cli.log_level, cli.log_to_console)?;
    tracing::debug!(?cli, log_file = %log_file.display(), "Command-line arguments parsed");

    let workspace = Workspace::new(cli.project_config())?;
    let specs = read_specs(&cli.specs).await?;

    let usage = UsageTracker::new();
    let model = model_from_env(&cli.model)?
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage.clone());
    tracing::info!(project = %workspace.name(), model = %model.name(), provider = %model.provider(), "Starting Foundry");

    let mut pipeline = Pipeline::new(workspace, model);
    let shell = pipeline.shell();
    let mut events = pipeline.emitter().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Agent events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome = tokio::select! {
        result = pipeline.run(cli.phase, specs) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        None => {
            println!("Ctrl+C detected. Performing cleanup...");
            tracing::warn!("Interrupted, shutting down");
            shell.shutdown().await;
            Ok(())
        }
        Some(Ok(data)) => {
            shell.shutdown().await;
            tracing::info!(
                requests = usage.request_count(),
                input_tokens = usage.total_input_tokens(),
                output_tokens = usage.total_output_tokens(),
                "Pipeline finished"
            );
            print_summary(&data);
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!(error = %e, category = e.category(), "Pipeline failed");
            shell.shutdown().await;
            Err(e.into())
        }
    }
}

fn log_event(event: &AgentEvent) {
    match event {
        AgentEvent::TaskRetrying { role, task, attempt, category, .. } => {
            tracing::debug!(%role, %task, attempt, %category, "Agent event: retrying");
        }
        AgentEvent::TaskExhausted { role, task, attempts } => {
            tracing::debug!(%role, %task, attempts, "Agent event: exhausted");
        }
        other => tracing::trace!(event = ?other, "Agent event"),
    }
}

fn print_summary(data: &Data) {
    let count = |key: &str| data.get(key).and_then(|v| v.as_array()).map_or(0, Vec::len);
    println!("Requirements: {}", count("requirements"));
    println!("Tests planned: {}", count("tests"));
    println!("Source files: {}", count("files"));
    if let Some(passed) = data.get("tests_passed").and_then(|v| v.as_bool()) {
        println!("All tests passing: {}", if passed { "yes" } else { "no" });
    }
}
