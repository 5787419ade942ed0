use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use foundry_agent::{CodeSegment, FileElement, Implementation};
use foundry_types::{merge_data, Data, FoundryError, Result};

use super::{inputs, specs, PhaseContext};
use crate::phase::{required, PhaseBehavior};

const TITLE: &str = "Development";

/// Generates the code, checks it against the requirements and fills the gaps.
pub struct DevelopmentPhase {
    ctx: PhaseContext,
}

/// Outcome of checking every requirement against the current sources.
#[derive(Debug, Default)]
struct RequirementCheck {
    passed: Vec<Value>,
    failed: Vec<Value>,
    reports: Vec<Implementation>,
}

impl DevelopmentPhase {
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    /// Send the requirements to `validate_code` in chunks and partition them
    /// by verdict. A requirement with no report counts as failed.
    async fn check_requirements(&self, requirements: &[Value]) -> Result<RequirementCheck> {
        let ctx = &self.ctx;
        let chunk_size = ctx.workspace.config().validation_chunk_size;
        let mut check = RequirementCheck::default();

        for (index, chunk) in requirements.chunks(chunk_size).enumerate() {
            let task_inputs = inputs([
                ("requirements", Value::Array(chunk.to_vec())),
                ("source_files", Value::String(ctx.workspace.source_files_json().await?)),
            ]);
            let output = ctx
                .agents
                .product_owner
                .perform_task(&ctx.tasks.validate_code, &task_inputs, ctx.max_attempts())
                .await?;

            let reports: Vec<Implementation> = match output
                .as_ref()
                .and_then(|o| o.as_data())
                .and_then(|d| d.get("implementation"))
            {
                Some(value) => serde_json::from_value(value.clone())?,
                None => {
                    tracing::warn!(chunk = index, size = chunk.len(), "No implementation report for chunk; counting it as failed");
                    Vec::new()
                }
            };

            let verdicts: HashMap<&str, bool> = reports
                .iter()
                .map(|r| (r.requirement_id.trim(), r.passed()))
                .collect();
            for requirement in chunk {
                let id = requirement
                    .get("requirement_id")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if verdicts.get(id).copied().unwrap_or(false) {
                    check.passed.push(requirement.clone());
                } else {
                    check.failed.push(requirement.clone());
                }
            }
            check.reports.extend(reports);
        }

        tracing::info!(
            passed = check.passed.len(),
            failed = check.failed.len(),
            "Requirements checked"
        );
        Ok(check)
    }

    /// Segment the sources and keep the segments only when they reassemble
    /// into the files they came from.
    ///
    /// One model call per attempt: a reply that fails validation and one
    /// whose segments do not reassemble both use up an attempt.
    async fn index_code(&self, data: &mut Data) -> Result<()> {
        let ctx = &self.ctx;
        let files = ctx.workspace.source_files().await?;
        let task_inputs = inputs([(
            "source_files",
            Value::String(ctx.workspace.source_files_json().await?),
        )]);

        for attempt in 1..=ctx.max_attempts() {
            let output = ctx
                .agents
                .developer
                .perform_task(&ctx.tasks.index_code_semantically, &task_inputs, 1)
                .await?;
            let Some(out) = output.and_then(|o| o.as_data().cloned()) else {
                continue;
            };
            let segments: Vec<CodeSegment> = match out.get("code_segments") {
                Some(value) => serde_json::from_value(value.clone())?,
                None => continue,
            };
            if segments_reassemble(&files, &segments) {
                tracing::info!(segments = segments.len(), attempt, "Source code indexed");
                merge_data(data, out);
                return Ok(());
            }
            tracing::warn!(attempt, "Code segments do not reassemble into the source files");
        }

        let path = ctx.workspace.code_segments_path();
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&path).await?;
        }
        tracing::warn!("Code indexing abandoned");
        Ok(())
    }
}

#[async_trait]
impl PhaseBehavior for DevelopmentPhase {
    fn title(&self) -> &str {
        TITLE
    }

    fn description(&self) -> &str {
        "Write the code the plan describes and make sure every requirement is implemented."
    }

    async fn run(&self, mut data: Data) -> Result<Data> {
        let ctx = &self.ctx;
        // implementation.json marks a finished run; drop any stale one first.
        let implementation_path = ctx.workspace.implementation_path();
        if tokio::fs::try_exists(&implementation_path).await? {
            tokio::fs::remove_file(&implementation_path).await?;
        }
        let specs = specs(&data, TITLE)?;
        let requirements = match required(&data, "requirements", TITLE, "Planning")? {
            Value::Array(items) => items.clone(),
            other => {
                return Err(FoundryError::PhaseError {
                    phase: TITLE.into(),
                    message: format!("requirements must be a list, got {other}"),
                })
            }
        };

        let out = ctx
            .perform(
                TITLE,
                &ctx.agents.developer,
                &ctx.tasks.generate_code,
                &inputs([("specs", specs)]),
            )
            .await?;
        merge_data(&mut data, out.into_data());

        let check = self.check_requirements(&requirements).await?;
        let implementation = inputs([("implementation", serde_json::to_value(&check.reports)?)]);

        if !check.failed.is_empty() {
            tracing::info!(count = check.failed.len(), "Adding missing requirements");
            let task_inputs = inputs([
                ("requirements", Value::Array(check.failed)),
                ("source_files", Value::String(ctx.workspace.source_files_json().await?)),
            ]);
            let out = ctx
                .perform(
                    TITLE,
                    &ctx.agents.developer,
                    &ctx.tasks.add_missing_requirements,
                    &task_inputs,
                )
                .await?;
            merge_data(&mut data, out.into_data());
        }

        if ctx.workspace.config().index_code {
            self.index_code(&mut data).await?;
        }

        ctx.workspace
            .write_json(&implementation_path, &implementation)
            .await?;
        merge_data(&mut data, implementation);
        data.insert(
            "files".into(),
            serde_json::to_value(ctx.workspace.source_files().await?)?,
        );
        Ok(data)
    }

    fn validate(&self) -> bool {
        let ws = &self.ctx.workspace;
        ws.has_source_files() && ws.implementation_path().is_file()
    }

    async fn load(&self, _data: &Data) -> Result<Option<Data>> {
        let ws = &self.ctx.workspace;
        let mut loaded = ws.read_json(&ws.implementation_path()).await?;
        loaded.insert("files".into(), serde_json::to_value(ws.source_files().await?)?);
        if tokio::fs::try_exists(ws.code_segments_path()).await? {
            merge_data(&mut loaded, ws.read_json(&ws.code_segments_path()).await?);
        }
        Ok(Some(loaded))
    }
}

// ---------------------------------------------------------------------------
// Segment verification
// ---------------------------------------------------------------------------

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```\w*").expect("valid regex"))
}

fn non_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W+").expect("valid regex"))
}

/// Code reduced to its lowercase word characters, with fences removed.
pub fn normalize_code(code: &str) -> String {
    let unfenced = fence_re().replace_all(code, "");
    non_word_re()
        .replace_all(&unfenced.to_lowercase(), "")
        .into_owned()
}

/// Whether, for every file, its segments concatenated in order match the
/// file's content after [`normalize_code`].
pub fn segments_reassemble(files: &[FileElement], segments: &[CodeSegment]) -> bool {
    files.iter().all(|file| {
        let joined: String = segments
            .iter()
            .filter(|s| s.file_name.trim() == file.file_name)
            .map(|s| s.segment_content.as_str())
            .collect();
        normalize_code(&joined) == normalize_code(&file.file_content)
    })
}
