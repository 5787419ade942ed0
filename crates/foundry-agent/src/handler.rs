//! Tag handlers, dynamic dispatch wrapper, and handler registry.
//!
//! A handler owns one tag. It validates the whole batch of records for that
//! tag before any side effect runs, performs its side effect (write an
//! artifact, write source files, run commands) and returns a result fragment
//! for the caller to merge.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use foundry_markup::Node;
use foundry_tools::{clean_command, ShellManager};
use foundry_types::{Data, ElementValidationError, FieldIssue, FoundryError, Result};

use crate::element::{
    create_elements, validate_records, CommandElement, ElementKind, ElementRegistry, FileElement,
};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Handler: Send + Sync {
    /// Record kind this handler accepts.
    fn kind(&self) -> ElementKind;

    /// Check a batch without side effects.
    fn validate(&self, raw: &[Node]) -> std::result::Result<(), ElementValidationError> {
        validate_records(self.kind(), raw).map(|_| ())
    }

    /// Validate the batch, perform the side effect, return the result fragment.
    async fn process(&self, raw: &[Node]) -> Result<Data>;
}

// ---------------------------------------------------------------------------
// DynHandler: object-safe wrapper
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DynHandler(Arc<dyn Handler>);

impl DynHandler {
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self(Arc::new(handler))
    }

    pub fn kind(&self) -> ElementKind {
        self.0.kind()
    }

    pub fn validate(&self, raw: &[Node]) -> std::result::Result<(), ElementValidationError> {
        self.0.validate(raw)
    }

    pub async fn process(&self, raw: &[Node]) -> Result<Data> {
        self.0.process(raw).await
    }
}

impl std::fmt::Debug for DynHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynHandler").field(&self.kind()).finish()
    }
}

// ---------------------------------------------------------------------------
// DataHandler: persist records as a JSON artifact
// ---------------------------------------------------------------------------

/// Writes `{title: [records]}` as pretty JSON to `path`, replacing any
/// previous content, and returns the same mapping.
pub struct DataHandler {
    kind: ElementKind,
    title: String,
    path: PathBuf,
}

impl DataHandler {
    pub fn new(kind: ElementKind, title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            title: title.into(),
            path: path.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Handler for DataHandler {
    fn kind(&self) -> ElementKind {
        self.kind
    }

    async fn process(&self, raw: &[Node]) -> Result<Data> {
        let records = validate_records(self.kind, raw)?;
        let count = records.len();
        let mut data = Data::new();
        data.insert(self.title.clone(), Value::Array(records));

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(&data)?;
        tokio::fs::write(&self.path, body).await?;

        tracing::info!(tag = %self.kind, title = %self.title, count, path = %self.path.display(), "Records saved");
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// FileHandler: write source files
// ---------------------------------------------------------------------------

/// Writes each record's `file_content` to `<src_dir>/<file_name>`.
///
/// File names must be relative and stay inside `src_dir`; a batch with any
/// escaping name is rejected before anything is written.
pub struct FileHandler {
    src_dir: PathBuf,
}

impl FileHandler {
    pub fn new(src_dir: impl Into<PathBuf>) -> Self {
        Self {
            src_dir: src_dir.into(),
        }
    }

    fn check_names(files: &[FileElement]) -> std::result::Result<(), ElementValidationError> {
        let issues: Vec<FieldIssue> = files
            .iter()
            .enumerate()
            .filter_map(|(index, f)| {
                safe_relative(f.file_name.trim()).err().map(|reason| FieldIssue {
                    index,
                    field: Some("file_name".into()),
                    reason,
                })
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ElementValidationError {
                tag: ElementKind::File.tag().to_string(),
                issues,
            })
        }
    }
}

fn safe_relative(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("file name is empty".into());
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(format!("'{name}' leaves the source directory")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("'{name}' is not a relative path"))
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Handler for FileHandler {
    fn kind(&self) -> ElementKind {
        ElementKind::File
    }

    fn validate(&self, raw: &[Node]) -> std::result::Result<(), ElementValidationError> {
        let files: Vec<FileElement> = create_elements(ElementKind::File, raw)?;
        Self::check_names(&files)
    }

    async fn process(&self, raw: &[Node]) -> Result<Data> {
        let files: Vec<FileElement> = create_elements(ElementKind::File, raw)?;
        Self::check_names(&files)?;

        for file in &files {
            let path = self.src_dir.join(file.file_name.trim());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &file.file_content).await?;
            tracing::info!(path = %path.display(), bytes = file.file_content.len(), "File written");
        }

        let mut data = Data::new();
        data.insert("files".into(), serde_json::to_value(&files)?);
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// CommandHandler: run shell commands
// ---------------------------------------------------------------------------

/// Runs each record's command, in order, through the shared shell and
/// attaches the output to the record.
pub struct CommandHandler {
    shell: Arc<ShellManager>,
    interpreter: String,
    timeout: Duration,
}

impl CommandHandler {
    pub fn new(shell: Arc<ShellManager>, interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell,
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Run one command exactly as given. Output text, never an error, for a
    /// command that times out.
    ///
    /// Only commands that come from model replies are rewritten by
    /// [`clean_command`]; callers of `run` already name the interpreter.
    pub async fn run(&self, command: &str) -> Result<String> {
        let mut lease = self.shell.acquire().await?;
        let output = lease.run_shell_command(command, self.timeout).await;
        self.shell.release(lease);
        output
    }

    /// Freeze the shell's virtual environment into `requirements.txt`.
    /// `None` when the shell runs without one.
    pub async fn freeze_requirements(&self) -> Result<Option<PathBuf>> {
        let mut lease = self.shell.acquire().await?;
        let path = lease.generate_requirements().await;
        self.shell.release(lease);
        path
    }
}

#[async_trait]
impl Handler for CommandHandler {
    fn kind(&self) -> ElementKind {
        ElementKind::Command
    }

    async fn process(&self, raw: &[Node]) -> Result<Data> {
        let mut commands: Vec<CommandElement> = create_elements(ElementKind::Command, raw)?;

        let mut lease = self.shell.acquire().await?;
        for cmd in &mut commands {
            let cleaned = clean_command(cmd.command.trim(), &self.interpreter);
            let output = lease.run_shell_command(&cleaned, self.timeout).await?;
            cmd.output = Some(output);
        }
        self.shell.release(lease);

        let mut data = Data::new();
        data.insert("commands".into(), serde_json::to_value(&commands)?);
        Ok(data)
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// What to do with a reply tag that has no registered handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownTagPolicy {
    /// Log and skip the tag.
    #[default]
    Ignore,
    /// Raise a fatal [`FoundryError::UnknownTag`].
    Fail,
}

/// Where the standard handlers put their output.
#[derive(Debug, Clone)]
pub struct HandlerPaths {
    pub requirements: PathBuf,
    pub test_plan: PathBuf,
    pub implementation: PathBuf,
    pub code_segments: PathBuf,
    pub src_dir: PathBuf,
}

#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<String, DynHandler>,
    elements: ElementRegistry,
    policy: UnknownTagPolicy,
}

impl HandlerRegistry {
    pub fn new(policy: UnknownTagPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            elements: ElementRegistry::new(),
            policy,
        }
    }

    /// The six standard tags wired to their handlers.
    pub fn standard(
        paths: &HandlerPaths,
        shell: Arc<ShellManager>,
        interpreter: impl Into<String>,
        command_timeout: Duration,
        policy: UnknownTagPolicy,
    ) -> Self {
        let mut registry = Self::new(policy);
        registry.register(DataHandler::new(
            ElementKind::Requirement,
            "requirements",
            &paths.requirements,
        ));
        registry.register(DataHandler::new(
            ElementKind::FunctionalityTest,
            "tests",
            &paths.test_plan,
        ));
        registry.register(DataHandler::new(
            ElementKind::Implementation,
            "implementation",
            &paths.implementation,
        ));
        registry.register(DataHandler::new(
            ElementKind::CodeSegment,
            "code_segments",
            &paths.code_segments,
        ));
        registry.register(FileHandler::new(&paths.src_dir));
        registry.register(CommandHandler::new(shell, interpreter, command_timeout));
        registry
    }

    /// Register `handler` under its kind's tag, replacing any previous one.
    pub fn register(&mut self, handler: impl Handler + 'static) {
        let kind = handler.kind();
        self.elements.register(kind.tag(), kind);
        self.handlers.insert(kind.tag().to_string(), DynHandler::new(handler));
    }

    pub fn get(&self, tag: &str) -> Option<&DynHandler> {
        self.handlers.get(tag)
    }

    pub fn has(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    pub fn policy(&self) -> UnknownTagPolicy {
        self.policy
    }

    pub fn elements(&self) -> &ElementRegistry {
        &self.elements
    }

    /// Look up `tag`, applying the unknown-tag policy on a miss.
    pub fn resolve(&self, tag: &str) -> Result<Option<&DynHandler>> {
        match (self.handlers.get(tag), self.policy) {
            (Some(h), _) => Ok(Some(h)),
            (None, UnknownTagPolicy::Ignore) => {
                tracing::warn!(tag = %tag, "No handler for tag, skipping");
                Ok(None)
            }
            (None, UnknownTagPolicy::Fail) => Err(FoundryError::UnknownTag {
                tag: tag.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
