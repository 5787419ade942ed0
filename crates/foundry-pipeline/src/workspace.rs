//! Project configuration and on-disk layout.
//!
//! ```text
//! <projects_root>/<name>/
//!     requirements.json  test_plan.json  implementation.json
//!     src/          generated sources, test.py, the virtual environment
//!     test_files/   fixtures used by test.py
//!     llm_data/     code_segments.json, implementation_chunk.json
//! ```
//!
//! `implementation.json` is written only by a Development run that finished;
//! the per-chunk verdicts the agents report land in `implementation_chunk.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use foundry_agent::{BackoffPolicy, FileElement, HandlerPaths, UnknownTagPolicy};
use foundry_tools::{ShellConfig, DEFAULT_COMMAND_TIMEOUT};
use foundry_types::{Data, FoundryError, Result};

/// Entries of `src/` that are never treated as project sources.
const SOURCE_EXCLUDES: &[&str] = &["venv", "__pycache__", ".gitignore", "requirements.txt"];

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

/// Settings for one pipeline run. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub projects_root: PathBuf,
    /// Interpreter that runs generated code and owns the virtual environment.
    pub interpreter: String,
    pub command_timeout: Duration,
    pub provision_venv: bool,
    pub unknown_tag_policy: UnknownTagPolicy,
    /// Attempts per agent task.
    pub max_attempts: usize,
    /// Delay between attempts of one task.
    pub backoff: BackoffPolicy,
    /// Requirements checked per `validate_code` call.
    pub validation_chunk_size: usize,
    pub max_test_iterations: usize,
    /// Segment the generated sources into `llm_data/code_segments.json`.
    pub index_code: bool,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            projects_root: PathBuf::from("projects"),
            interpreter: "python3".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            provision_venv: true,
            unknown_tag_policy: UnknownTagPolicy::Ignore,
            max_attempts: foundry_agent::DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::None,
            validation_chunk_size: 5,
            max_test_iterations: 5,
            index_code: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(FoundryError::Config("project name must not be empty".into()));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(FoundryError::Config(format!(
                "project name '{name}' must be a single directory name"
            )));
        }
        if self.max_attempts == 0 {
            return Err(FoundryError::Config("max_attempts must be at least 1".into()));
        }
        if self.validation_chunk_size == 0 {
            return Err(FoundryError::Config(
                "validation_chunk_size must be at least 1".into(),
            ));
        }
        if self.interpreter.trim().is_empty() {
            return Err(FoundryError::Config("interpreter must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Resolved paths for one project plus the config they came from.
#[derive(Debug, Clone)]
pub struct Workspace {
    config: ProjectConfig,
    root: PathBuf,
}

impl Workspace {
    pub fn new(config: ProjectConfig) -> Result<Self> {
        config.validate()?;
        let root = config.projects_root.join(config.name.trim());
        Ok(Self { config, root })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name.trim()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn test_files_dir(&self) -> PathBuf {
        self.root.join("test_files")
    }

    pub fn llm_data_dir(&self) -> PathBuf {
        self.root.join("llm_data")
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.root.join("requirements.json")
    }

    pub fn test_plan_path(&self) -> PathBuf {
        self.root.join("test_plan.json")
    }

    pub fn implementation_path(&self) -> PathBuf {
        self.root.join("implementation.json")
    }

    /// Where `imp` records from a single `validate_code` reply are kept.
    pub fn implementation_chunk_path(&self) -> PathBuf {
        self.llm_data_dir().join("implementation_chunk.json")
    }

    pub fn code_segments_path(&self) -> PathBuf {
        self.llm_data_dir().join("code_segments.json")
    }

    pub fn test_script_path(&self) -> PathBuf {
        self.src_dir().join("test.py")
    }

    /// Create the project directory tree if missing.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.src_dir(),
            self.test_files_dir(),
            self.llm_data_dir(),
        ] {
            if !tokio::fs::try_exists(&dir).await? {
                tokio::fs::create_dir_all(&dir).await?;
                tracing::debug!(path = %dir.display(), "Directory created");
            }
        }
        Ok(())
    }

    pub fn handler_paths(&self) -> HandlerPaths {
        HandlerPaths {
            requirements: self.requirements_path(),
            test_plan: self.test_plan_path(),
            implementation: self.implementation_chunk_path(),
            code_segments: self.code_segments_path(),
            src_dir: self.src_dir(),
        }
    }

    pub fn shell_config(&self) -> ShellConfig {
        let mut shell = ShellConfig::new(self.src_dir())
            .with_interpreter(&self.config.interpreter)
            .with_command_timeout(self.config.command_timeout);
        shell.provision_venv = self.config.provision_venv;
        shell
    }

    /// Read a JSON artifact whose top level is an object.
    pub async fn read_json(&self, path: &Path) -> Result<Data> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write `data` as pretty JSON, replacing the file.
    pub async fn write_json(&self, path: &Path, data: &Data) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(data)?).await?;
        Ok(())
    }

    /// Every readable text file under `src/`, sorted by relative path.
    /// The virtual environment and caches are skipped.
    pub async fn source_files(&self) -> Result<Vec<FileElement>> {
        let src = self.src_dir();
        tokio::task::spawn_blocking(move || list_sources(&src))
            .await
            .map_err(|e| FoundryError::Other(format!("source listing task failed: {e}")))?
    }

    /// Whether `src/` holds at least one source file. Blocking; used by the
    /// synchronous phase validators.
    pub fn has_source_files(&self) -> bool {
        list_sources(&self.src_dir())
            .map(|f| !f.is_empty())
            .unwrap_or(false)
    }

    /// `{"files": [...]}` as pretty JSON, the form tasks receive sources in.
    pub async fn source_files_json(&self) -> Result<String> {
        let listing = SourceListing {
            files: self.source_files().await?,
        };
        Ok(serde_json::to_string_pretty(&listing)?)
    }
}

#[derive(Serialize, Deserialize)]
struct SourceListing {
    files: Vec<FileElement>,
}

fn list_sources(src: &Path) -> Result<Vec<FileElement>> {
    let mut files = Vec::new();
    if src.is_dir() {
        collect_sources(src, src, &mut files)?;
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

fn collect_sources(base: &Path, dir: &Path, out: &mut Vec<FileElement>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if SOURCE_EXCLUDES.contains(&name.as_ref()) || name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_sources(base, &path, out)?;
        } else if file_type.is_file() {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let rel = path.strip_prefix(base).unwrap_or(&path);
                    out.push(FileElement {
                        file_name: rel.to_string_lossy().into_owned(),
                        file_content: content,
                    });
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable source file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(root: &Path) -> Workspace {
        let mut config = ProjectConfig::new("calc");
        config.projects_root = root.to_path_buf();
        Workspace::new(config).unwrap()
    }

    #[test]
    fn layout_follows_project_name() {
        let ws = workspace(Path::new("/tmp/projects"));
        assert_eq!(ws.root(), Path::new("/tmp/projects/calc"));
        assert_eq!(ws.src_dir(), PathBuf::from("/tmp/projects/calc/src"));
        assert_eq!(ws.test_plan_path(), PathBuf::from("/tmp/projects/calc/test_plan.json"));
        assert_eq!(
            ws.code_segments_path(),
            PathBuf::from("/tmp/projects/calc/llm_data/code_segments.json")
        );
        assert_eq!(ws.handler_paths().src_dir, ws.src_dir());
        assert_eq!(
            ws.handler_paths().implementation,
            PathBuf::from("/tmp/projects/calc/llm_data/implementation_chunk.json")
        );
        assert_ne!(ws.handler_paths().implementation, ws.implementation_path());
    }

    #[test]
    fn bad_names_are_rejected() {
        for name in ["", "  ", "a/b", "..", "x\\y"] {
            assert!(Workspace::new(ProjectConfig::new(name)).is_err(), "{name:?}");
        }
    }

    #[test]
    fn shell_config_targets_src() {
        let ws = workspace(Path::new("/tmp/p"));
        let shell = ws.shell_config();
        assert_eq!(shell.working_dir, ws.src_dir());
        assert_eq!(shell.interpreter, "python3");
        assert!(shell.provision_venv);
    }

    #[tokio::test]
    async fn ensure_dirs_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        ws.ensure_dirs().await.unwrap();
        assert!(ws.src_dir().is_dir());
        assert!(ws.test_files_dir().is_dir());
        assert!(ws.llm_data_dir().is_dir());
        ws.ensure_dirs().await.unwrap();
    }

    #[tokio::test]
    async fn source_files_skip_environment_and_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        ws.ensure_dirs().await.unwrap();
        let src = ws.src_dir();
        std::fs::write(src.join("main.py"), "print('hi')").unwrap();
        std::fs::create_dir_all(src.join("pkg")).unwrap();
        std::fs::write(src.join("pkg").join("util.py"), "X = 1").unwrap();
        std::fs::create_dir_all(src.join("venv").join("bin")).unwrap();
        std::fs::write(src.join("venv").join("bin").join("activate"), "").unwrap();
        std::fs::write(src.join(".gitignore"), "venv\n").unwrap();

        let files = ws.source_files().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["main.py", "pkg/util.py"]);
        assert!(ws.has_source_files());
        assert!(ws.source_files_json().await.unwrap().contains("\"file_name\": \"main.py\""));
    }

    #[tokio::test]
    async fn json_artifacts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let mut data = Data::new();
        data.insert("requirements".into(), serde_json::json!([{"requirement_id": "R1"}]));
        ws.write_json(&ws.requirements_path(), &data).await.unwrap();
        assert_eq!(ws.read_json(&ws.requirements_path()).await.unwrap(), data);
    }
}
