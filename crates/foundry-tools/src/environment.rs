//! Snapshot of the host environment, rendered into every task prompt.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub os_name: String,
    pub os_release: String,
    pub os_family: String,
    pub shell: String,
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub project_dir: PathBuf,
}

impl EnvironmentInfo {
    /// Probe the current process environment.
    pub fn detect(project_dir: impl Into<PathBuf>) -> Self {
        let os_name = std::env::consts::OS.to_string();
        Self {
            os_release: os_release(),
            os_family: std::env::consts::FAMILY.to_string(),
            shell: detect_shell(&os_name),
            home_dir: std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default(),
            cwd: std::env::current_dir().unwrap_or_default(),
            project_dir: project_dir.into(),
            os_name,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "\n<environment_info>\n    Operating System: {} - {} ({})\n    Default Shell: {}\n    Home Directory: {}\n    Current Working Directory: {}\n    Project Sub-Directory: {}\n</environment_info>\n",
            self.os_name,
            self.os_release,
            self.os_family,
            self.shell,
            self.home_dir.display(),
            self.cwd.display(),
            self.project_dir.display(),
        )
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

fn os_release() -> String {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// `$SHELL` basename, else the platform's usual default.
fn detect_shell(os_name: &str) -> String {
    std::env::var("SHELL")
        .ok()
        .and_then(|s| {
            Path::new(&s)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            match os_name {
                "macos" => "zsh",
                "windows" => "cmd",
                _ => "sh",
            }
            .to_string()
        })
}
