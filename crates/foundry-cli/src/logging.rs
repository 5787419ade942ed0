//! Log setup for a pipeline run.
//!
//! Every run writes to a fresh `logs/model_interactions_<timestamp>.log`;
//! log files left by earlier runs are removed first. `--log-to-console`
//! mirrors the same events to stderr. `RUST_LOG`, when set, overrides the
//! level given on the command line.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    #[value(alias = "warn")]
    Warning,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Install the global subscriber and return the path of the log file.
pub fn init(dir: &Path, level: LogLevel, to_console: bool) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    clear_old_logs(dir)?;

    let path = dir.join(log_file_name(chrono::Local::now()));
    let file = Arc::new(File::create(&path)?);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(file).with_ansi(false))
        .with(to_console.then(|| fmt::layer().with_writer(io::stderr).compact()))
        .init();

    Ok(path)
}

fn log_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("model_interactions_{}.log", now.format("%Y%m%d_%H%M%S"))
}

fn clear_old_logs(dir: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "log") {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_carries_timestamp() {
        let at = chrono::Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(log_file_name(at), "model_interactions_20240309_140507.log");
    }

    #[test]
    fn only_log_files_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.log"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        clear_old_logs(dir.path()).unwrap();
        assert!(!dir.path().join("old.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn warn_is_an_alias_for_warning() {
        assert_eq!(LogLevel::from_str("warn", true).unwrap(), LogLevel::Warning);
        assert_eq!(LogLevel::from_str("INFO", true).unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::Warning.directive(), "warn");
    }
}
