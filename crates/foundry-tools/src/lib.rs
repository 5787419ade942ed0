//! Shell execution and host probing for Foundry agents.
//!
//! Provides the persistent [`ShellRunner`] and its shared [`ShellManager`],
//! interpreter-aware command rewriting ([`clean_command`]), the
//! [`EnvironmentInfo`] snapshot rendered into prompts, and output truncation
//! used when logging long shell or model output.

pub mod command;
pub mod environment;
pub mod shell;
pub mod truncation;

pub use command::{clean_command, shell_quote};
pub use environment::EnvironmentInfo;
pub use shell::{
    ShellConfig, ShellLease, ShellManager, ShellRunner, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_GRACE_PERIOD,
};
pub use truncation::{truncate_output, TruncationMode};
