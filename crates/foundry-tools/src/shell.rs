//! Persistent shell runner.
//!
//! One background task owns one long-lived `bash` process. Commands are
//! serialized through it, so shell state (working directory, exported
//! variables, an activated virtual environment) carries over between
//! commands. Each command is written to a throwaway script that ends by
//! echoing a per-runner sentinel; the worker sources the script in the live
//! shell and reads stdout until the sentinel line appears.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch, MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use foundry_types::{FoundryError, Result};

use crate::command::shell_quote;

/// Default per-command budget.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);
/// How long a terminated worker gets to exit before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// Budget for creating the virtual environment.
const PROVISION_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// ShellConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Directory the shell starts in (the project's source directory).
    pub working_dir: PathBuf,
    /// Interpreter used to create the virtual environment.
    pub interpreter: String,
    /// Shell program; must accept commands on stdin.
    pub shell: String,
    /// Create and activate `<working_dir>/<venv_name>` on start.
    pub provision_venv: bool,
    pub venv_name: String,
    pub command_timeout: Duration,
    pub grace_period: Duration,
}

impl ShellConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            interpreter: "python".to_string(),
            shell: "bash".to_string(),
            provision_venv: true,
            venv_name: "venv".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn without_venv(mut self) -> Self {
        self.provision_venv = false;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn venv_path(&self) -> PathBuf {
        self.working_dir.join(&self.venv_name)
    }
}

// ---------------------------------------------------------------------------
// Worker: background task owning the shell process
// ---------------------------------------------------------------------------

/// Output collected so far for the command in flight.
type Progress = Arc<StdMutex<String>>;

fn take_progress(progress: &Progress) -> String {
    let mut guard = progress.lock().unwrap_or_else(|e| e.into_inner());
    std::mem::take(&mut *guard)
}

fn push_progress(progress: &Progress, text: &str) {
    progress
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_str(text);
}

struct Worker {
    commands: mpsc::Sender<String>,
    outputs: mpsc::Receiver<String>,
    terminate: watch::Sender<bool>,
    progress: Progress,
    pid: Option<u32>,
    handle: JoinHandle<()>,
}

struct WorkerIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    commands: mpsc::Receiver<String>,
    outputs: mpsc::Sender<String>,
    terminate: watch::Receiver<bool>,
    progress: Progress,
    sentinel: String,
}

impl Worker {
    fn spawn(config: &ShellConfig, sentinel: &str) -> Result<Self> {
        let mut cmd = Command::new(&config.shell);
        cmd.current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Own process group so a timeout can take down the whole tree.
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            FoundryError::Shell(format!("failed to spawn '{}': {e}", config.shell))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FoundryError::Shell("shell stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FoundryError::Shell("shell stdout unavailable".into()))?;
        let pid = child.id();

        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(1);
        let (term_tx, term_rx) = watch::channel(false);
        let progress = Progress::default();

        let io = WorkerIo {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            commands: cmd_rx,
            outputs: out_tx,
            terminate: term_rx,
            progress: progress.clone(),
            sentinel: sentinel.to_string(),
        };
        let handle = tokio::spawn(worker_loop(io));

        tracing::debug!(pid = ?pid, cwd = %config.working_dir.display(), "Shell worker started");
        Ok(Self {
            commands: cmd_tx,
            outputs: out_rx,
            terminate: term_tx,
            progress,
            pid,
            handle,
        })
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal terminate and wait up to `grace` for the worker to exit.
    /// Returns `true` on a clean exit; otherwise the shell's process group is
    /// killed and the task aborted.
    async fn stop(mut self, grace: Duration) -> bool {
        let _ = self.terminate.send(true);
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                #[cfg(unix)]
                {
                    if let Some(pid) = self.pid {
                        signal_group(pid, libc::SIGKILL);
                    }
                }
                self.handle.abort();
                false
            }
        }
    }
}

async fn worker_loop(mut io: WorkerIo) {
    loop {
        let command = tokio::select! {
            cmd = io.commands.recv() => match cmd {
                Some(c) => c,
                None => break,
            },
            _ = io.terminate.changed() => break,
        };

        match run_one(&mut io, &command).await {
            Ok(Some(output)) => {
                if io.outputs.send(output).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Error during shell command execution");
                break;
            }
        }
    }
    stop_shell(&mut io.child).await;
    tracing::debug!("Shell worker finished");
}

/// Run one command; `None` means the worker was told to stop or the shell
/// went away before the sentinel arrived.
async fn run_one(io: &mut WorkerIo, command: &str) -> std::io::Result<Option<String>> {
    let script = std::env::temp_dir().join(format!("foundry-cmd-{}.sh", uuid::Uuid::new_v4()));
    tokio::fs::write(&script, format!("{command}\necho {}\n", io.sentinel)).await?;

    let invocation = format!(
        ". {} < /dev/null 2>&1\n",
        shell_quote(&script.to_string_lossy())
    );
    let result = async {
        io.stdin.write_all(invocation.as_bytes()).await?;
        io.stdin.flush().await?;
        read_until_sentinel(io).await
    }
    .await;

    let _ = tokio::fs::remove_file(&script).await;
    result
}

async fn read_until_sentinel(io: &mut WorkerIo) -> std::io::Result<Option<String>> {
    take_progress(&io.progress);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            read = io.stdout.read_until(b'\n', &mut buf) => read?,
            _ = io.terminate.changed() => return Ok(None),
        };
        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&buf);
        if let Some(pos) = line.find(io.sentinel.as_str()) {
            let mut output = take_progress(&io.progress);
            output.push_str(&line[..pos]);
            return Ok(Some(output));
        }
        push_progress(&io.progress, &line);
    }
}

async fn stop_shell(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(Duration::from_secs(1), child.wait())
        .await
        .is_err()
    {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                signal_group(pid, libc::SIGKILL);
            }
        }
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // SAFETY: kill(2) with a negative pid signals the process group we created.
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.1}", d.as_secs_f64())
    }
}

// ---------------------------------------------------------------------------
// ShellRunner
// ---------------------------------------------------------------------------

/// Serialized, timeout-aware command execution against one live shell.
///
/// A timed-out command terminates the worker. The next command respawns a
/// fresh shell and re-activates the virtual environment, but any other shell
/// state from before the timeout is lost.
pub struct ShellRunner {
    config: ShellConfig,
    sentinel: String,
    worker: Option<Worker>,
    spawns: usize,
}

impl ShellRunner {
    /// Prepare the working directory and start the shell.
    ///
    /// With `provision_venv`, an existing virtual environment is deleted,
    /// a fresh one is created and activated, and `.gitignore` is written.
    pub async fn start(config: ShellConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.working_dir).await?;

        if config.provision_venv {
            let venv = config.venv_path();
            if tokio::fs::try_exists(&venv).await? {
                tokio::fs::remove_dir_all(&venv).await?;
                tracing::info!(path = %venv.display(), "Deleted existing virtual environment");
            }
            let gitignore = config.working_dir.join(".gitignore");
            tokio::fs::write(&gitignore, format!("{}\n", config.venv_name)).await?;
            tracing::info!(path = %gitignore.display(), "Created .gitignore");
        }

        let mut runner = Self {
            config,
            sentinel: format!("__COMMAND_EXECUTION_COMPLETE_{}__", uuid::Uuid::new_v4().simple()),
            worker: None,
            spawns: 0,
        };
        runner.ensure_running().await?;
        Ok(runner)
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_alive)
    }

    /// How many shell processes this runner has started.
    pub fn spawn_count(&self) -> usize {
        self.spawns
    }

    /// Run `command` with the configured default timeout.
    pub async fn run(&mut self, command: &str) -> Result<String> {
        let timeout = self.config.command_timeout;
        self.run_shell_command(command, timeout).await
    }

    /// Run `command` and return its combined stdout and stderr.
    ///
    /// A command that outruns `timeout` is not an error: the returned text
    /// carries whatever output was produced plus a termination notice.
    pub async fn run_shell_command(&mut self, command: &str, timeout: Duration) -> Result<String> {
        self.ensure_running().await?;
        tracing::info!(command = %command, timeout_s = %format_secs(timeout), "Running shell command");
        let output = self.dispatch(command, timeout).await?;
        tracing::debug!(command = %command, output = %output, "Shell command completed");
        Ok(output)
    }

    pub async fn deactivate_venv(&mut self) -> Result<String> {
        let output = self.run("deactivate").await?;
        tracing::debug!("Virtual environment deactivated");
        Ok(output)
    }

    /// Freeze the virtual environment's packages into
    /// `<working_dir>/requirements.txt`. `None` when there is no environment
    /// to freeze.
    pub async fn generate_requirements(&mut self) -> Result<Option<PathBuf>> {
        let pip = self.config.venv_path().join("bin").join("pip");
        if !self.config.provision_venv || !tokio::fs::try_exists(&pip).await? {
            tracing::debug!(pip = %pip.display(), "No virtual environment to freeze");
            return Ok(None);
        }
        let frozen = self
            .run(&format!("{} freeze", shell_quote(&pip.to_string_lossy())))
            .await?;
        let path = self.config.working_dir.join("requirements.txt");
        tokio::fs::write(&path, frozen).await?;
        tracing::info!(path = %path.display(), "Requirements file generated");
        Ok(Some(path))
    }

    /// Terminate the shell, leaving the virtual environment first. Returns
    /// `true` if the worker exited within the grace period.
    pub async fn shutdown(&mut self) -> bool {
        if self.config.provision_venv && self.is_running() {
            if let Err(e) = self.deactivate_venv().await {
                tracing::warn!(error = %e, "Could not deactivate the virtual environment");
            }
        }
        match self.worker.take() {
            Some(worker) => {
                let clean = worker.stop(self.config.grace_period).await;
                tracing::info!(clean, "Shell killed");
                clean
            }
            None => true,
        }
    }

    async fn ensure_running(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.worker = Some(Worker::spawn(&self.config, &self.sentinel)?);
        self.spawns += 1;
        if self.spawns > 1 {
            tracing::warn!(spawns = self.spawns, "Shell restarted after the previous one exited");
        }
        if self.config.provision_venv {
            self.activate_venv().await?;
        }
        Ok(())
    }

    async fn activate_venv(&mut self) -> Result<()> {
        let venv = self.config.venv_path();
        if !tokio::fs::try_exists(&venv).await? {
            let create = format!(
                "{} -m venv {}",
                self.config.interpreter,
                shell_quote(&self.config.venv_name)
            );
            let out = self.dispatch(&create, PROVISION_TIMEOUT).await?;
            tracing::info!(path = %venv.display(), output = %out.trim(), "Virtual environment created");
        }
        let activate = format!(". {}/bin/activate", shell_quote(&self.config.venv_name));
        let timeout = self.config.command_timeout;
        self.dispatch(&activate, timeout).await?;
        tracing::info!(path = %venv.display(), "Virtual environment activated");
        Ok(())
    }

    async fn dispatch(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let Some(worker) = self.worker.as_mut() else {
            return Err(FoundryError::Shell("shell is not running".into()));
        };

        while worker.outputs.try_recv().is_ok() {}

        if worker.commands.send(command.to_string()).await.is_err() {
            self.worker = None;
            return Ok("\n USER: Shell exited before the command could run.".to_string());
        }

        let received = tokio::time::timeout(timeout, worker.outputs.recv()).await;
        match received {
            Ok(Some(output)) => Ok(output),
            Ok(None) => {
                let mut output = take_progress(&worker.progress);
                output.push_str("\n USER: Shell exited before the command completed.");
                self.worker = None;
                Ok(output)
            }
            Err(_) => Ok(self.terminate_after_timeout(timeout).await),
        }
    }

    async fn terminate_after_timeout(&mut self, timeout: Duration) -> String {
        let Some(worker) = self.worker.take() else {
            return String::new();
        };
        let grace = self.config.grace_period;

        let mut output = take_progress(&worker.progress);
        output.push_str(&format!(
            "\n USER: Command did not complete in under {} seconds... See output above for evidence.",
            format_secs(timeout)
        ));

        if worker.stop(grace).await {
            output.push_str("\n USER: Command terminated cleanly.");
        } else {
            output.push_str(&format!(
                "\n USER: Command was forcefully terminated after {} seconds.",
                format_secs(grace)
            ));
        }
        tracing::warn!(timeout_s = %format_secs(timeout), "Shell command timed out");
        output
    }
}

// ---------------------------------------------------------------------------
// ShellManager: lazily created, shared runner
// ---------------------------------------------------------------------------

/// Exclusive access to the shared runner; dropping it releases the shell.
pub type ShellLease<'a> = MappedMutexGuard<'a, ShellRunner>;

/// Owns the single shell runner for a pipeline run.
///
/// Created once by the driver and shared by reference with every consumer.
/// The runner starts on first [`acquire`](ShellManager::acquire) and stops on
/// [`shutdown`](ShellManager::shutdown).
pub struct ShellManager {
    config: ShellConfig,
    runner: Mutex<Option<ShellRunner>>,
}

impl ShellManager {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            runner: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Lock the runner, starting it first if needed.
    pub async fn acquire(&self) -> Result<ShellLease<'_>> {
        let mut guard = self.runner.lock().await;
        if guard.is_none() {
            tracing::info!(cwd = %self.config.working_dir.display(), "Starting shell");
            *guard = Some(ShellRunner::start(self.config.clone()).await?);
        }
        MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| FoundryError::Shell("shell runner unavailable".into()))
    }

    /// Give the runner back for the next consumer.
    pub fn release(&self, lease: ShellLease<'_>) {
        drop(lease);
    }

    pub async fn is_started(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Terminate the runner if one was started. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let runner = self.runner.lock().await.take();
        if let Some(mut runner) = runner {
            runner.shutdown().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
