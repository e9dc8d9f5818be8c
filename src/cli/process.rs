//! Claude Code process spawning and control.
//!
//! This module provides a builder for the agent's command line, along with
//! control methods for managing the running process. Prompts are never passed
//! as arguments; they are written to stdin as stream-json user turns.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::config::RunnerConfig;

/// Flags present on every invocation.
const BASE_ARGS: [&str; 6] = [
    "--print",
    "--verbose",
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
];

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Agent binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// The working directory does not exist or is not a directory.
    #[error("Invalid working directory: {}", .0.display())]
    InvalidWorkingDir(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, binary: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Builder for configuring Claude Code process arguments.
#[derive(Debug, Clone)]
pub struct ClaudeProcessBuilder {
    binary: String,
    working_dir: Option<PathBuf>,
    allowed_tools: Vec<String>,
    disallowed_tools: Vec<String>,
    continue_session: bool,
    max_turns: Option<u32>,
    model: Option<String>,
    fallback_model: Option<String>,
    system_prompt: Option<String>,
    append_system_prompt: Option<String>,
    mcp_config: Vec<String>,
    env: BTreeMap<String, String>,
}

impl Default for ClaudeProcessBuilder {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            working_dir: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            continue_session: false,
            max_turns: None,
            model: None,
            fallback_model: None,
            system_prompt: None,
            append_system_prompt: None,
            mcp_config: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

impl ClaudeProcessBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from a runner configuration.
    ///
    /// Tools present in both lists are only passed as disallowed.
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            working_dir: Some(config.working_dir.clone()),
            allowed_tools: config.effective_allowed_tools(),
            disallowed_tools: config.disallowed_tools.clone(),
            continue_session: config.continue_session,
            max_turns: config.max_turns,
            model: config.model.clone(),
            fallback_model: config.fallback_model.clone(),
            system_prompt: config.system_prompt.clone(),
            append_system_prompt: config.append_system_prompt.clone(),
            mcp_config: config.mcp_config.clone(),
            env: config.env.clone(),
        }
    }

    /// Use a different agent executable.
    #[must_use]
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the allowed tools for this session.
    #[must_use]
    pub fn allowed_tools(mut self, tools: &[&str]) -> Self {
        self.allowed_tools = tools.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Set the disallowed tools for this session.
    #[must_use]
    pub fn disallowed_tools(mut self, tools: &[&str]) -> Self {
        self.disallowed_tools = tools.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Continue the most recent conversation.
    #[must_use]
    pub fn continue_session(mut self, yes: bool) -> Self {
        self.continue_session = yes;
        self
    }

    /// Set the maximum number of turns.
    #[must_use]
    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the fallback model used when the primary is overloaded.
    #[must_use]
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    /// Append to the system prompt.
    #[must_use]
    pub fn append_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.append_system_prompt = Some(prompt.into());
        self
    }

    /// Set a custom system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Add an MCP server configuration file or JSON string.
    #[must_use]
    pub fn mcp_config(mut self, config: impl Into<String>) -> Self {
        self.mcp_config.push(config.into());
        self
    }

    /// Add an environment variable for the agent process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory for the Claude process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the agent executable.
    #[must_use]
    pub fn get_binary(&self) -> &str {
        &self.binary
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|s| (*s).to_string()).collect();

        if self.continue_session {
            args.push("--continue".to_string());
        }

        if let Some(turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(turns.to_string());
        }

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(model) = &self.fallback_model {
            args.push("--fallback-model".to_string());
            args.push(model.clone());
        }

        if let Some(prompt) = &self.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(prompt.clone());
        }

        if let Some(prompt) = &self.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(prompt.clone());
        }

        for tool in &self.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tool.clone());
        }

        for tool in &self.disallowed_tools {
            args.push("--disallowedTools".to_string());
            args.push(tool.clone());
        }

        for config in &self.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(config.clone());
        }

        args
    }
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn the agent with all three standard streams piped.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the working directory is invalid or the
    /// process fails to spawn.
    pub fn spawn(builder: &ClaudeProcessBuilder) -> Result<Self, SpawnError> {
        let args = builder.build_args();

        let mut cmd = Command::new(&builder.binary);
        cmd.args(&args)
            .envs(&builder.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = builder.working_dir {
            if !dir.is_dir() {
                return Err(SpawnError::InvalidWorkingDir(dir.clone()));
            }
            cmd.current_dir(dir);
        }

        tracing::debug!(binary = %builder.binary, ?args, "Spawning agent process");
        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(e, &builder.binary))?;

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    tracing::debug!(pid, "Agent ignored SIGTERM, killing");
                    self.child.kill().await
                }
            }
        } else {
            // Process already exited
            Ok(())
        }
    }
}
