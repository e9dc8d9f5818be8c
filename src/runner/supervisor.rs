//! Session runner for driving a Claude Code process.
//!
//! This module connects the process spawner, the stream-json decoder and the
//! streaming prompt queue. A [`Runner`] supervises at most one session at a
//! time; callers observe it through [`Runner::subscribe`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::{
    AgentMessage, ClaudeProcess, ClaudeProcessBuilder, SpawnError, StreamEvent, StreamParser,
};
use crate::config::RunnerConfig;
use crate::runner::{RunnerSession, SessionInfo, SessionOutcome, StreamingPrompt};

/// Size of each stdout read.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// How long to wait for stderr to drain after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors returned directly by runner operations.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    /// `start` was called while a session is active.
    #[error("A session is already running")]
    AlreadyRunning,
    /// A streaming operation was called without an active streaming session.
    #[error("No streaming session is active")]
    NotStreaming,
    /// The prompt stream was already completed.
    #[error("The prompt stream is already complete")]
    StreamClosed,
    /// The agent process could not be started.
    #[error("Failed to spawn agent: {0}")]
    Spawn(#[from] SpawnError),
    /// The session task panicked or was aborted.
    #[error("Session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Session-level problems reported through the event stream.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to spawn agent: {0}")]
    Spawn(String),
    #[error("Agent stderr: {0}")]
    Stderr(String),
    #[error("Agent I/O failed: {0}")]
    Io(String),
}

/// Events delivered to subscribers, in the order they occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    /// The agent process was spawned.
    Started(SessionInfo),
    /// A decoded stream event.
    Stream(StreamEvent),
    /// A transport or diagnostic error. Only spawn failures end the session.
    Error(SessionError),
    /// The agent process exited.
    Exit { code: Option<i32> },
    /// The session is finished and the runner is idle.
    Completed(SessionInfo),
}

#[derive(Debug)]
struct Active {
    generation: u64,
    cancel: CancellationToken,
    prompt: Option<Arc<StreamingPrompt>>,
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    active: Option<Active>,
    session: Option<Arc<Mutex<RunnerSession>>>,
    task: Option<JoinHandle<SessionInfo>>,
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RunnerEvent>>>,
}

impl Shared {
    fn emit(&self, event: RunnerEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervisor for one Claude Code session at a time.
///
/// Cloning yields another handle to the same runner.
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<RunnerConfig>,
    shared: Arc<Shared>,
}

impl Runner {
    /// Create a runner for the given configuration.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        for warning in config.validate() {
            tracing::warn!(%warning, "Configuration warning");
        }
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared::default()),
        }
    }

    /// The configuration sessions are started with.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunnerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Run a single prompt to completion.
    ///
    /// Agent and decode errors are reported as events; the returned info
    /// carries the outcome.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::AlreadyRunning` if a session is active and
    /// `RunnerError::Spawn` if the agent cannot be started.
    pub async fn start(&self, prompt: impl Into<String>) -> Result<SessionInfo, RunnerError> {
        let queue = Arc::new(StreamingPrompt::with_turns([prompt.into()]));
        queue.complete();
        let (driver, _) = self.launch(queue, false)?;
        Ok(tokio::spawn(driver.run()).await?)
    }

    /// Start a session whose input stays open for further turns.
    ///
    /// Returns as soon as the agent is spawned. Use
    /// [`add_stream_message`](Self::add_stream_message),
    /// [`complete_stream`](Self::complete_stream) and [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::AlreadyRunning` if a session is active and
    /// `RunnerError::Spawn` if the agent cannot be started.
    pub async fn start_streaming(
        &self,
        prompt: impl Into<String>,
    ) -> Result<SessionInfo, RunnerError> {
        let queue = Arc::new(StreamingPrompt::with_turns([prompt.into()]));
        let (driver, info) = self.launch(queue, true)?;
        let task = tokio::spawn(driver.run());
        lock(&self.shared.inner).task = Some(task);
        Ok(info)
    }

    /// Queue another user turn for the active streaming session.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::NotStreaming` without an active streaming
    /// session and `RunnerError::StreamClosed` after
    /// [`complete_stream`](Self::complete_stream).
    pub fn add_stream_message(&self, turn: impl Into<String>) -> Result<(), RunnerError> {
        let prompt = self.active_prompt()?;
        if prompt.push(turn) {
            Ok(())
        } else {
            Err(RunnerError::StreamClosed)
        }
    }

    /// Signal that no further turns will be sent.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::NotStreaming` without an active streaming session.
    pub fn complete_stream(&self) -> Result<(), RunnerError> {
        self.active_prompt()?.complete();
        Ok(())
    }

    fn active_prompt(&self) -> Result<Arc<StreamingPrompt>, RunnerError> {
        lock(&self.shared.inner)
            .active
            .as_ref()
            .and_then(|active| active.prompt.clone())
            .ok_or(RunnerError::NotStreaming)
    }

    /// Cancel the active session. The runner is idle when this returns.
    ///
    /// Does nothing if no session is active.
    pub fn stop(&self) {
        let Some(active) = lock(&self.shared.inner).active.take() else {
            return;
        };
        tracing::info!(generation = active.generation, "Stopping agent session");
        active.cancel.cancel();
        if let Some(prompt) = active.prompt {
            prompt.complete();
        }
    }

    /// Wait for the background task of the last streaming session.
    ///
    /// Returns `None` if there is nothing to wait for.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Join` if the session task panicked.
    pub async fn wait(&self) -> Result<Option<SessionInfo>, RunnerError> {
        let task = lock(&self.shared.inner).task.take();
        match task {
            Some(task) => Ok(Some(task.await?)),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.shared.inner).active.is_some()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        lock(&self.shared.inner)
            .active
            .as_ref()
            .is_some_and(|active| active.prompt.is_some())
    }

    /// Info for the active session, `None` when idle.
    #[must_use]
    pub fn session_info(&self) -> Option<SessionInfo> {
        let inner = lock(&self.shared.inner);
        inner.active.as_ref()?;
        inner.session.as_ref().map(|s| lock(s).info(true))
    }

    /// Copy of the transcript of the current or most recent session.
    #[must_use]
    pub fn messages(&self) -> Vec<AgentMessage> {
        self.with_session(|s| s.messages().to_vec())
            .unwrap_or_default()
    }

    /// Last non-empty assistant text of the current or most recent session.
    #[must_use]
    pub fn last_assistant_text(&self) -> Option<String> {
        self.with_session(|s| s.last_assistant_text().map(String::from))
            .flatten()
    }

    /// Accumulated stderr of the current or most recent session.
    #[must_use]
    pub fn stderr(&self) -> String {
        self.with_session(|s| s.stderr().to_string())
            .unwrap_or_default()
    }

    fn with_session<R>(&self, f: impl FnOnce(&RunnerSession) -> R) -> Option<R> {
        let session = lock(&self.shared.inner).session.clone()?;
        let guard = lock(&session);
        Some(f(&guard))
    }

    fn launch(
        &self,
        prompt: Arc<StreamingPrompt>,
        streaming: bool,
    ) -> Result<(SessionDriver, SessionInfo), RunnerError> {
        let mut inner = lock(&self.shared.inner);
        if inner.active.is_some() {
            tracing::warn!("Refusing to start: a session is already running");
            return Err(RunnerError::AlreadyRunning);
        }

        let builder = ClaudeProcessBuilder::from_config(&self.config);
        let process = match ClaudeProcess::spawn(&builder) {
            Ok(process) => process,
            Err(e) => {
                drop(inner);
                tracing::error!(error = %e, "Failed to spawn agent");
                self.shared
                    .emit(RunnerEvent::Error(SessionError::Spawn(e.to_string())));
                return Err(e.into());
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();

        let mut session = RunnerSession::new(streaming, Arc::clone(&prompt));
        session.pid = process.id();
        let info = session.info(true);
        let session = Arc::new(Mutex::new(session));

        inner.session = Some(Arc::clone(&session));
        inner.active = Some(Active {
            generation,
            cancel: cancel.clone(),
            prompt: streaming.then(|| Arc::clone(&prompt)),
        });
        drop(inner);

        tracing::info!(pid = ?info.pid, streaming, generation, "Agent session started");
        self.shared.emit(RunnerEvent::Started(info.clone()));

        let driver = SessionDriver {
            shared: Arc::clone(&self.shared),
            session,
            process,
            prompt,
            cancel,
            generation,
            terminate_timeout: self.config.terminate_timeout(),
        };
        Ok((driver, info))
    }
}

/// Owns the process of one session and drains its output.
struct SessionDriver {
    shared: Arc<Shared>,
    session: Arc<Mutex<RunnerSession>>,
    process: ClaudeProcess,
    prompt: Arc<StreamingPrompt>,
    cancel: CancellationToken,
    generation: u64,
    terminate_timeout: Duration,
}

impl SessionDriver {
    async fn run(mut self) -> SessionInfo {
        let writer = self.process.take_stdin().map(|stdin| {
            tokio::spawn(write_turns(
                stdin,
                Arc::clone(&self.prompt),
                self.cancel.clone(),
            ))
        });
        let mut stderr_task = self.process.take_stderr().map(|stderr| {
            tokio::spawn(drain_stderr(
                stderr,
                Arc::clone(&self.session),
                Arc::clone(&self.shared),
                self.cancel.clone(),
            ))
        });

        let mut parser = StreamParser::new();
        let mut failure = None;
        let mut cancelled = false;

        match self.process.take_stdout() {
            Some(stdout) => {
                cancelled = self.drain_stdout(stdout, &mut parser, &mut failure).await;
            }
            None => failure = Some("Process stdout not available".to_string()),
        }
        if !cancelled {
            let events = parser.finish();
            self.dispatch(&mut parser, events);
        }

        let exit_code = if cancelled {
            self.terminate().await
        } else {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    cancelled = true;
                    self.terminate().await
                }
                status = self.process.wait() => match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        failure.get_or_insert_with(|| format!("Failed to wait for agent: {e}"));
                        None
                    }
                }
            }
        };

        if let Some(writer) = writer {
            writer.abort();
        }
        if let Some(task) = stderr_task.as_mut() {
            if cancelled || tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut *task).await.is_err() {
                task.abort();
            }
        }

        let outcome = if cancelled {
            SessionOutcome::Cancelled
        } else if parser.token_limit_hit() {
            SessionOutcome::TokenLimit
        } else if let Some(reason) = failure {
            SessionOutcome::Failed { reason }
        } else {
            match exit_code {
                Some(0) => SessionOutcome::Completed,
                Some(code) => SessionOutcome::Failed {
                    reason: format!("Agent exited with code {code}"),
                },
                None => SessionOutcome::Failed {
                    reason: "Agent terminated by signal".to_string(),
                },
            }
        };

        self.finalize(exit_code, outcome)
    }

    /// Read stdout until EOF, an I/O error, or cancellation.
    ///
    /// Returns true if the session was cancelled.
    async fn drain_stdout(
        &self,
        mut stdout: ChildStdout,
        parser: &mut StreamParser,
        failure: &mut Option<String>,
    ) -> bool {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::info!("Session cancelled via token");
                    return true;
                }
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => return false,
                    Ok(n) => {
                        let events = parser.feed(&buf[..n]);
                        self.dispatch(parser, events);
                    }
                    Err(e) => {
                        if self.cancel.is_cancelled() {
                            tracing::debug!(error = %e, "Ignoring stdout error after cancellation");
                            return true;
                        }
                        tracing::error!(error = %e, "Failed to read agent stdout");
                        self.shared.emit(RunnerEvent::Error(SessionError::Io(e.to_string())));
                        *failure = Some(format!("Failed to read agent stdout: {e}"));
                        return false;
                    }
                }
            }
        }
    }

    /// Record decoded events in the session and forward them to subscribers.
    ///
    /// A session id learned from any message is handed back to the parser so
    /// later lines without one are tagged too.
    fn dispatch(&self, parser: &mut StreamParser, events: Vec<StreamEvent>) {
        if events.is_empty() {
            return;
        }

        for event in events {
            match &event {
                StreamEvent::Message(message) => {
                    if let Some(id) = lock(&self.session).record_message(message.clone()) {
                        tracing::info!(session_id = %id, "Agent reported session id");
                        if parser.session_id().is_none() {
                            parser.set_session_id(id);
                        }
                    }
                }
                StreamEvent::ToolUse { name, .. } => {
                    tracing::debug!(tool = %name, "Tool use");
                }
                StreamEvent::Result(result) => {
                    tracing::info!(
                        subtype = %result.subtype,
                        is_error = result.is_error,
                        cost_usd = ?result.total_cost_usd,
                        num_turns = ?result.num_turns,
                        "Agent reported result"
                    );
                }
                StreamEvent::Error(error) => {
                    tracing::warn!(%error, "Stream error");
                }
                StreamEvent::TokenLimit => {
                    lock(&self.session).record_token_limit();
                }
                _ => {}
            }
            self.shared.emit(RunnerEvent::Stream(event));
        }

        if let Some(text) = parser.last_assistant_text() {
            lock(&self.session).set_last_assistant_text(text);
        }
    }

    /// Terminate after cancellation. Failures here are expected and not reported.
    async fn terminate(&mut self) -> Option<i32> {
        if let Err(e) = self.process.graceful_terminate(self.terminate_timeout).await {
            tracing::debug!(error = %e, "Ignoring terminate error after cancellation");
        }
        self.process
            .try_wait()
            .ok()
            .flatten()
            .and_then(|status| status.code())
    }

    fn finalize(self, exit_code: Option<i32>, outcome: SessionOutcome) -> SessionInfo {
        tracing::info!(?exit_code, ?outcome, "Agent session ended");

        let info = {
            let mut session = lock(&self.session);
            session.finish(exit_code, outcome);
            session.info(false)
        };

        {
            let mut inner = lock(&self.shared.inner);
            if inner
                .active
                .as_ref()
                .is_some_and(|active| active.generation == self.generation)
            {
                inner.active = None;
            }
        }

        self.shared.emit(RunnerEvent::Exit { code: exit_code });
        self.shared.emit(RunnerEvent::Completed(info.clone()));
        info
    }
}

/// Write each pulled turn to stdin, closing it once the queue completes.
async fn write_turns(
    mut stdin: ChildStdin,
    prompt: Arc<StreamingPrompt>,
    cancel: CancellationToken,
) {
    let turns = prompt.into_stream();
    futures_util::pin_mut!(turns);

    while let Some(turn) = turns.next().await {
        let line = match serde_json::to_string(&AgentMessage::user_turn(turn)) {
            Ok(line) => line + "\n",
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode user turn");
                continue;
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            if cancel.is_cancelled() {
                tracing::debug!(error = %e, "Ignoring stdin error after cancellation");
            } else {
                tracing::warn!(error = %e, "Failed to write user turn");
            }
            return;
        }
        tracing::debug!(bytes = line.len(), "Wrote user turn");
    }

    drop(stdin);
    tracing::debug!("Prompt stream drained, closed agent stdin");
}

/// Report each non-empty stderr line. Lines are still recorded after
/// cancellation but no longer reported.
async fn drain_stderr(
    stderr: ChildStderr,
    session: Arc<Mutex<RunnerSession>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                if line.trim().is_empty() {
                    continue;
                }
                lock(&session).record_stderr(line);
                if cancel.is_cancelled() {
                    tracing::debug!(%line, "Agent stderr after cancellation");
                    continue;
                }
                tracing::warn!(%line, "Agent stderr");
                shared.emit(RunnerEvent::Error(SessionError::Stderr(line.to_string())));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading agent stderr");
                break;
            }
        }
    }
}
