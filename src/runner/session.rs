//! Session state owned by the runner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::AgentMessage;
use crate::runner::StreamingPrompt;

/// Lifecycle state of a runner session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    /// Returns true once the session can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The agent finished on its own.
    Completed,
    /// The session was stopped by the caller.
    Cancelled,
    /// The agent ran out of context. Callers should start a fresh session
    /// without `continue_session`, seeded with a summary of prior progress.
    TokenLimit,
    /// The agent exited abnormally or could not be driven.
    Failed { reason: String },
}

/// Snapshot of a session for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub running: bool,
    pub streaming: bool,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub outcome: Option<SessionOutcome>,
}

/// Mutable state of one agent run.
#[derive(Debug)]
pub struct RunnerSession {
    state: SessionState,
    pub(crate) pid: Option<u32>,
    session_id: Option<String>,
    started_at: DateTime<Utc>,
    exit_code: Option<i32>,
    exited_at: Option<DateTime<Utc>>,
    stderr: String,
    last_assistant_text: Option<String>,
    messages: Vec<AgentMessage>,
    streaming: bool,
    prompt: Option<Arc<StreamingPrompt>>,
    token_limit: bool,
    outcome: Option<SessionOutcome>,
}

impl RunnerSession {
    /// Create a running session. `prompt` is retained only in streaming mode.
    #[must_use]
    pub fn new(streaming: bool, prompt: Arc<StreamingPrompt>) -> Self {
        Self {
            state: SessionState::Running,
            pid: None,
            session_id: None,
            started_at: Utc::now(),
            exit_code: None,
            exited_at: None,
            stderr: String::new(),
            last_assistant_text: None,
            messages: Vec::new(),
            streaming,
            prompt: streaming.then_some(prompt),
            token_limit: false,
            outcome: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, new_state: SessionState) {
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        self.state = new_state;
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// The prompt queue of a streaming session.
    #[must_use]
    pub fn prompt(&self) -> Option<&Arc<StreamingPrompt>> {
        self.prompt.as_ref()
    }

    #[must_use]
    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    #[must_use]
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.last_assistant_text.as_deref()
    }

    #[must_use]
    pub fn token_limit_hit(&self) -> bool {
        self.token_limit
    }

    /// Append a decoded message. Returns the session id if this message
    /// revealed it for the first time.
    pub fn record_message(&mut self, message: AgentMessage) -> Option<String> {
        let mut learned = None;
        if self.session_id.is_none() {
            if let Some(id) = message.session_id() {
                self.session_id = Some(id.to_string());
                learned = Some(id.to_string());
            }
        }
        self.messages.push(message);
        learned
    }

    pub fn set_last_assistant_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.last_assistant_text = Some(text.to_string());
        }
    }

    pub fn record_stderr(&mut self, line: &str) {
        self.stderr.push_str(line);
        self.stderr.push('\n');
    }

    pub fn record_token_limit(&mut self) {
        self.token_limit = true;
    }

    /// Mark the session finished. Only the first call has any effect.
    pub fn finish(&mut self, exit_code: Option<i32>, outcome: SessionOutcome) {
        if self.state.is_terminal() {
            tracing::debug!(state = ?self.state, "Session already finished");
            return;
        }
        let state = match outcome {
            SessionOutcome::Cancelled => SessionState::Cancelled,
            SessionOutcome::Failed { .. } => SessionState::Failed,
            SessionOutcome::Completed | SessionOutcome::TokenLimit => SessionState::Completed,
        };
        self.transition(state);
        self.exit_code = exit_code;
        self.exited_at = Some(Utc::now());
        self.outcome = Some(outcome);
        if let Some(prompt) = self.prompt.take() {
            prompt.complete();
        }
    }

    /// Snapshot the session.
    #[must_use]
    pub fn info(&self, running: bool) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            running,
            streaming: self.streaming,
            pid: self.pid,
            started_at: self.started_at,
            exited_at: self.exited_at,
            exit_code: self.exit_code,
            outcome: self.outcome.clone(),
        }
    }
}
