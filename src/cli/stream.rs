//! Incremental decoder for Claude Code stream-json stdout.
//!
//! Output arrives in chunks whose boundaries have nothing to do with line
//! boundaries. [`StreamParser`] buffers raw bytes, dispatches every complete
//! line, and keeps the trailing partial line until more data or
//! [`StreamParser::finish`] arrives.

use serde_json::Value;

use crate::cli::{
    AgentMessage, AssistantMessage, ContentBlock, ErrorMessage, ResultMessage, ToolErrorMessage,
    PROMPT_TOO_LONG,
};

/// Lowercased phrase used by the token-limit heuristic.
const TOKEN_LIMIT_PHRASE: &str = "prompt is too long";

/// Errors surfaced through the event stream.
///
/// None of these end a session; they are reported and decoding continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// A line was not a valid message.
    #[error("Failed to parse line: {reason}")]
    ParseError {
        /// The offending raw line.
        input: String,
        /// Parser error message.
        reason: String,
    },
    /// The agent reported an error message.
    #[error("Agent error: {}", .0.description())]
    Agent(ErrorMessage),
    /// The agent reported a tool failure.
    #[error("Tool error: {}", .0.error.as_deref().unwrap_or("unknown tool error"))]
    Tool(ToolErrorMessage),
}

/// Semantic events raised while decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A raw delimited line, raised before any parsing.
    Line(String),
    /// Every successfully decoded message.
    Message(AgentMessage),
    /// An assistant message, raised before its text and tool events.
    Assistant(AssistantMessage),
    /// One text block of an assistant message.
    Text(String),
    /// One tool invocation of an assistant message.
    ToolUse {
        name: String,
        input: Value,
    },
    /// The assistant ended its turn; carries the last assistant text.
    EndTurn(String),
    /// Terminal result of the run.
    Result(ResultMessage),
    /// A decode failure or an agent-reported error.
    Error(StreamError),
    /// The context window was exceeded. Raised at most once until reset.
    TokenLimit,
}

/// Line-oriented stream-json decoder.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    session_id: Option<String>,
    /// Set when `session_id` came from an init line rather than the caller.
    session_id_adopted: bool,
    last_assistant_text: Option<String>,
    token_limit_hit: bool,
}

impl StreamParser {
    /// Create a decoder with no session identifier configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder that tags messages lacking a `session_id`.
    #[must_use]
    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Set the session identifier injected into messages that lack one.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
        self.session_id_adopted = false;
    }

    /// The configured session identifier.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last non-empty assistant text seen.
    #[must_use]
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.last_assistant_text.as_deref()
    }

    /// Whether a token-limit condition was detected since the last reset.
    #[must_use]
    pub fn token_limit_hit(&self) -> bool {
        self.token_limit_hit
    }

    /// Number of bytes held back waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk of output and return the events for every completed line.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(chunk.as_ref());

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return events;
        };

        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        for line in complete.split(|&b| b == b'\n') {
            self.process_line(line, &mut events);
        }
        events
    }

    /// Flush whatever is buffered at end of stream.
    ///
    /// The remainder may hold several messages separated by `\n` or `\r\n`.
    /// A second call emits nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let remainder = std::mem::take(&mut self.buffer);
        for line in remainder.split(|&b| b == b'\n') {
            self.process_line(line, &mut events);
        }
        events
    }

    /// Clear buffered data, the token-limit latch and per-session tracking.
    ///
    /// A session id adopted from an init line is forgotten; one set through
    /// [`with_session_id`](Self::with_session_id) or
    /// [`set_session_id`](Self::set_session_id) is kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        if self.session_id_adopted {
            self.session_id = None;
            self.session_id_adopted = false;
        }
        self.last_assistant_text = None;
        self.token_limit_hit = false;
    }

    /// Parse a single line of stream-json output.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::ParseError` if the line is not a valid message.
    pub fn parse_line(line: &str) -> Result<AgentMessage, StreamError> {
        serde_json::from_str(line).map_err(|e| StreamError::ParseError {
            input: line.to_string(),
            reason: e.to_string(),
        })
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches('\r');
        if line.trim().is_empty() {
            return;
        }
        events.push(StreamEvent::Line(line.to_string()));

        let mut value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed stream-json line");
                events.push(StreamEvent::Error(StreamError::ParseError {
                    input: line.to_string(),
                    reason: e.to_string(),
                }));
                return;
            }
        };

        if let (Some(id), Value::Object(map)) = (&self.session_id, &mut value) {
            if matches!(map.get("session_id"), None | Some(Value::Null)) {
                map.insert("session_id".to_string(), Value::String(id.clone()));
            }
        }

        let token_limit = is_token_limit(&value);

        let message: AgentMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Stream-json line has an unexpected shape");
                events.push(StreamEvent::Error(StreamError::ParseError {
                    input: line.to_string(),
                    reason: e.to_string(),
                }));
                return;
            }
        };

        if self.session_id.is_none() {
            if let AgentMessage::System(system) = &message {
                if let Some(id) = system.session_id.as_ref().filter(|_| system.is_init()) {
                    tracing::debug!(session_id = %id, "Adopting session id from init message");
                    self.session_id = Some(id.clone());
                    self.session_id_adopted = true;
                }
            }
        }

        events.push(StreamEvent::Message(message.clone()));

        match message {
            AgentMessage::Assistant(assistant) => {
                self.handle_assistant(assistant, token_limit, events);
            }
            AgentMessage::Result(result) => {
                events.push(StreamEvent::Result(result));
                if token_limit {
                    self.raise_token_limit(events);
                }
            }
            AgentMessage::Error(error) => {
                if token_limit {
                    self.raise_token_limit(events);
                } else {
                    events.push(StreamEvent::Error(StreamError::Agent(error)));
                }
            }
            AgentMessage::ToolError(error) => {
                if token_limit {
                    self.raise_token_limit(events);
                } else {
                    events.push(StreamEvent::Error(StreamError::Tool(error)));
                }
            }
            AgentMessage::User(_) | AgentMessage::System(_) | AgentMessage::Unknown => {
                if token_limit {
                    self.raise_token_limit(events);
                }
            }
        }
    }

    fn handle_assistant(
        &mut self,
        assistant: AssistantMessage,
        token_limit: bool,
        events: &mut Vec<StreamEvent>,
    ) {
        events.push(StreamEvent::Assistant(assistant.clone()));

        let mut text = String::new();
        for block in &assistant.message.content {
            match block {
                ContentBlock::Text { text: block_text } => {
                    text.push_str(block_text);
                    events.push(StreamEvent::Text(block_text.clone()));
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    events.push(StreamEvent::ToolUse {
                        name: name.clone(),
                        input: input.clone(),
                    });
                }
                _ => {}
            }
        }

        if token_limit || text == PROMPT_TOO_LONG {
            self.raise_token_limit(events);
            return;
        }

        if !text.is_empty() {
            self.last_assistant_text = Some(text);
        }

        if assistant.is_end_turn() {
            events.push(StreamEvent::EndTurn(
                self.last_assistant_text.clone().unwrap_or_default(),
            ));
        }
    }

    fn raise_token_limit(&mut self, events: &mut Vec<StreamEvent>) {
        if self.token_limit_hit {
            tracing::debug!("Token limit already reported for this stream");
            return;
        }
        self.token_limit_hit = true;
        tracing::warn!(session_id = ?self.session_id, "Agent exceeded its context window");
        events.push(StreamEvent::TokenLimit);
    }
}

fn mentions_token_limit(text: &str) -> bool {
    text.to_lowercase().contains(TOKEN_LIMIT_PHRASE)
}

fn raw_assistant_text(value: &Value) -> String {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Classify a raw message as a token-limit condition.
///
/// Error shapes differ by origin, so each known location of the
/// "prompt is too long" signal is checked separately.
#[must_use]
pub fn is_token_limit(value: &Value) -> bool {
    let kind = value.get("type").and_then(Value::as_str);

    // Top-level error message.
    if kind == Some("error")
        && value
            .get("message")
            .and_then(Value::as_str)
            .is_some_and(mentions_token_limit)
    {
        return true;
    }

    // Nested error object on any message type.
    if value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .is_some_and(mentions_token_limit)
    {
        return true;
    }

    // Assistant content that is exactly the phrase.
    if kind == Some("assistant") && raw_assistant_text(value) == PROMPT_TOO_LONG {
        return true;
    }

    // Tool error string.
    if matches!(kind, Some("tool_error" | "tool-error"))
        && value
            .get("error")
            .and_then(Value::as_str)
            .is_some_and(mentions_token_limit)
    {
        return true;
    }

    // Result text or error flag.
    if kind == Some("result") {
        let text_matches = value
            .get("result")
            .and_then(Value::as_str)
            .is_some_and(|r| r.eq_ignore_ascii_case(TOKEN_LIMIT_PHRASE));
        let is_error = value.get("is_error").and_then(Value::as_bool) == Some(true);
        return text_matches || is_error;
    }

    false
}
