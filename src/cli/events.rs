//! Message types for Claude Code stream-json input and output.
//!
//! Claude Code emits one JSON object per line when run with
//! `--output-format stream-json`, and accepts the same framing on stdin with
//! `--input-format stream-json`. Every object carries a `type` discriminant.

use serde::{Deserialize, Serialize};

/// Text Claude Code reports when the conversation no longer fits the context window.
pub const PROMPT_TOO_LONG: &str = "Prompt is too long";

/// Stop reason marking the end of an assistant turn.
pub const END_TURN: &str = "end_turn";

/// Token usage reported on assistant messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

/// A single block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain assistant or user text.
    Text {
        #[serde(default)]
        text: String,
    },
    /// A tool invocation requested by the assistant.
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// The outcome of a tool invocation, linked by `tool_use_id`.
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Extended thinking output.
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    /// Catch-all for block types this crate does not model.
    #[serde(other)]
    Unknown,
}

/// The `message` body of an assistant line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Assistant output: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub message: AssistantBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

impl AssistantMessage {
    /// Concatenated text of every `text` block, in order.
    #[must_use]
    pub fn text(&self) -> String {
        self.message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool invocations as `(name, input)` pairs, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.message.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } => Some((name.as_str(), input)),
            _ => None,
        })
    }

    /// Returns true if the assistant ended its turn with this message.
    #[must_use]
    pub fn is_end_turn(&self) -> bool {
        self.message.stop_reason.as_deref() == Some(END_TURN)
    }
}

/// User content is either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for UserContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

/// The `message` body of a user line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserBody {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: UserContent,
}

/// A user turn, either echoed back by Claude Code or written to its stdin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub message: UserBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// Connection status of an MCP server reported at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerStatus {
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// System line; the `init` subtype opens every session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(
        default,
        rename = "permissionMode",
        alias = "permission_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub permission_mode: Option<String>,
}

impl SystemMessage {
    /// Returns true for the session initialization line.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.subtype.as_deref() == Some("init")
    }
}

/// Final line of a run, with metrics and the textual result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// `success`, `error_max_turns` or `error_during_execution`.
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_api_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, alias = "cost_usd", skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ResultMessage {
    /// Returns true when the run hit its turn limit.
    #[must_use]
    pub fn is_max_turns(&self) -> bool {
        self.subtype == "error_max_turns"
    }
}

/// Error reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Nested error object or string, shape varies by origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ErrorMessage {
    /// Best human-readable description of the error.
    #[must_use]
    pub fn description(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.error {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Object(map)) => map
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| serde_json::Value::Object(map.clone()).to_string(), String::from),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

/// Error raised while executing a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolErrorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One decoded line of Claude Code output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Assistant(AssistantMessage),
    User(UserMessage),
    System(SystemMessage),
    Result(ResultMessage),
    Error(ErrorMessage),
    #[serde(alias = "tool-error")]
    ToolError(ToolErrorMessage),
    /// Catch-all for message types this crate does not model.
    #[serde(other)]
    Unknown,
}

impl AgentMessage {
    /// Build the stdin line for a user turn.
    #[must_use]
    pub fn user_turn(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            message: UserBody {
                role: "user".to_string(),
                content: UserContent::Blocks(vec![ContentBlock::Text { text: text.into() }]),
            },
            session_id: None,
            parent_tool_use_id: None,
        })
    }

    /// The wire discriminant of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::System(_) => "system",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
            Self::ToolError(_) => "tool_error",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the session ID if available.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Assistant(m) => m.session_id.as_deref(),
            Self::User(m) => m.session_id.as_deref(),
            Self::System(m) => m.session_id.as_deref(),
            Self::Result(m) => m.session_id.as_deref(),
            Self::Error(m) => m.session_id.as_deref(),
            Self::ToolError(m) => m.session_id.as_deref(),
            Self::Unknown => None,
        }
    }

    /// Returns true if this is a terminal message (Result).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}
