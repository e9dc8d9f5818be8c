//! Configuration types.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Non-fatal problems found by [`RunnerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigWarning {
    /// A tool appears in both lists. The deny-list wins.
    #[error("Tool '{tool}' is both allowed and disallowed; it will be disallowed")]
    ToolConflict { tool: String },
    /// `max_turns = 0` would end every session before the first turn.
    #[error("max_turns is 0; the agent will not be able to take a turn")]
    ZeroMaxTurns,
}

/// Configuration for one agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Agent executable.
    pub binary: String,
    /// Working directory the agent runs in.
    pub working_dir: PathBuf,
    /// Tools the agent may use.
    pub allowed_tools: Vec<String>,
    /// Tools the agent must not use.
    pub disallowed_tools: Vec<String>,
    /// Replacement system prompt.
    pub system_prompt: Option<String>,
    /// Text appended to the default system prompt.
    pub append_system_prompt: Option<String>,
    /// Maximum number of agent turns.
    pub max_turns: Option<u32>,
    /// Resume the most recent conversation in the working directory.
    pub continue_session: bool,
    /// MCP server configurations (file paths or inline JSON).
    pub mcp_config: Vec<String>,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    /// Extra environment for the agent process, e.g. an issue-tracker token.
    pub env: BTreeMap<String, String>,
    /// Seconds to wait after SIGTERM before killing the agent.
    pub terminate_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            working_dir: PathBuf::from("."),
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            system_prompt: None,
            append_system_prompt: None,
            max_turns: None,
            continue_session: false,
            mcp_config: Vec::new(),
            model: None,
            fallback_model: None,
            env: BTreeMap::new(),
            terminate_timeout_secs: 5,
        }
    }
}

impl RunnerConfig {
    /// Create a configuration rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..Self::default()
        }
    }

    /// Report conflicting or suspicious settings.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let denied: HashSet<&str> = self.disallowed_tools.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut warnings: Vec<ConfigWarning> = self
            .allowed_tools
            .iter()
            .filter(|tool| denied.contains(tool.as_str()) && seen.insert(tool.as_str()))
            .map(|tool| ConfigWarning::ToolConflict { tool: tool.clone() })
            .collect();

        if self.max_turns == Some(0) {
            warnings.push(ConfigWarning::ZeroMaxTurns);
        }
        warnings
    }

    /// Allowed tools with every disallowed tool removed.
    #[must_use]
    pub fn effective_allowed_tools(&self) -> Vec<String> {
        self.allowed_tools
            .iter()
            .filter(|tool| !self.disallowed_tools.contains(tool))
            .cloned()
            .collect()
    }

    /// Graceful termination timeout.
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}
