//! Colored CLI display utilities for runner output.
//!
//! This module prints runner events to the terminal in a compact,
//! timestamped form.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::cli::{
    AgentMessage, ContentBlock, ResultMessage, StreamEvent, SystemMessage, UserContent,
};
use crate::runner::{RunnerEvent, SessionInfo, SessionOutcome};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Format tool input for display, truncating long values.
#[must_use]
pub fn format_tool_input(input: &serde_json::Value, raw_mode: bool) -> String {
    match input {
        serde_json::Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let value_str = match v {
                        serde_json::Value::String(s) => truncate(s, 50, raw_mode),
                        other => truncate(&other.to_string(), 50, raw_mode),
                    };
                    format!("{k}={value_str}")
                })
                .collect();
            pairs.join(", ")
        }
        other => truncate(&other.to_string(), DEFAULT_MAX_LEN, raw_mode),
    }
}

/// Print one runner event.
pub fn print_event(event: &RunnerEvent, raw_mode: bool) {
    match event {
        RunnerEvent::Started(info) => print_process_started(info),
        RunnerEvent::Stream(stream) => print_stream_event(stream, raw_mode),
        RunnerEvent::Error(error) => print_error(&error.to_string()),
        RunnerEvent::Exit { code } => print_exit(*code),
        RunnerEvent::Completed(info) => print_completed(info, raw_mode),
    }
}

fn print_stream_event(event: &StreamEvent, raw_mode: bool) {
    match event {
        StreamEvent::Line(line) if raw_mode => print_raw_line(line),
        StreamEvent::Message(AgentMessage::System(system)) if system.is_init() => {
            print_session_start(system, raw_mode);
        }
        StreamEvent::Message(AgentMessage::User(user)) => {
            if let UserContent::Blocks(blocks) = &user.message.content {
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = block
                    {
                        let text = match content {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        print_tool_result(tool_use_id, &text, *is_error, raw_mode);
                    }
                }
            }
        }
        StreamEvent::Text(text) => print_text(text),
        StreamEvent::ToolUse { name, input } => print_tool_request(name, input, raw_mode),
        StreamEvent::EndTurn(_) => {
            println!();
            let _ = io::stdout().flush();
        }
        StreamEvent::Result(result) => print_result(result, raw_mode),
        StreamEvent::Error(error) => print_error(&error.to_string()),
        StreamEvent::TokenLimit => print_token_limit(),
        _ => {}
    }
}

fn print_process_started(info: &SessionInfo) {
    println!(
        "{} {} pid={} streaming={}",
        timestamp().dimmed(),
        "[AGENT]".blue().bold(),
        info.pid.map_or_else(|| "?".to_string(), |pid| pid.to_string()),
        info.streaming
    );
    let _ = io::stdout().flush();
}

/// Print session start information.
pub fn print_session_start(init: &SystemMessage, raw_mode: bool) {
    println!(
        "{} {} model={}, session={}, tools={}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        init.model.as_deref().unwrap_or("?").cyan(),
        truncate(init.session_id.as_deref().unwrap_or("?"), 20, raw_mode).dimmed(),
        init.tools.len()
    );
    let _ = io::stdout().flush();
}

/// Print the final result line.
pub fn print_result(result: &ResultMessage, raw_mode: bool) {
    let ts = timestamp();
    let label = if result.is_error {
        "[RESULT]".red().bold().to_string()
    } else {
        "[RESULT]".green().bold().to_string()
    };
    println!(
        "{} {} {} turns={} cost={}",
        ts.dimmed(),
        label,
        result.subtype,
        result.num_turns.map_or_else(|| "?".to_string(), |n| n.to_string()),
        result
            .total_cost_usd
            .map_or_else(|| "?".to_string(), |c| format!("${c:.4}"))
    );
    if result.is_max_turns() {
        println!(
            "{} {}",
            ts.dimmed(),
            "turn limit reached; raise max_turns or continue the session".yellow()
        );
    }
    if let Some(text) = result.result.as_deref().filter(|t| !t.is_empty()) {
        println!("{} {}", ts.dimmed(), truncate(text, 200, raw_mode));
    }
    let _ = io::stdout().flush();
}

/// Print a tool request.
pub fn print_tool_request(name: &str, input: &serde_json::Value, raw_mode: bool) {
    println!(
        "{} {} ({})",
        "[TOOL]".cyan().bold(),
        name.bold(),
        format_tool_input(input, raw_mode).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print text content.
pub fn print_text(text: &str) {
    print!("{text}");
    let _ = io::stdout().flush();
}

/// Print tool result output.
pub fn print_tool_result(tool_use_id: &str, content: &str, is_error: bool, raw_mode: bool) {
    let id_short = truncate(tool_use_id, 12, raw_mode);
    let content_short = truncate(content, 150, raw_mode);
    if is_error {
        println!(
            "{} {} {}",
            "[RESULT]".red().bold(),
            id_short.dimmed(),
            content_short
        );
    } else {
        println!(
            "{} {} {}",
            "[RESULT]".green().bold(),
            id_short.dimmed(),
            content_short
        );
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}

/// Print the context-window warning.
pub fn print_token_limit() {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[TOKEN LIMIT]".yellow().bold(),
        "context window exceeded; start a fresh session with a summary".yellow()
    );
    let _ = io::stdout().flush();
}

fn print_exit(code: Option<i32>) {
    println!(
        "{} {} code={}",
        timestamp().dimmed(),
        "[EXIT]".blue().bold(),
        code.map_or_else(|| "none".to_string(), |c| c.to_string())
    );
    let _ = io::stdout().flush();
}

fn print_completed(info: &SessionInfo, raw_mode: bool) {
    let outcome = match &info.outcome {
        Some(SessionOutcome::Completed) => "completed".green().to_string(),
        Some(SessionOutcome::Cancelled) => "cancelled".yellow().to_string(),
        Some(SessionOutcome::TokenLimit) => "token limit".yellow().to_string(),
        Some(SessionOutcome::Failed { reason }) => format!("failed: {reason}").red().to_string(),
        None => "unknown".dimmed().to_string(),
    };
    println!(
        "{} {} {} {}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        outcome,
        info.session_id
            .as_deref()
            .map_or(String::new(), |id| format!("session_id={}", truncate(id, 20, raw_mode)))
            .dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a raw stream-json line (for raw mode).
pub fn print_raw_line(line: &str) {
    println!("{} {} {}", timestamp().dimmed(), "[LINE]".yellow().bold(), line);
    let _ = io::stdout().flush();
}
