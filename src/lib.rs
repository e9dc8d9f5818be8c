//! Claude Runner - drive Claude Code sessions for background workers.
//!
//! [`runner::Runner`] spawns the agent, feeds it user turns through a
//! [`runner::StreamingPrompt`], and decodes its stream-json output with
//! [`cli::StreamParser`] into events callers subscribe to.

pub mod cli;
pub mod config;
pub mod display;
pub mod runner;
