//! Tests for Claude process spawning and control.

use std::time::Duration;

use claude_runner::cli::{ClaudeProcess, ClaudeProcessBuilder, SpawnError};
use claude_runner::config::RunnerConfig;

fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .collect()
}

#[test]
fn builder_uses_stream_json_both_ways() {
    let args = ClaudeProcessBuilder::new().build_args();

    assert!(args.contains(&"--print".to_string()));
    assert!(args.contains(&"--verbose".to_string()));
    assert_eq!(flag_values(&args, "--output-format"), vec!["stream-json"]);
    assert_eq!(flag_values(&args, "--input-format"), vec!["stream-json"]);
}

#[test]
fn builder_repeats_tool_flags() {
    let args = ClaudeProcessBuilder::new()
        .allowed_tools(&["Read", "Write"])
        .disallowed_tools(&["Bash"])
        .build_args();

    assert_eq!(flag_values(&args, "--allowedTools"), vec!["Read", "Write"]);
    assert_eq!(flag_values(&args, "--disallowedTools"), vec!["Bash"]);
}

#[test]
fn builder_optional_flags() {
    let args = ClaudeProcessBuilder::new()
        .max_turns(5)
        .model("claude-opus")
        .fallback_model("claude-sonnet")
        .system_prompt("You are terse")
        .append_system_prompt("Use British spelling")
        .mcp_config("servers.json")
        .build_args();

    assert_eq!(flag_values(&args, "--max-turns"), vec!["5"]);
    assert_eq!(flag_values(&args, "--model"), vec!["claude-opus"]);
    assert_eq!(flag_values(&args, "--fallback-model"), vec!["claude-sonnet"]);
    assert_eq!(flag_values(&args, "--system-prompt"), vec!["You are terse"]);
    assert_eq!(
        flag_values(&args, "--append-system-prompt"),
        vec!["Use British spelling"]
    );
    assert_eq!(flag_values(&args, "--mcp-config"), vec!["servers.json"]);
}

#[test]
fn builder_never_passes_prompt_as_argument() {
    let args = ClaudeProcessBuilder::new().build_args();
    assert!(!args.contains(&"-p".to_string()));
}

#[test]
fn builder_from_config() {
    let config = RunnerConfig {
        binary: "/opt/claude".to_string(),
        continue_session: true,
        max_turns: Some(3),
        ..RunnerConfig::new("/tmp")
    };
    let builder = ClaudeProcessBuilder::from_config(&config);

    assert_eq!(builder.get_binary(), "/opt/claude");
    assert_eq!(
        builder.get_working_dir().map(|p| p.to_str().unwrap()),
        Some("/tmp")
    );
    let args = builder.build_args();
    assert!(args.contains(&"--continue".to_string()));
    assert_eq!(flag_values(&args, "--max-turns"), vec!["3"]);
}

#[test]
fn spawn_rejects_missing_working_dir() {
    let builder = ClaudeProcessBuilder::new()
        .binary("sh")
        .working_dir("/definitely/not/a/real/dir");
    let err = ClaudeProcess::spawn(&builder).unwrap_err();
    assert!(matches!(err, SpawnError::InvalidWorkingDir(_)));
}

#[tokio::test]
async fn spawn_missing_binary_is_not_found() {
    let builder = ClaudeProcessBuilder::new().binary("definitely-not-a-real-agent-binary");
    let err = ClaudeProcess::spawn(&builder).unwrap_err();
    assert!(matches!(err, SpawnError::NotFound(ref b) if b == "definitely-not-a-real-agent-binary"));
}

#[cfg(unix)]
#[tokio::test]
async fn graceful_terminate_stops_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent.sh");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    make_executable(&script);
    let builder = ClaudeProcessBuilder::new()
        .binary(script.to_string_lossy())
        .working_dir(dir.path());

    let mut process = ClaudeProcess::spawn(&builder).unwrap();
    assert!(process.id().is_some());
    process
        .graceful_terminate(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(process.try_wait().unwrap().is_some());
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
