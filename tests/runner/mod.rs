//! Prompt queue and session runner tests.


/// Verify the public runner types are exported from the library.
#[test]
fn test_runner_types_exported() {
    use claude_runner::config::RunnerConfig;
    use claude_runner::runner::{
        Runner, RunnerError, RunnerEvent, SessionError, SessionOutcome, SessionState,
        StreamingPrompt,
    };

    let _ = Runner::new(RunnerConfig::default());
    let _ = StreamingPrompt::new();
    let _: fn() -> RunnerError = || RunnerError::AlreadyRunning;
    let _ = RunnerEvent::Exit { code: None };
    let _ = SessionError::Stderr(String::new());
    let _ = SessionOutcome::TokenLimit;
    let _ = SessionState::Running;
}
