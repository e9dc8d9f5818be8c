//! Claude Runner - drive a Claude Code session and print its event stream.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_runner::config::{ConfigLoader, RunnerConfig};
use claude_runner::display;
use claude_runner::runner::{Runner, RunnerEvent, SessionInfo, SessionOutcome};

/// How often the stdin forwarder checks whether the session ended.
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "claude-runner",
    about = "Run Claude Code sessions and decode their event stream",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to .claude-runner.toml, then the user config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print raw stream-json lines and untruncated values.
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SessionArgs {
    /// The initial prompt.
    prompt: String,
    /// Working directory for the agent.
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Continue the most recent conversation.
    #[arg(long = "continue")]
    continue_session: bool,
    /// Maximum number of agent turns.
    #[arg(long)]
    max_turns: Option<u32>,
    /// Model to use.
    #[arg(long)]
    model: Option<String>,
    /// Tool the agent may use (repeatable).
    #[arg(long = "allow")]
    allowed_tools: Vec<String>,
    /// Tool the agent must not use (repeatable).
    #[arg(long = "deny")]
    disallowed_tools: Vec<String>,
}

impl SessionArgs {
    fn apply(&self, config: &mut RunnerConfig) {
        if let Some(cwd) = &self.cwd {
            config.working_dir.clone_from(cwd);
        }
        if self.continue_session {
            config.continue_session = true;
        }
        if self.max_turns.is_some() {
            config.max_turns = self.max_turns;
        }
        if self.model.is_some() {
            config.model.clone_from(&self.model);
        }
        config.allowed_tools.extend(self.allowed_tools.iter().cloned());
        config
            .disallowed_tools
            .extend(self.disallowed_tools.iter().cloned());
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single prompt to completion.
    Run(SessionArgs),
    /// Start with a prompt, then send each stdin line as a further turn.
    /// EOF ends the input stream.
    Stream(SessionArgs),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn exit_code_for(info: &SessionInfo) -> ExitCode {
    match info.outcome {
        Some(SessionOutcome::Completed) => ExitCode::SUCCESS,
        Some(SessionOutcome::TokenLimit) => ExitCode::from(3),
        Some(SessionOutcome::Cancelled) => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}

async fn run_session(runner: Runner, prompt: String, streaming: bool, raw: bool) -> ExitCode {
    let events = UnboundedReceiverStream::new(runner.subscribe());
    let printer = tokio::spawn(async move {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            display::print_event(&event, raw);
            if matches!(event, RunnerEvent::Completed(_)) {
                break;
            }
        }
    });

    let ctrl_c_runner = runner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping session");
            ctrl_c_runner.stop();
        }
    });

    let result = if streaming {
        match runner.start_streaming(prompt).await {
            Ok(_) => {
                feed_stdin(&runner).await;
                runner.wait().await
            }
            Err(e) => Err(e),
        }
    } else {
        runner.start(prompt).await.map(Some)
    };

    if result.is_ok() {
        let _ = printer.await;
    } else {
        printer.abort();
    }

    match result {
        Ok(Some(info)) => exit_code_for(&info),
        Ok(None) => ExitCode::FAILURE,
        Err(e) => {
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Forward stdin lines as turns until EOF or the session ends.
async fn feed_stdin(runner: &Runner) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while runner.is_running() {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if let Err(e) = runner.add_stream_message(line) {
                        tracing::warn!(error = %e, "Dropping turn");
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            },
            () = tokio::time::sleep(SESSION_POLL_INTERVAL) => {}
        }
    }
    if let Err(e) = runner.complete_stream() {
        tracing::debug!(error = %e, "Stream already finished");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let (args, streaming) = match cli.command {
        Commands::Run(args) => (args, false),
        Commands::Stream(args) => (args, true),
    };
    args.apply(&mut config);

    let runner = Runner::new(config);
    tracing::info!(
        cwd = %runner.config().working_dir.display(),
        streaming,
        continue_session = runner.config().continue_session,
        "Starting Claude runner"
    );

    run_session(runner, args.prompt, streaming, cli.raw).await
}
