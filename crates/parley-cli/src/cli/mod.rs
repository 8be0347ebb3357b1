//! CLI entry and dispatch.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::DebateConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "parley")]
#[command(version)]
#[command(about = "Multi-agent chat orchestrator for tmux-driven assistant CLIs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override the Claude CLI model
    #[arg(long, value_name = "MODEL")]
    claude_model: Option<String>,

    /// Override the Gemini CLI model
    #[arg(long, value_name = "MODEL")]
    gemini_model: Option<String>,

    /// Per-turn timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Capture raw prompt/pane traces (optional directory)
    #[arg(
        long,
        value_name = "DIR",
        num_args = 0..=1,
        default_missing_value = "1"
    )]
    debug_trace: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Interactive two-backend chat (default)
    Chat,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(value) = cli.debug_trace.as_deref() {
        // set_var is unsafe in Rust 2024 (process-global mutation)
        unsafe {
            std::env::set_var("PARLEY_DEBUG_TRACE", value);
        }
    }

    // Log to a file: stdout belongs to the chat.
    let _guard = init_tracing();

    let config = build_config(&cli);

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move {
        match cli.command {
            None | Some(Commands::Chat) => commands::chat::run(config).await,
        }
    })
}

fn build_config(cli: &Cli) -> DebateConfig {
    let mut config = DebateConfig::default();
    if let Some(model) = &cli.claude_model {
        config.claude.model = model.clone();
    }
    if let Some(model) = &cli.gemini_model {
        config.gemini.model = model.clone();
    }
    if let Some(secs) = cli.timeout {
        config.turn_timeout = Duration::from_secs(secs);
    }
    config
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = std::env::temp_dir().join("parley");
    let _ = std::fs::create_dir_all(&log_dir);
    let appender = tracing_appender::rolling::never(log_dir, "parley.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env("PARLEY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    guard
}
