mod cache;
mod config;
mod credentials;
mod engine;
mod events;
mod logging;
mod paths;
mod prompts;
mod proposals;
mod providers;
mod scene;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::engine::{ChatInput, Orchestrator};
use crate::events::EventSink;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "vector", version)]
#[command(about = "Vector — copilot backend for a 3D scene editor", long_about = None)]
struct Cli {
    /// Path to vector.toml. Defaults to ./vector.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one chat request: reads a Chat Input JSON document and prints the
    /// resulting proposals as JSON on stdout.
    Run {
        /// Input file; "-" or omitted reads stdin.
        input: Option<PathBuf>,

        /// Mirror orchestrator progress events to stderr.
        #[arg(long, default_value_t = false)]
        events: bool,
    },
    /// Validate configuration and credentials.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Warning: failed to load config, using defaults: {e}");
        Config::default()
    });

    match cli.cmd {
        Some(Command::Check) => check(&config),
        Some(Command::Run { input, events }) => run(config, input, events).await,
        None => run(config, None, false).await,
    }
}

async fn run(config: Config, input: Option<PathBuf>, mirror_events: bool) -> Result<()> {
    // Stdout carries the result JSON; logs go to stderr and the log file.
    if let Err(e) = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stdout: false,
    }) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let chat_input = read_chat_input(input.as_deref())?;
    let creds = Credentials::load(&credentials::credentials_file());
    let sink = Arc::new(EventSink::new());

    if mirror_events {
        let mut rx = sink.subscribe();
        tokio::spawn(async move {
            while let Some(Ok(line)) = rx.next().await {
                eprintln!("[{}] {}", line.stream, line.line);
            }
        });
    }

    let mut orchestrator = Orchestrator::new(&config, &creds, sink);
    let outcome = orchestrator
        .run_chat(chat_input, CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn read_chat_input(path: Option<&std::path::Path>) -> Result<ChatInput> {
    let raw = match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("failed to read chat input from {}", p.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read chat input from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("chat input is not valid JSON")
}

fn check(config: &Config) -> Result<()> {
    let creds = Credentials::load(&credentials::credentials_file());
    println!("vector {}", env!("CARGO_PKG_VERSION"));
    println!("orchestrator:");
    println!("  max_turns: {}", config.orchestrator.max_turns);
    println!("  provider_timeout_ms: {}", config.orchestrator.provider_timeout_ms);
    println!(
        "  retries: {} (delay {}ms, cap {}ms)",
        config.orchestrator.max_retries,
        config.orchestrator.retry_delay_ms,
        config.orchestrator.retry_max_ms
    );
    println!("  fallbacks: {}", if config.orchestrator.disable_fallbacks { "disabled" } else { "enabled" });
    println!("  catalog: {}", if config.catalog.enabled { "enabled" } else { "disabled" });
    println!("providers ({}):", config.providers.len());
    for p in &config.providers {
        let key = credentials::resolve_api_key(&p.id, p.api_key.as_deref(), &creds);
        let key_status = match (&p.kind[..], key) {
            ("scripted", _) => "n/a",
            (_, Some(_)) => "key found",
            (_, None) => "NO KEY",
        };
        println!("  - {} ({}) model={} [{}]", p.id, p.kind, p.model, key_status);
    }
    if let Some(default) = &config.orchestrator.default_provider {
        println!("default provider: {default}");
    }
    Ok(())
}
