//! Interactive tool-using agent on top of OpenRouter.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Interactive session (type /help for commands)
//! palaver
//!
//! # One-shot question
//! palaver --prompt "What is 17 * 23?"
//!
//! # Config file plus overrides, file tools rooted at ./notes
//! palaver --config palaver.toml --model openai/gpt-4o --workdir ./notes
//!
//! # Keep a brief in context no matter how long the session gets
//! palaver --pin brief.md
//! ```

use clap::Parser;
use palaver::prelude::*;
use serde_json::Value;
use std::io::Write as _;
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Interactive tool-using agent on top of OpenRouter.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "palaver", version)]
struct Cli {
    /// Send one prompt, print the reply, and exit. Without this, starts a REPL.
    #[arg(long)]
    prompt: Option<String>,

    /// TOML config file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to use for completions.
    #[arg(long)]
    model: Option<String>,

    /// Root directory for the file tools.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Maximum tool rounds per submission.
    #[arg(long)]
    max_tool_rounds: Option<u32>,

    /// Token budget for the prompt sent to the model.
    #[arg(long)]
    context_window: Option<usize>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// File whose contents stay in context for the whole session.
    #[arg(long)]
    pin: Option<PathBuf>,

    /// Log debug output to stderr (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

// ── Setup ──────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "palaver=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_config(cli: &Cli) -> Result<AgentConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(workdir) = &cli.workdir {
        config.workdir = workdir.clone();
    }
    if let Some(rounds) = cli.max_tool_rounds {
        config.max_tool_rounds = rounds;
    }
    if let Some(tokens) = cli.context_window {
        config.context_window_tokens = tokens;
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = Some(temperature);
    }
    config.validate()?;

    if let Some(prompt) = config.system_prompt.take() {
        let today = chrono::Local::now().format("%Y-%m-%d");
        config.system_prompt = Some(format!("{prompt}\n\nToday's date is {today}."));
    }
    Ok(config)
}

/// Event handler for the CLI that prints tool activity to stderr.
struct CliEventHandler;

impl EventHandler for CliEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::ToolExecuting {
                name, arguments, ..
            } => {
                let args = Value::Object((*arguments).clone());
                eprintln!("  [tool_call] {name}({args})");
            }
            AgentEvent::ToolFinished { name, outcome, .. } if outcome.is_error => {
                eprintln!("  [tool_error] {name}: {}", outcome.payload);
            }
            AgentEvent::OverBudget(warning) => {
                eprintln!("  [warning] {warning}");
            }
            AgentEvent::RoundLimitReached { max_rounds } => {
                eprintln!("  [stopped] tool-round limit of {max_rounds} reached");
            }
            _ => {}
        }
    }
}

// ── Running ────────────────────────────────────────────────────────

/// Submit one line with Ctrl-C wired to a fresh cancellation token.
async fn submit_line(dispatcher: &mut Dispatcher<'_>, line: &str) -> Result<String, DispatchError> {
    let token = CancellationToken::new();
    dispatcher.set_cancellation(token.clone());
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = dispatcher.submit(line).await;
    watcher.abort();

    Ok(match result? {
        Submission::Command(output) => output,
        Submission::Reply(reply) => reply.text,
    })
}

async fn repl(dispatcher: &mut Dispatcher<'_>) -> std::io::Result<()> {
    eprintln!(
        "palaver ({}). Type /help for commands, Ctrl-D to exit.",
        dispatcher.config().model
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "/exit" | "/quit") {
            break;
        }
        match submit_line(dispatcher, line).await {
            Ok(output) => println!("{output}\n"),
            Err(DispatchError::Cancelled) => eprintln!("(cancelled)"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = build_config(&cli).map_err(|e| format!("config: {e}"))?;

    let tools = ToolRegistry::new()
        .with_max_result_bytes(config.max_result_bytes)
        .with_default_timeout(config.tool_timeout())
        .with_builtin_tools(&config.workdir)
        .map_err(|e| e.to_string())?;

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;
    let client = OpenRouterClient::new(api_key).map_err(|e| e.to_string())?;

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(CliEventHandler);
    let mut dispatcher = Dispatcher::new(&client, &tools, config).with_event_handler(&handler);

    if let Some(path) = &cli.pin {
        let brief = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        dispatcher.pin_context(brief).map_err(|e| e.to_string())?;
    }

    match &cli.prompt {
        Some(prompt) => {
            let output = submit_line(&mut dispatcher, prompt)
                .await
                .map_err(|e| e.to_string())?;
            println!("{output}");
            Ok(())
        }
        None => repl(&mut dispatcher).await.map_err(|e| e.to_string()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
