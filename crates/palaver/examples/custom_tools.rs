//! Custom tools example: register domain tools next to the built-ins.
//!
//! Demonstrates:
//! - Typed argument structs with `Deserialize` + `JsonSchema`
//! - Rich tool descriptions via `ToolSpec::builder()`
//! - A per-tool timeout with `FnTool::with_timeout`
//! - Observing tool activity with `CompositeEventHandler`
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example custom_tools
//! ```

use palaver::prelude::*;
use palaver::schemars;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

// ── Typed argument structs ──────────────────────────────────────────

/// Arguments for the `unit_convert` tool.
#[derive(Deserialize, JsonSchema)]
struct UnitConvertArgs {
    /// Value to convert.
    value: f64,
    /// Source unit: "km", "mi", "c", or "f".
    from: String,
}

// ── Tool constructors ───────────────────────────────────────────────

fn unit_convert_tool() -> FnTool {
    let def = ToolSpec::builder("unit_convert", "Convert distances and temperatures")
        .when_to_use("When the user gives a value in km, miles, Celsius, or Fahrenheit")
        .when_not_to_use("For general arithmetic; use calculator instead")
        .parameters_for::<UnitConvertArgs>()
        .example("unit_convert(value=10, from='km')", "{\"value\": 6.214, \"unit\": \"mi\"}")
        .output_format("JSON object with the converted value and its unit")
        .to_tool_def();

    FnTool::new(def, |args: UnitConvertArgs| async move {
        let (value, unit) = match args.from.to_ascii_lowercase().as_str() {
            "km" => (args.value * 0.621_371, "mi"),
            "mi" => (args.value / 0.621_371, "km"),
            "c" => (args.value * 9.0 / 5.0 + 32.0, "f"),
            "f" => ((args.value - 32.0) * 5.0 / 9.0, "c"),
            other => return Err(format!("unsupported unit '{other}'")),
        };
        Ok(json!({ "value": (value * 1000.0).round() / 1000.0, "unit": unit }))
    })
    .with_timeout(Duration::from_secs(2))
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let client = OpenRouterClient::new(api_key)?;

    let tools = ToolRegistry::new()
        .with_builtin_tools(".")?
        .with(unit_convert_tool())?;

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(FnEventHandler::new(|event| {
            if let AgentEvent::ToolFinished { name, outcome, .. } = event {
                eprintln!("[callback] {name} -> {}", outcome.payload);
            }
        }));

    let config = AgentConfig::default()
        .with_max_tool_rounds(5)
        .with_max_tokens(1024);
    let mut dispatcher = Dispatcher::new(&client, &tools, config).with_event_handler(&handler);

    let reply = dispatcher
        .submit("It's 68F and I ran 10 km. Convert both, then uppercase the word 'done'.")
        .await?;
    if let Submission::Reply(reply) = reply {
        println!("\n{}", reply.text);
    }

    let totals = dispatcher.token_totals();
    println!(
        "\n--- {} request(s) | {} prompt + {} completion tokens ---",
        totals.requests, totals.prompt_tokens, totals.completion_tokens
    );
    Ok(())
}
