//! Tool abstraction and the registry that dispatches tool calls.
//!
//! The [`Tool`] trait defines the interface that every tool must implement:
//! a static API definition (name, description, JSON schema) and an async
//! `execute` method. Tools are collected into a [`ToolRegistry`] which
//! handles registration, argument validation, failure containment, timeouts,
//! result truncation, and per-tool metrics.

use crate::ToolDef;
use crate::error::ToolError;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Maximum size (in bytes) for string tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for tool execution (30 seconds).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// What a tool capability produces: a JSON payload, or a failure description.
pub type ToolResult = Result<Value, String>;

/// Boxed future returned by [`Tool::execute`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that the model can invoke via function-calling.
///
/// Implementors provide:
/// - A static definition ([`Tool::definition`]) describing the tool's name,
///   description, and JSON Schema parameters for the model.
/// - An async [`Tool::execute`] method that receives the already-validated
///   argument map and returns a payload or an error description.
///
/// Returning `Err` is the normal way to report a failure. Panics and timeouts
/// are also contained by the registry, so a misbehaving tool never takes the
/// conversation down with it.
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model API.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the given arguments.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible (object-safe).
    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_>;

    /// The tool's name (convenience, delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name
    }

    /// Per-tool timeout override. `None` uses the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Outcome of a registry invocation, ready to become a tool-result block.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub payload: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            payload: Value::String(message.into()),
            is_error: true,
        }
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Execution statistics for one tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
}

impl ToolMetrics {
    fn record(&mut self, elapsed: Duration, success: bool) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }
        self.total_duration += elapsed;
        self.min_duration = Some(self.min_duration.map_or(elapsed, |d| d.min(elapsed)));
        self.max_duration = Some(self.max_duration.map_or(elapsed, |d| d.max(elapsed)));
    }

    /// Mean execution time, or zero when the tool was never called.
    pub fn avg_duration(&self) -> Duration {
        if self.total_calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.total_calls as u32
        }
    }

    /// Fraction of calls that succeeded (1.0 when never called).
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// A collection of tools that can be dispatched by name.
///
/// # Example
///
/// ```ignore
/// let mut tools = ToolRegistry::new()
///     .with_max_result_bytes(15_000)
///     .with_default_timeout(Some(Duration::from_secs(10)));
/// tools.register(Calculator)?;
///
/// // Export definitions for the model API.
/// let defs = tools.definitions();
///
/// // Dispatch a call from the model.
/// let outcome = tools.invoke("calculator", &args).await?;
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    /// Default timeout for tool execution. `None` disables timeouts.
    default_timeout: Option<Duration>,
    metrics: Mutex<HashMap<String, ToolMetrics>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            default_timeout: Some(DEFAULT_TOOL_TIMEOUT),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Set the maximum string result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Set the default timeout for tool execution. Applies to every tool that
    /// does not override [`Tool::timeout`]. Pass `None` to disable timeouts.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        let name = tool.name();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        debug!("Registered tool '{name}'");
        self.tools.insert(name, Box::new(tool));
        Ok(())
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Register the built-in tools: `calculator`, `text_transform`, and the
    /// `file_read` / `file_write` / `file_search` tools rooted at `workdir`.
    pub fn with_builtin_tools(self, workdir: impl Into<PathBuf>) -> Result<Self, ToolError> {
        use crate::tools::{Calculator, FileRead, FileSearch, FileWrite, TextTransform};
        let workdir = workdir.into();
        self.with(Calculator)?
            .with(TextTransform)?
            .with(FileRead::new(workdir.clone()))?
            .with(FileWrite::new(workdir.clone()))?
            .with(FileSearch::new(workdir))
    }

    /// Look a tool up by name.
    pub fn lookup(&self, name: &str) -> Result<&dyn Tool, ToolError> {
        self.tools
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Return all tool definitions for the model API, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execution metrics for every tool that has been invoked, sorted by name.
    pub fn metrics(&self) -> Vec<(String, ToolMetrics)> {
        let guard = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<(String, ToolMetrics)> =
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Metrics for a single tool, if it has been invoked.
    pub fn metrics_for(&self, name: &str) -> Option<ToolMetrics> {
        let guard = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(name).cloned()
    }

    /// Execute a tool call by name.
    ///
    /// Fails with [`ToolError::UnknownTool`] or [`ToolError::InvalidArguments`]
    /// before the tool runs. Once the tool runs, every failure mode (an `Err`
    /// return, a panic, an elapsed timeout) becomes an error
    /// [`ToolOutcome`] instead of propagating.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.lookup(name)?;
        validate_tool_arguments(tool, arguments)?;

        log_tool_call(name, arguments);
        let start = Instant::now();
        let timeout = tool.timeout().or(self.default_timeout);

        let outcome = match run_contained(tool, arguments, timeout).await {
            Ok(payload) => ToolOutcome::success(payload),
            Err(message) => ToolOutcome::failure(message),
        };

        let elapsed = start.elapsed();
        self.record(name, elapsed, !outcome.is_error);
        debug!(
            "Tool {name} completed in {:.0}ms (error: {})",
            elapsed.as_secs_f64() * 1000.0,
            outcome.is_error
        );

        let payload = match outcome.payload {
            Value::String(s) => {
                trace!(
                    "Tool {name} result preview: {}",
                    s.chars().take(300).collect::<String>()
                );
                Value::String(truncate_result(s, self.max_result_bytes))
            }
            other => other,
        };

        Ok(ToolOutcome {
            payload,
            is_error: outcome.is_error,
        })
    }

    fn record(&self, name: &str, elapsed: Duration, success: bool) {
        let mut guard = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(name.to_string())
            .or_default()
            .record(elapsed, success);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a tool, converting panics and timeouts into error strings.
async fn run_contained(
    tool: &dyn Tool,
    arguments: &Map<String, Value>,
    timeout: Option<Duration>,
) -> ToolResult {
    let name = tool.name();

    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| tool.execute(arguments))) {
        Ok(fut) => fut,
        Err(panic) => return Err(panic_message(&name, panic.as_ref())),
    };
    let guarded = AssertUnwindSafe(fut).catch_unwind();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(r) => r,
            Err(_) => {
                info!(
                    "Tool {name} timed out after {:.1}s",
                    limit.as_secs_f64()
                );
                return Err(format!(
                    "tool '{name}' timed out after {:.0} seconds",
                    limit.as_secs_f64()
                ));
            }
        },
        None => guarded.await,
    };

    result.unwrap_or_else(|panic| Err(panic_message(&name, panic.as_ref())))
}

fn panic_message(name: &str, panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!("Tool {name} panicked: {detail}");
    format!("tool '{name}' panicked: {detail}")
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<dyn Fn(Map<String, Value>) -> ToolFuture<'static> + Send + Sync>;

/// A closure-based tool that auto-parses arguments and delegates to a handler.
///
/// Use [`FnTool`] for stateless tools. For tools that need shared state
/// (working directories, clients, configuration), define a struct and
/// implement the [`Tool`] trait directly.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs {
///     /// Text to echo back.
///     text: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("echo", "Echo text back", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(Value::String(args.text)) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
    timeout: Option<Duration>,
}

impl FnTool {
    /// Create a new closure-based tool.
    ///
    /// The handler receives parsed arguments of type `A` and returns a future
    /// producing the tool result. Parse errors become tool errors.
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let erased = move |raw: Map<String, Value>| -> ToolFuture<'static> {
            match parse_tool_args::<A>(&raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        };

        Self {
            def,
            handler: Box::new(erased),
            timeout: None,
        }
    }

    /// Override the registry's default timeout for this tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_> {
        (self.handler)(arguments.clone())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool arguments against the tool's declared JSON Schema.
///
/// Every violation is reported, one per line, with its instance path. A
/// schema that does not compile is treated as "accept anything".
pub fn validate_tool_arguments(
    tool: &dyn Tool,
    arguments: &Map<String, Value>,
) -> Result<(), ToolError> {
    let schema = tool.definition().function.parameters;

    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping argument validation for '{}': {e}", tool.name());
            return Ok(());
        }
    };

    let instance = Value::Object(arguments.clone());
    let violations: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments {
            tool: tool.name(),
            violations,
        })
    }
}

/// Parse an argument map into a typed struct.
///
/// The error string is meant to be returned directly from [`Tool::execute`].
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    arguments: &Map<String, Value>,
) -> Result<T, String> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|e| format!("invalid tool arguments: {e}"))
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &Map<String, Value>) {
    let rendered = Value::Object(arguments.clone()).to_string();
    let args_preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if rendered.len() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {rendered}");
}

/// Truncate a string to at most `max` bytes, appending a notice if trimmed.
///
/// The cut is moved back to the nearest char boundary.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let end = (0..=max)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    let head = s.get(..end).unwrap_or_default();
    format!("{head}...\n[truncated: {} bytes total]", s.len())
}
