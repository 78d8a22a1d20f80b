//! Tool abstractions and the built-in tools.
//!
//! Every capability the model can invoke is a [`Tool`] trait implementor.
//! Tools are collected into a [`ToolRegistry`] which handles dispatch,
//! validation, failure containment, truncation, timeouts, and metrics.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, auto-parses arguments. Best for simple tools.
//! - **`impl Tool`**: full struct with manual [`Tool::definition()`] and
//!   [`Tool::execute()`]. Best for tools with state such as a working directory.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolRegistry`], [`FnTool`], metrics.
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) builder for structured descriptions.
//! - [`calculator`], [`text`], [`files`]: the built-in tools. Register all of
//!   them at once with [`ToolRegistry::with_builtin_tools()`].

pub mod calculator;
pub mod core;
pub mod files;
pub mod spec;
pub mod text;

pub use calculator::Calculator;
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, DEFAULT_TOOL_TIMEOUT, FnTool, Tool, ToolFuture, ToolMetrics,
    ToolOutcome, ToolRegistry, ToolResult, parse_tool_args, truncate_result,
    validate_tool_arguments,
};
pub use files::{FileRead, FileSearch, FileWrite};
pub use spec::ToolSpec;
pub use text::TextTransform;
