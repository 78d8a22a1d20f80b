//! Agent runtime: the [`Dispatcher`] loop and its supporting modules.
//!
//! - [`dispatcher::Dispatcher`]: per-submission state machine that routes
//!   input to slash commands or the model, runs tool rounds, and keeps the
//!   history consistent. Start here.
//! - [`config::AgentConfig`]: model, budget, tool, and round settings, with
//!   TOML loading.
//! - [`events`]: [`EventHandler`] trait and [`AgentEvent`] enum for observing
//!   the loop. Includes [`LoggingHandler`], [`CompositeEventHandler`], and
//!   [`FnEventHandler`].
//! - [`commands`]: slash commands such as `/help`, `/reset`, `/history`,
//!   `/export`, `/summarize`, and `/retry`.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod events;

pub use commands::Command;
pub use config::{AgentConfig, DEFAULT_SYSTEM_PROMPT};
pub use dispatcher::{Dispatcher, DispatcherState, Reply, Submission, TokenTotals};
pub use events::{
    AgentEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
