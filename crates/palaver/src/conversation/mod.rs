//! Conversation state: content blocks, turns, and the history store.
//!
//! - [`block`]: [`ContentBlock`] (text, tool call, tool result) and the
//!   immutable [`Turn`] that groups blocks under a [`Role`].
//! - [`history`]: [`HistoryStore`], the single owner of a conversation's
//!   turns, with pairing checks on append and [`validate`](HistoryStore::validate)
//!   before serialization.

pub mod block;
pub mod history;

pub use block::{ContentBlock, Role, Turn, payload_text};
pub use history::{HistoryStore, Mark, Snapshot, validate_turns};
