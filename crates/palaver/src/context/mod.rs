//! Context window management: size estimation and budgeted truncation.
//!
//! 1. **[`estimate`]**: [`SizeEstimator`] turns blocks and turns into integer
//!    sizes. [`CharRatioEstimator`] is the default chars-per-token heuristic.
//!
//! 2. **[`truncate`]**: [`Truncator`] selects the newest turns that fit a
//!    budget without ever splitting a tool call from its result. The
//!    [`ContextWindow`] it returns borrows from the history; nothing is
//!    copied or mutated.

pub mod estimate;
pub mod truncate;

pub use estimate::{
    CharRatioEstimator, ContextUsage, DEFAULT_CHARS_PER_TOKEN, SizeEstimator,
    TURN_OVERHEAD_TOKENS, estimate_turns,
};
pub use truncate::{ContextWindow, Truncator, atomic_units};
