//! Size estimation for turns and blocks.
//!
//! The truncator is agnostic to the unit of account: it asks a
//! [`SizeEstimator`] for integer sizes and compares them against the budget.
//! [`CharRatioEstimator`] is the default: a characters-per-token heuristic
//! that needs no tokenizer and errs on the side of overestimating.

use crate::conversation::{ContentBlock, Turn, payload_text};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed per-turn cost for role markers and message framing.
pub const TURN_OVERHEAD_TOKENS: usize = 4;

/// Produces integer size estimates used by the truncator.
pub trait SizeEstimator: Send + Sync {
    /// Estimated size of a single block.
    fn estimate_block(&self, block: &ContentBlock) -> usize;

    /// Estimated size of a whole turn. Defaults to the sum of its blocks plus
    /// [`TURN_OVERHEAD_TOKENS`].
    fn estimate_turn(&self, turn: &Turn) -> usize {
        TURN_OVERHEAD_TOKENS
            + turn
                .blocks()
                .iter()
                .map(|b| self.estimate_block(b))
                .sum::<usize>()
    }

    /// Estimated size of free-standing text (system prompt, notices).
    fn estimate_text(&self, text: &str) -> usize {
        self.estimate_block(&ContentBlock::text(text))
    }
}

/// Estimates tokens by dividing character counts by a fixed ratio.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl CharRatioEstimator {
    /// Create an estimator with a calibrated chars-per-token ratio. Ratios
    /// that are not finite and positive fall back to the default.
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn tokens_for(&self, chars: usize) -> usize {
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl SizeEstimator for CharRatioEstimator {
    fn estimate_block(&self, block: &ContentBlock) -> usize {
        let chars = match block {
            ContentBlock::Text { text } => char_count(text),
            ContentBlock::ToolCall {
                call_id,
                tool_name,
                arguments,
            } => {
                let args_len = serde_json::to_string(arguments).map_or(0, |s| char_count(&s));
                char_count(call_id) + char_count(tool_name) + args_len
            }
            ContentBlock::ToolResult {
                call_id, payload, ..
            } => char_count(call_id) + char_count(&payload_text(payload)),
        };
        self.tokens_for(chars)
    }
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Snapshot of context usage against a budget.
#[derive(Debug, Clone)]
pub struct ContextUsage {
    /// Estimated tokens consumed.
    pub estimated_tokens: usize,
    /// The budget measured against.
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    pub fn new(estimated_tokens: usize, max_tokens: usize) -> Self {
        let usage_pct = if max_tokens > 0 {
            estimated_tokens as f64 / max_tokens as f64
        } else {
            1.0
        };
        Self {
            estimated_tokens,
            max_tokens,
            usage_pct,
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}

/// Total estimated size of a turn sequence.
pub fn estimate_turns<'a>(
    estimator: &dyn SizeEstimator,
    turns: impl IntoIterator<Item = &'a Turn>,
) -> usize {
    turns.into_iter().map(|t| estimator.estimate_turn(t)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{HistoryStore, Role};
    use serde_json::{Map, json};

    #[test]
    fn text_tokens_round_up() {
        let est = CharRatioEstimator::new(4.0);
        assert_eq!(est.estimate_block(&ContentBlock::text("abcd")), 1);
        assert_eq!(est.estimate_block(&ContentBlock::text("abcde")), 2);
        assert_eq!(est.estimate_block(&ContentBlock::text("")), 0);
    }

    #[test]
    fn turn_adds_overhead() {
        let mut store = HistoryStore::new();
        let turn = store
            .append_turn(Role::User, vec![ContentBlock::text("a".repeat(40))])
            .unwrap();
        let est = CharRatioEstimator::new(4.0);
        assert_eq!(est.estimate_turn(turn), 10 + TURN_OVERHEAD_TOKENS);
    }

    #[test]
    fn tool_blocks_count_ids_and_payloads() {
        let est = CharRatioEstimator::new(1.0);
        let mut args = Map::new();
        args.insert("a".into(), json!(2));
        // "c1" + "add" + {"a":2}
        assert_eq!(
            est.estimate_block(&ContentBlock::tool_call("c1", "add", args)),
            2 + 3 + 7
        );
        assert_eq!(
            est.estimate_block(&ContentBlock::tool_result("c1", json!("four"), false)),
            2 + 4
        );
    }

    #[test]
    fn counts_characters_not_bytes() {
        let est = CharRatioEstimator::new(1.0);
        // Four characters, twelve bytes in UTF-8.
        assert_eq!(est.estimate_block(&ContentBlock::text("日本語!")), 4);
        assert_eq!(
            est.estimate_block(&ContentBlock::tool_result("c1", json!("é"), false)),
            2 + 1
        );
    }

    #[test]
    fn invalid_ratio_falls_back_to_default() {
        assert_eq!(
            CharRatioEstimator::new(0.0).chars_per_token(),
            DEFAULT_CHARS_PER_TOKEN
        );
        assert_eq!(
            CharRatioEstimator::new(f64::NAN).chars_per_token(),
            DEFAULT_CHARS_PER_TOKEN
        );
    }

    #[test]
    fn usage_log_string_format() {
        let usage = ContextUsage::new(500, 1000);
        assert_eq!(usage.to_log_string(), "context: ~500 tokens (50% of 1000)");
        assert_eq!(ContextUsage::new(5, 0).usage_pct, 1.0);
    }
}
