//! The message history store: the ordered turns of one conversation.
//!
//! The store is append-only from the outside. Truncation for the context
//! window happens on a borrowed view (see [`crate::context::truncate`]) and
//! never touches the stored turns, so the full conversation stays available
//! for `/history` and `/export`.

use super::block::{ContentBlock, Role, Turn};
use crate::error::HistoryError;
use std::collections::HashSet;
use tracing::{debug, trace};

/// An opaque position in a [`HistoryStore`], used to undo a failed submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    generation: u64,
    len: usize,
    next_sequence: u64,
}

/// Owns the ordered turns of one conversation.
#[derive(Debug, Default, Clone)]
pub struct HistoryStore {
    turns: Vec<Turn>,
    next_sequence: u64,
    /// Bumped by `clear`, so marks taken earlier are recognizably stale.
    generation: u64,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, assigning it the next sequence number.
    ///
    /// Fails if a `ToolResult` references a call id that no earlier turn
    /// issued, if a result for that call was already recorded, or if a
    /// `ToolCall` reuses the id of a call still waiting for its result.
    ///
    /// Ids of answered calls may be issued again: many providers number
    /// calls per response (`call_0`, `call_1`, ...).
    pub fn append_turn(
        &mut self,
        role: Role,
        blocks: Vec<ContentBlock>,
    ) -> Result<&Turn, HistoryError> {
        self.push(role, blocks, false)
    }

    /// Append a turn the truncator must always keep (e.g. a task brief or
    /// instructions that anchor the whole conversation).
    pub fn append_pinned_turn(
        &mut self,
        role: Role,
        blocks: Vec<ContentBlock>,
    ) -> Result<&Turn, HistoryError> {
        self.push(role, blocks, true)
    }

    fn push(
        &mut self,
        role: Role,
        blocks: Vec<ContentBlock>,
        pinned: bool,
    ) -> Result<&Turn, HistoryError> {
        self.check_ids(&blocks)?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(
            "history: append #{sequence} role={role} blocks={}{}",
            blocks.len(),
            if pinned { " (pinned)" } else { "" }
        );
        self.turns.push(Turn::new(role, blocks, sequence, pinned));
        Ok(&self.turns[self.turns.len() - 1])
    }

    fn check_ids(&self, blocks: &[ContentBlock]) -> Result<(), HistoryError> {
        let mut pairing = Pairing::default();
        for turn in &self.turns {
            for id in turn.tool_result_ids() {
                pairing.answer(id);
            }
            for id in turn.tool_call_ids() {
                pairing.pending.insert(id);
            }
        }

        let mut new_calls: HashSet<&str> = HashSet::new();
        for block in blocks {
            match block {
                ContentBlock::ToolResult { call_id, .. } => {
                    pairing.check_result(call_id)?;
                }
                ContentBlock::ToolCall { call_id, .. } => {
                    if pairing.pending.contains(call_id.as_str())
                        || !new_calls.insert(call_id.as_str())
                    {
                        return Err(HistoryError::DuplicateToolCall {
                            call_id: call_id.clone(),
                        });
                    }
                }
                ContentBlock::Text { .. } => {}
            }
        }
        Ok(())
    }

    /// A read-only, restartable view of the current history.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot { turns: &self.turns }
    }

    /// Check that every tool call has a result and that nothing is wedged
    /// between a call and its result.
    ///
    /// A call may legitimately be pending while tools run; this is checked
    /// right before the history is serialized for the provider.
    pub fn validate(&self) -> Result<(), HistoryError> {
        validate_turns(&self.turns)
    }

    /// Remember the current position so it can be restored with
    /// [`rollback_to`](Self::rollback_to).
    pub fn mark(&self) -> Mark {
        Mark {
            generation: self.generation,
            len: self.turns.len(),
            next_sequence: self.next_sequence,
        }
    }

    /// A mark just before the turn at `index`: rolling back to it drops that
    /// turn and everything after it.
    pub fn mark_before(&self, index: usize) -> Option<Mark> {
        let turn = self.turns.get(index)?;
        Some(Mark {
            generation: self.generation,
            len: index,
            next_sequence: turn.sequence(),
        })
    }

    /// Drop every turn appended after `mark` and rewind the sequence counter.
    ///
    /// A mark taken before a [`clear`](Self::clear) no longer describes this
    /// store; rolling back to it is a no-op.
    pub fn rollback_to(&mut self, mark: Mark) {
        if mark.generation != self.generation || mark.len > self.turns.len() {
            debug!(
                "history: ignoring stale mark (generation {}, len {})",
                mark.generation, mark.len
            );
            return;
        }
        let dropped = self.turns.len() - mark.len;
        self.turns.truncate(mark.len);
        self.next_sequence = mark.next_sequence;
        if dropped > 0 {
            debug!("history: rolled back {dropped} turn(s)");
        }
    }

    /// Remove every turn. Sequence numbers restart from zero.
    pub fn clear(&mut self) {
        trace!("history: cleared {} turn(s)", self.turns.len());
        self.turns.clear();
        self.next_sequence = 0;
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// A borrowed, ordered view of the turns in a [`HistoryStore`].
///
/// `Snapshot` is `Copy`: iterate it as many times as needed, nothing is
/// consumed or cloned until the caller asks for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot<'a> {
    turns: &'a [Turn],
}

impl<'a> Snapshot<'a> {
    pub fn iter(&self) -> std::slice::Iter<'a, Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a Turn> {
        self.turns.get(index)
    }

    pub fn as_slice(&self) -> &'a [Turn] {
        self.turns
    }

    /// Clone the turns out of the store.
    pub fn to_vec(&self) -> Vec<Turn> {
        self.turns.to_vec()
    }
}

impl<'a> IntoIterator for Snapshot<'a> {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

impl<'a> IntoIterator for &Snapshot<'a> {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

/// Call ids waiting for a result, and ids whose calls were answered.
#[derive(Default)]
struct Pairing<'a> {
    pending: HashSet<&'a str>,
    answered: HashSet<&'a str>,
}

impl<'a> Pairing<'a> {
    fn answer(&mut self, call_id: &'a str) -> bool {
        if self.pending.remove(call_id) {
            self.answered.insert(call_id);
            true
        } else {
            false
        }
    }

    fn check_result(&mut self, call_id: &'a str) -> Result<(), HistoryError> {
        if self.answer(call_id) {
            Ok(())
        } else if self.answered.contains(call_id) {
            Err(HistoryError::DuplicateToolResult {
                call_id: call_id.to_string(),
            })
        } else {
            Err(HistoryError::DanglingToolResult {
                call_id: call_id.to_string(),
            })
        }
    }
}

/// Validate tool call / result pairing over any ordered turn sequence.
///
/// Rules:
/// - every result answers a call that an earlier turn issued and that has
///   no result yet;
/// - a call id is unique among unanswered calls, but may be issued again
///   once its previous call has been answered;
/// - once a turn issues calls, only result-bearing turns may follow until all
///   of them are answered;
/// - no call is left unanswered at the end.
pub fn validate_turns<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> Result<(), HistoryError> {
    let mut pairing = Pairing::default();
    // Outstanding calls in issue order, so errors name the oldest one.
    let mut pending: Vec<&str> = Vec::new();

    for turn in turns {
        if !pending.is_empty() && !turn.has_tool_results() {
            return Err(HistoryError::InterleavedTurn {
                call_id: pending[0].to_string(),
                sequence: turn.sequence(),
            });
        }

        for call_id in turn.tool_result_ids() {
            pairing.check_result(call_id)?;
            pending.retain(|p| *p != call_id);
        }

        for call_id in turn.tool_call_ids() {
            if !pairing.pending.insert(call_id) {
                return Err(HistoryError::DuplicateToolCall {
                    call_id: call_id.to_string(),
                });
            }
            pending.push(call_id);
        }
    }

    match pending.first() {
        Some(call_id) => Err(HistoryError::UnpairedToolCall {
            call_id: call_id.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn call(id: &str) -> ContentBlock {
        ContentBlock::tool_call(id, "calculator", Map::new())
    }

    fn result(id: &str) -> ContentBlock {
        ContentBlock::tool_result(id, json!("ok"), false)
    }

    #[test]
    fn append_assigns_monotonic_sequence_numbers() {
        let mut store = HistoryStore::new();
        let a = store
            .append_turn(Role::User, vec![ContentBlock::text("hi")])
            .unwrap()
            .sequence();
        let b = store
            .append_turn(Role::Agent, vec![ContentBlock::text("hello")])
            .unwrap()
            .sequence();
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn dangling_result_is_rejected() {
        let mut store = HistoryStore::new();
        let err = store.append_turn(Role::Tool, vec![result("c9")]).unwrap_err();
        assert_eq!(
            err,
            HistoryError::DanglingToolResult {
                call_id: "c9".into()
            }
        );
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_call_and_result_ids_are_rejected() {
        let mut store = HistoryStore::new();
        store.append_turn(Role::Agent, vec![call("c1")]).unwrap();
        assert!(matches!(
            store.append_turn(Role::Agent, vec![call("c1")]),
            Err(HistoryError::DuplicateToolCall { .. })
        ));
        assert!(matches!(
            store.append_turn(Role::Agent, vec![call("c2"), call("c2")]),
            Err(HistoryError::DuplicateToolCall { .. })
        ));
        store.append_turn(Role::Tool, vec![result("c1")]).unwrap();
        assert!(matches!(
            store.append_turn(Role::Tool, vec![result("c1")]),
            Err(HistoryError::DuplicateToolResult { .. })
        ));
    }

    #[test]
    fn answered_call_ids_may_be_issued_again() {
        let mut store = HistoryStore::new();
        for question in ["2+2?", "3+3?"] {
            store
                .append_turn(Role::User, vec![ContentBlock::text(question)])
                .unwrap();
            store
                .append_turn(Role::Agent, vec![call("call_0"), call("call_1")])
                .unwrap();
            store
                .append_turn(Role::Tool, vec![result("call_0"), result("call_1")])
                .unwrap();
        }
        assert_eq!(store.len(), 6);
        assert_eq!(store.validate(), Ok(()));

        // Both calls are answered, so a third result is still a duplicate.
        assert_eq!(
            store.append_turn(Role::Tool, vec![result("call_0")]).unwrap_err(),
            HistoryError::DuplicateToolResult {
                call_id: "call_0".into()
            }
        );
    }

    #[test]
    fn validate_flags_pending_call() {
        let mut store = HistoryStore::new();
        store
            .append_turn(Role::User, vec![ContentBlock::text("2+2?")])
            .unwrap();
        store.append_turn(Role::Agent, vec![call("c1")]).unwrap();
        assert_eq!(
            store.validate(),
            Err(HistoryError::UnpairedToolCall {
                call_id: "c1".into()
            })
        );
        store.append_turn(Role::Tool, vec![result("c1")]).unwrap();
        assert_eq!(store.validate(), Ok(()));
    }

    #[test]
    fn validate_flags_interleaved_turn() {
        let mut store = HistoryStore::new();
        store.append_turn(Role::Agent, vec![call("c1")]).unwrap();
        store
            .append_turn(Role::User, vec![ContentBlock::text("wait")])
            .unwrap();
        store.append_turn(Role::Tool, vec![result("c1")]).unwrap();
        assert_eq!(
            store.validate(),
            Err(HistoryError::InterleavedTurn {
                call_id: "c1".into(),
                sequence: 1
            })
        );
    }

    #[test]
    fn results_may_span_several_tool_turns() {
        let mut store = HistoryStore::new();
        store
            .append_turn(Role::Agent, vec![call("c1"), call("c2")])
            .unwrap();
        store.append_turn(Role::Tool, vec![result("c1")]).unwrap();
        store.append_turn(Role::Tool, vec![result("c2")]).unwrap();
        assert_eq!(store.validate(), Ok(()));
    }

    #[test]
    fn validate_turns_catches_result_without_call() {
        let mut store = HistoryStore::new();
        store.append_turn(Role::Agent, vec![call("c1")]).unwrap();
        store.append_turn(Role::Tool, vec![result("c1")]).unwrap();
        // A window that kept the result but lost the call.
        let window: Vec<&Turn> = store.snapshot().iter().skip(1).collect();
        assert!(matches!(
            validate_turns(window),
            Err(HistoryError::DanglingToolResult { .. })
        ));
    }

    #[test]
    fn snapshot_is_restartable() {
        let mut store = HistoryStore::new();
        store
            .append_turn(Role::User, vec![ContentBlock::text("a")])
            .unwrap();
        store
            .append_turn(Role::Agent, vec![ContentBlock::text("b")])
            .unwrap();
        let snap = store.snapshot();
        let first: Vec<u64> = snap.iter().map(Turn::sequence).collect();
        let second: Vec<u64> = snap.into_iter().map(Turn::sequence).collect();
        assert_eq!(first, second);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn rollback_restores_turns_and_sequence() {
        let mut store = HistoryStore::new();
        store
            .append_turn(Role::User, vec![ContentBlock::text("a")])
            .unwrap();
        let before = store.snapshot().to_vec();
        let mark = store.mark();
        store
            .append_turn(Role::User, vec![ContentBlock::text("b")])
            .unwrap();
        store.append_turn(Role::Agent, vec![call("c1")]).unwrap();
        store.rollback_to(mark);
        assert_eq!(store.snapshot().to_vec(), before);
        let next = store
            .append_turn(Role::User, vec![ContentBlock::text("c")])
            .unwrap();
        assert_eq!(next.sequence(), 1);
    }

    #[test]
    fn mark_before_drops_the_marked_turn() {
        let mut store = HistoryStore::new();
        for text in ["a", "b", "c"] {
            store
                .append_turn(Role::User, vec![ContentBlock::text(text)])
                .unwrap();
        }
        assert!(store.mark_before(3).is_none());
        let mark = store.mark_before(1).unwrap();
        store.rollback_to(mark);
        assert_eq!(store.len(), 1);
        let next = store
            .append_turn(Role::User, vec![ContentBlock::text("b2")])
            .unwrap();
        assert_eq!(next.sequence(), 1);
    }

    #[test]
    fn stale_mark_after_clear_is_ignored() {
        let mut store = HistoryStore::new();
        store
            .append_turn(Role::User, vec![ContentBlock::text("a")])
            .unwrap();
        let mark = store.mark();
        store.clear();
        store.rollback_to(mark);
        assert!(store.is_empty());
    }

    #[test]
    fn mark_from_before_clear_does_not_drop_new_turns() {
        let mut store = HistoryStore::new();
        store
            .append_turn(Role::User, vec![ContentBlock::text("a")])
            .unwrap();
        let mark = store.mark();
        store.clear();
        for text in ["b", "c", "d"] {
            store
                .append_turn(Role::User, vec![ContentBlock::text(text)])
                .unwrap();
        }
        store.rollback_to(mark);
        assert_eq!(store.len(), 3);
        assert_eq!(store.last().map(Turn::text).as_deref(), Some("d"));
    }

    #[test]
    fn pinned_flag_is_recorded() {
        let mut store = HistoryStore::new();
        let turn = store
            .append_pinned_turn(Role::User, vec![ContentBlock::text("brief")])
            .unwrap();
        assert!(turn.is_pinned());
    }
}
