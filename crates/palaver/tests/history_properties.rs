//! Pairing and truncation properties over generated histories.

mod common;

use common::FixedTurnEstimator;
use palaver::context::{CharRatioEstimator, Truncator, atomic_units};
use palaver::conversation::{ContentBlock, HistoryStore, Role, Turn, validate_turns};
use palaver::error::HistoryError;
use proptest::prelude::*;
use serde_json::{Map, json};

/// One step of a generated conversation.
#[derive(Debug, Clone)]
enum Step {
    Text { agent: bool, len: usize },
    /// An agent turn issuing `calls` tool calls, answered by one tool turn.
    /// With `reuse_ids`, ids restart at `call_0` like per-response numbering.
    Exchange {
        calls: usize,
        result_len: usize,
        reuse_ids: bool,
    },
    /// Like `Exchange`, but each result gets its own tool turn.
    SplitExchange { calls: usize },
    Pinned { len: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (any::<bool>(), 1usize..400).prop_map(|(agent, len)| Step::Text { agent, len }),
        3 => (1usize..4, 1usize..600, any::<bool>()).prop_map(|(calls, result_len, reuse_ids)| {
            Step::Exchange {
                calls,
                result_len,
                reuse_ids,
            }
        }),
        1 => (2usize..4).prop_map(|calls| Step::SplitExchange { calls }),
        1 => (1usize..200).prop_map(|len| Step::Pinned { len }),
    ]
}

fn build(steps: &[Step]) -> HistoryStore {
    let mut store = HistoryStore::new();
    let mut next_id = 0usize;
    let mut fresh_id = || {
        next_id += 1;
        format!("call_{next_id}")
    };

    for step in steps {
        match *step {
            Step::Text { agent, len } => {
                let role = if agent { Role::Agent } else { Role::User };
                store
                    .append_turn(role, vec![ContentBlock::text("x".repeat(len))])
                    .unwrap();
            }
            Step::Pinned { len } => {
                store
                    .append_pinned_turn(Role::User, vec![ContentBlock::text("p".repeat(len))])
                    .unwrap();
            }
            Step::Exchange {
                calls,
                result_len,
                reuse_ids,
            } => {
                let ids: Vec<String> = if reuse_ids {
                    (0..calls).map(|i| format!("call_{i}")).collect()
                } else {
                    (0..calls).map(|_| fresh_id()).collect()
                };
                let call_blocks = ids
                    .iter()
                    .map(|id| ContentBlock::tool_call(id.as_str(), "calculator", Map::new()))
                    .collect();
                store.append_turn(Role::Agent, call_blocks).unwrap();
                let results = ids
                    .iter()
                    .map(|id| {
                        ContentBlock::tool_result(id.as_str(), json!("r".repeat(result_len)), false)
                    })
                    .collect();
                store.append_turn(Role::Tool, results).unwrap();
            }
            Step::SplitExchange { calls } => {
                let ids: Vec<String> = (0..calls).map(|_| fresh_id()).collect();
                let call_blocks = ids
                    .iter()
                    .map(|id| ContentBlock::tool_call(id.as_str(), "text_transform", Map::new()))
                    .collect();
                store.append_turn(Role::Agent, call_blocks).unwrap();
                for id in &ids {
                    store
                        .append_turn(
                            Role::Tool,
                            vec![ContentBlock::tool_result(id.as_str(), json!("ok"), false)],
                        )
                        .unwrap();
                }
            }
        }
    }
    store
}

fn sequences<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> Vec<u64> {
    turns.into_iter().map(Turn::sequence).collect()
}

proptest! {
    #[test]
    fn generated_histories_are_valid(steps in prop::collection::vec(step(), 0..30)) {
        let store = build(&steps);
        prop_assert!(store.validate().is_ok());
    }

    #[test]
    fn truncation_preserves_pairing(
        steps in prop::collection::vec(step(), 1..30),
        budget in 0usize..3_000,
    ) {
        let store = build(&steps);
        let estimator = CharRatioEstimator::default();
        let window = Truncator::new(&estimator, budget).truncate(store.snapshot());

        prop_assert!(validate_turns(window.iter()).is_ok());
        prop_assert!(!window.is_empty());
        // Sequence numbers stay in history order.
        let seqs = sequences(window.iter());
        prop_assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        // Only a pinned unit or an oversized newest unit may push the window
        // past the budget.
        if window.warning().is_none() && window.iter().all(|t| !t.is_pinned()) {
            prop_assert!(window.estimated_tokens() <= budget);
        }
    }

    #[test]
    fn truncation_is_monotonic_in_budget(
        steps in prop::collection::vec(step(), 1..30),
        a in 0usize..3_000,
        b in 0usize..3_000,
    ) {
        let (small, large) = if a <= b { (a, b) } else { (b, a) };
        let store = build(&steps);
        let estimator = CharRatioEstimator::default();
        let narrow = Truncator::new(&estimator, small).truncate(store.snapshot());
        let wide = Truncator::new(&estimator, large).truncate(store.snapshot());

        prop_assert!(narrow.len() <= wide.len());
        let wide_seqs = sequences(wide.iter());
        for seq in sequences(narrow.iter()) {
            prop_assert!(wide_seqs.contains(&seq));
        }
    }

    #[test]
    fn truncation_never_mutates_history(
        steps in prop::collection::vec(step(), 1..30),
        budget in 0usize..1_000,
    ) {
        let store = build(&steps);
        let before = store.snapshot().to_vec();
        let estimator = CharRatioEstimator::default();
        for factor in 1..4 {
            let _ = Truncator::new(&estimator, budget * factor).truncate(store.snapshot());
        }
        prop_assert_eq!(store.snapshot().to_vec(), before);
    }

    #[test]
    fn atomic_units_partition_the_history(steps in prop::collection::vec(step(), 0..30)) {
        let store = build(&steps);
        let turns = store.snapshot().as_slice();
        let units = atomic_units(turns);
        let mut expected_start = 0;
        for unit in &units {
            prop_assert_eq!(unit.start, expected_start);
            prop_assert!(validate_turns(&turns[unit.clone()]).is_ok());
            expected_start = unit.end;
        }
        prop_assert_eq!(expected_start, turns.len());
    }

    #[test]
    fn results_without_calls_are_rejected(
        steps in prop::collection::vec(step(), 0..10),
        id in "[a-z]{1,8}",
    ) {
        let mut store = build(&steps);
        let len = store.len();
        let orphan = ContentBlock::tool_result(format!("missing_{id}"), json!("x"), false);
        let err = store.append_turn(Role::Tool, vec![orphan]).unwrap_err();
        let is_dangling = matches!(err, HistoryError::DanglingToolResult { .. });
        prop_assert!(is_dangling);
        prop_assert_eq!(store.len(), len);
    }
}

// ── Fixed scenarios ──────────────────────────────────────────────────

/// Ten turns: eight plain turns followed by a call (turn 9) and its result
/// (turn 10). Every turn costs 10 tokens.
fn ten_turn_history() -> HistoryStore {
    let mut store = HistoryStore::new();
    for i in 1..=8 {
        let role = if i % 2 == 0 { Role::User } else { Role::Agent };
        store
            .append_turn(role, vec![ContentBlock::text(format!("turn {i}"))])
            .unwrap();
    }
    let mut args = Map::new();
    args.insert("expression".into(), json!("2+2"));
    store
        .append_turn(
            Role::Agent,
            vec![ContentBlock::tool_call("c9", "calculator", args)],
        )
        .unwrap();
    store
        .append_turn(Role::Tool, vec![ContentBlock::tool_result("c9", json!(4), false)])
        .unwrap();
    store
}

#[test]
fn budget_for_newest_unit_keeps_call_and_result_together() {
    let store = ten_turn_history();
    let estimator = FixedTurnEstimator(10);

    let window = Truncator::new(&estimator, 20).truncate(store.snapshot());
    assert_eq!(sequences(window.iter()), vec![8, 9]);
    assert_eq!(window.dropped_turns(), 8);
    assert!(window.warning().is_none());

    // A budget between one and two units still cannot split the pair.
    let window = Truncator::new(&estimator, 15).truncate(store.snapshot());
    assert_eq!(sequences(window.iter()), vec![8, 9]);
    assert!(window.warning().is_some());

    let window = Truncator::new(&estimator, 30).truncate(store.snapshot());
    assert_eq!(sequences(window.iter()), vec![7, 8, 9]);
}
