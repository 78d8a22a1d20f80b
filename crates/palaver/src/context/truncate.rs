//! Context truncation: select the turns that fit a size budget.
//!
//! History is never mutated here. The truncator takes a read-only slice of
//! turns and returns a [`ContextWindow`] borrowing the selected ones, so the
//! full conversation stays intact in the store while the model sees a
//! bounded view of it.
//!
//! Selection works on *atomic units*: the minimal contiguous span of turns
//! that must be kept or dropped together so that every tool call in the
//! window has its result and every result has its call. A turn that neither
//! issues nor answers tool calls is a unit on its own.
//!
//! Policy:
//! 1. The unit holding the most recent pinned turn is kept first.
//! 2. The newest unit is always kept, even when it alone exceeds the budget
//!    (an [`OverBudgetSingleUnitWarning`] is attached in that case).
//! 3. Older units are added newest-to-oldest until the next one would
//!    exceed the budget. Selection stops there; older units are not
//!    considered even if they are small.

use super::estimate::{ContextUsage, SizeEstimator};
use crate::conversation::{Snapshot, Turn};
use crate::error::OverBudgetSingleUnitWarning;
use std::collections::HashSet;
use std::ops::Range;
use tracing::debug;

/// Split turns into atomic units, returned as index ranges in order.
///
/// A unit starts at a turn and extends forward until every tool call issued
/// inside it has been answered. A unit whose calls are never answered runs to
/// the end of the slice.
pub fn atomic_units(turns: &[Turn]) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut start = 0;

    while start < turns.len() {
        let mut pending: HashSet<&str> = HashSet::new();
        let mut end = start;
        loop {
            let turn = &turns[end];
            for id in turn.tool_result_ids() {
                pending.remove(id);
            }
            pending.extend(turn.tool_call_ids());
            end += 1;
            if pending.is_empty() || end >= turns.len() {
                break;
            }
        }
        units.push(start..end);
        start = end;
    }

    units
}

/// The turns selected for one model call.
#[derive(Debug, Clone)]
pub struct ContextWindow<'a> {
    turns: Vec<&'a Turn>,
    estimated_tokens: usize,
    budget: usize,
    dropped_turns: usize,
    warning: Option<OverBudgetSingleUnitWarning>,
}

impl<'a> ContextWindow<'a> {
    /// Selected turns in original order.
    pub fn turns(&self) -> &[&'a Turn] {
        &self.turns
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Turn> + '_ {
        self.turns.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Estimated size of the selected turns.
    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of history turns left out of the window.
    pub fn dropped_turns(&self) -> usize {
        self.dropped_turns
    }

    pub fn was_truncated(&self) -> bool {
        self.dropped_turns > 0
    }

    pub fn warning(&self) -> Option<&OverBudgetSingleUnitWarning> {
        self.warning.as_ref()
    }

    pub fn usage(&self) -> ContextUsage {
        ContextUsage::new(self.estimated_tokens, self.budget)
    }
}

/// Budgeted, non-destructive turn selector.
pub struct Truncator<'e> {
    estimator: &'e dyn SizeEstimator,
    budget: usize,
}

impl<'e> Truncator<'e> {
    pub fn new(estimator: &'e dyn SizeEstimator, budget: usize) -> Self {
        Self { estimator, budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Select turns from a history snapshot.
    pub fn truncate<'a>(&self, snapshot: Snapshot<'a>) -> ContextWindow<'a> {
        self.truncate_turns(snapshot.as_slice())
    }

    /// Select turns from a slice. Same policy as [`truncate`](Self::truncate).
    pub fn truncate_turns<'a>(&self, turns: &'a [Turn]) -> ContextWindow<'a> {
        let units = atomic_units(turns);
        if units.is_empty() {
            return ContextWindow {
                turns: Vec::new(),
                estimated_tokens: 0,
                budget: self.budget,
                dropped_turns: 0,
                warning: None,
            };
        }

        let sizes: Vec<usize> = units
            .iter()
            .map(|range| {
                turns[range.clone()]
                    .iter()
                    .map(|t| self.estimator.estimate_turn(t))
                    .sum()
            })
            .collect();

        let mut included = vec![false; units.len()];
        let mut used = 0usize;

        if let Some(pinned) = units
            .iter()
            .rposition(|range| turns[range.clone()].iter().any(Turn::is_pinned))
        {
            included[pinned] = true;
            used += sizes[pinned];
        }

        let newest = units.len() - 1;
        let mut warning = None;
        if sizes[newest] > self.budget {
            warning = Some(OverBudgetSingleUnitWarning {
                unit_tokens: sizes[newest],
                budget: self.budget,
                turns: units[newest].len(),
            });
        }
        if !included[newest] {
            included[newest] = true;
            used += sizes[newest];
        }

        for idx in (0..newest).rev() {
            if included[idx] {
                continue;
            }
            if used + sizes[idx] > self.budget {
                break;
            }
            included[idx] = true;
            used += sizes[idx];
        }

        let selected: Vec<&'a Turn> = units
            .iter()
            .zip(&included)
            .filter(|(_, keep)| **keep)
            .flat_map(|(range, _)| turns[range.clone()].iter())
            .collect();
        let dropped_turns = turns.len() - selected.len();

        debug!(
            total_turns = turns.len(),
            kept_turns = selected.len(),
            dropped_turns,
            estimated_tokens = used,
            budget = self.budget,
            "Context window selected"
        );

        ContextWindow {
            turns: selected,
            estimated_tokens: used,
            budget: self.budget,
            dropped_turns,
            warning,
        }
    }
}
