//! Per-run ledgers: decision history, failed targets, anti-loop heuristics.

use std::collections::HashMap;

use crate::decision::{AgentAction, Decision};

/// How many history entries feed back into the prompt.
pub const PROMPT_WINDOW: usize = 10;
/// Window inspected by the loop-guard hint.
const LOOP_GUARD_WINDOW: usize = 8;
/// Window inspected by the stagnation detector.
const STAGNATION_WINDOW: usize = 10;
/// Consecutive stagnation ticks that end the run.
const STAGNATION_LIMIT: u32 = 3;

/// Ordered decision history for one run.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<Decision>,
}

impl HistoryLog {
    pub fn push(&mut self, decision: Decision) {
        self.entries.push(decision);
    }

    pub fn entries(&self) -> &[Decision] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tail(&self, n: usize) -> &[Decision] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Anti-loop paragraph for the prompt, present when some
    /// `(action, target)` pair repeats within the recent window.
    pub fn loop_guard_hint(&self) -> Option<String> {
        let window = self.tail(LOOP_GUARD_WINDOW);
        let mut counts: HashMap<(AgentAction, Option<String>), u32> = HashMap::new();
        for decision in window {
            *counts.entry(decision.group_key()).or_default() += 1;
        }
        let mut repeated: Vec<String> = counts
            .iter()
            .filter(|(_, count)| **count >= 2)
            .map(|((action, target), count)| match target {
                Some(id) => format!("{} #{id} ({count}x)", action.label()),
                None => format!("{} ({count}x)", action.label()),
            })
            .collect();
        if repeated.is_empty() {
            return None;
        }
        repeated.sort();
        Some(format!(
            "## Anti-loop warning\nYou have been repeating: {}. Choose a different mark this \
             time. If an overlay or menu is open, act inside it instead of the background page.",
            repeated.join(", ")
        ))
    }
}

/// Detects the loop converging on a handful of targets.
#[derive(Debug, Default)]
pub struct StagnationDetector {
    counter: u32,
}

impl StagnationDetector {
    /// Feed the detector after each appended decision. Returns `true` when
    /// the run should end.
    pub fn observe(&mut self, history: &HistoryLog) -> bool {
        let window = history.tail(STAGNATION_WINDOW);
        let actionable = window.iter().filter(|d| d.action.is_actionable()).count();
        let unique: std::collections::HashSet<_> = window
            .iter()
            .filter(|d| d.action.is_actionable())
            .map(|d| d.group_key())
            .collect();

        if actionable >= 8 && unique.len() <= 3 {
            self.counter += 1;
        } else {
            self.counter = self.counter.saturating_sub(1);
        }
        self.counter >= STAGNATION_LIMIT
    }

    pub fn ticks(&self) -> u32 {
        self.counter
    }
}

/// Failure counts per mark id. Informs prompt hints; decays whenever an
/// action on a fresh observation succeeds.
#[derive(Debug, Default)]
pub struct FailedTargetLedger {
    counts: HashMap<String, u32>,
}

impl FailedTargetLedger {
    pub fn charge(&mut self, mark: &str) {
        *self.counts.entry(mark.to_string()).or_default() += 1;
    }

    pub fn decay(&mut self) {
        self.counts.retain(|_, count| {
            *count -= 1;
            *count > 0
        });
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sorted snapshot for prompt assembly.
    pub fn snapshot(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<_> = self
            .counts
            .iter()
            .map(|(id, count)| (id.clone(), *count))
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(target: &str) -> Decision {
        Decision {
            thought: "clicking".to_string(),
            action: AgentAction::Click,
            target_id: Some(target.to_string()),
            value: None,
        }
    }

    fn wait() -> Decision {
        Decision::wait("waiting")
    }

    #[test]
    fn loop_guard_fires_on_repetition_in_window() {
        let mut history = HistoryLog::default();
        history.push(click("3"));
        assert!(history.loop_guard_hint().is_none());
        history.push(click("3"));
        let hint = history.loop_guard_hint().unwrap();
        assert!(hint.contains("click #3 (2x)"));
    }

    #[test]
    fn loop_guard_ignores_repeats_outside_window() {
        let mut history = HistoryLog::default();
        history.push(click("9"));
        history.push(click("9"));
        for i in 0..8 {
            history.push(click(&i.to_string()));
        }
        assert!(history.loop_guard_hint().is_none());
    }

    #[test]
    fn stagnation_needs_three_consecutive_ticks() {
        let mut history = HistoryLog::default();
        let mut detector = StagnationDetector::default();
        for _ in 0..10 {
            history.push(click("3"));
        }
        assert!(!detector.observe(&history));
        assert!(!detector.observe(&history));
        assert!(detector.observe(&history));
    }

    #[test]
    fn varied_targets_decay_the_counter() {
        let mut history = HistoryLog::default();
        let mut detector = StagnationDetector::default();
        for _ in 0..10 {
            history.push(click("3"));
        }
        detector.observe(&history);
        detector.observe(&history);
        assert_eq!(detector.ticks(), 2);
        for i in 0..10 {
            history.push(click(&i.to_string()));
        }
        assert!(!detector.observe(&history));
        assert_eq!(detector.ticks(), 1);
    }

    #[test]
    fn waits_are_not_actionable() {
        let mut history = HistoryLog::default();
        let mut detector = StagnationDetector::default();
        for _ in 0..10 {
            history.push(wait());
        }
        for _ in 0..5 {
            assert!(!detector.observe(&history));
        }
        assert_eq!(detector.ticks(), 0);
    }

    #[test]
    fn ledger_charges_and_decays() {
        let mut ledger = FailedTargetLedger::default();
        ledger.charge("4");
        ledger.charge("4");
        ledger.charge("7");
        assert_eq!(ledger.snapshot(), vec![("4".into(), 2), ("7".into(), 1)]);
        ledger.decay();
        assert_eq!(ledger.snapshot(), vec![("4".into(), 1)]);
        ledger.decay();
        assert!(ledger.is_empty());
    }
}
