//! Anti-loop behaviour: the loop-guard hint and the stagnation exit.

use wayfarer::decision::{AgentAction, Decision};
use wayfarer::run::{HistoryLog, StagnationDetector};

fn click(target: &str) -> Decision {
    Decision {
        thought: format!("clicking #{target}"),
        action: AgentAction::Click,
        target_id: Some(target.to_string()),
        value: None,
    }
}

fn scroll() -> Decision {
    Decision {
        thought: "scrolling".to_string(),
        action: AgentAction::Scroll,
        target_id: None,
        value: None,
    }
}

#[test]
fn hint_present_iff_pair_repeats_in_last_eight() {
    let mut history = HistoryLog::default();
    for i in 0..8 {
        history.push(click(&i.to_string()));
    }
    assert!(history.loop_guard_hint().is_none());

    history.push(click("2"));
    // Window is now entries 1..=8 plus the new one; #2 appears twice.
    assert!(history.loop_guard_hint().is_some());
}

#[test]
fn hint_lists_every_repeated_key() {
    let mut history = HistoryLog::default();
    history.push(click("1"));
    history.push(click("1"));
    history.push(scroll());
    history.push(scroll());
    let hint = history.loop_guard_hint().unwrap();
    assert!(hint.contains("click #1 (2x)"));
    assert!(hint.contains("scroll (2x)"));
    assert!(hint.contains("different mark"));
}

#[test]
fn alternating_identical_clicks_trigger_stagnation_on_third_tick() {
    // Scenario: ten turns of click #3 over and over.
    let mut history = HistoryLog::default();
    let mut detector = StagnationDetector::default();
    let mut exited_at = None;

    for turn in 1..=13 {
        history.push(click("3"));
        if detector.observe(&history) {
            exited_at = Some(turn);
            break;
        }
    }

    // Ticks begin once eight actionable entries share one key: turns 8, 9
    // and 10 tick, and the third tick ends the loop.
    assert_eq!(exited_at, Some(10));
}

#[test]
fn diverse_actions_never_stagnate() {
    let mut history = HistoryLog::default();
    let mut detector = StagnationDetector::default();
    for i in 0..40 {
        history.push(click(&(i % 10).to_string()));
        assert!(!detector.observe(&history), "stagnated at turn {i}");
    }
}

#[test]
fn waits_do_not_count_as_actionable() {
    let mut history = HistoryLog::default();
    let mut detector = StagnationDetector::default();
    for _ in 0..10 {
        history.push(Decision::wait("waiting"));
    }
    for _ in 0..6 {
        assert!(!detector.observe(&history));
    }
}
