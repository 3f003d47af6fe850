//! Normalisation contract: whatever the upstream model answers, the engine
//! yields a well-formed decision.

use wayfarer::decision::{normalize, AgentAction};

#[test]
fn every_input_yields_a_known_action() {
    let inputs = [
        "",
        "plain prose without structure",
        "{}",
        "{\"action\":\"click\"}",
        "{\"action\":\"CLICK\",\"targetId\":7}",
        "{\"action\":\"stop\"}",
        "{\"action\":\"fail\",\"thought\":\"it's hopeless\"}",
        "{\"action\":\"dance\"}",
        "```json\n{\"action\":\"scroll\",\"thought\":\"down we go\"}\n```",
        "Let me think... {\"action\":\"type\",\"targetId\":\"2\",\"inputValue\":\"hi\"} done.",
        "{\"broken\": tru",
        "{\"nested\":{\"action\":\"irrelevant\"},\"action\":\"wait\"}",
    ];
    for input in inputs {
        let decision = normalize(input);
        assert!(
            matches!(
                decision.action,
                AgentAction::Click
                    | AgentAction::Scroll
                    | AgentAction::Type
                    | AgentAction::Wait
                    | AgentAction::Done
            ),
            "input {input:?} produced {:?}",
            decision.action
        );
        assert!(!decision.thought.is_empty(), "input {input:?} lost the thought");
    }
}

#[test]
fn aliases_map_to_done() {
    assert_eq!(normalize("{\"action\":\"stop\"}").action, AgentAction::Done);
    assert_eq!(normalize("{\"action\":\"fail\"}").action, AgentAction::Done);
    assert_eq!(normalize("{\"action\":\"done\"}").action, AgentAction::Done);
}

#[test]
fn unknown_actions_become_wait() {
    for action in ["dance", "navigate", "hover", ""] {
        let raw = format!("{{\"action\":\"{action}\"}}");
        assert_eq!(normalize(&raw).action, AgentAction::Wait, "action {action:?}");
    }
}

#[test]
fn numeric_and_string_targets_are_stringified() {
    let a = normalize("{\"action\":\"click\",\"targetId\":12}");
    let b = normalize("{\"action\":\"click\",\"targetId\":\"12\"}");
    assert_eq!(a.target_id.as_deref(), Some("12"));
    assert_eq!(b.target_id.as_deref(), Some("12"));
}

#[test]
fn prose_around_the_object_is_tolerated() {
    let raw = "Of course! Considering the page layout, here is my decision:\n\n\
               {\"thought\":\"The search box is mark 4.\",\"action\":\"type\",\
               \"targetId\":\"4\",\"value\":\"running shoes\"}\n\nGood luck!";
    let decision = normalize(raw);
    assert_eq!(decision.action, AgentAction::Type);
    assert_eq!(decision.target_id.as_deref(), Some("4"));
    assert_eq!(decision.value.as_deref(), Some("running shoes"));
    assert_eq!(decision.thought, "The search box is mark 4.");
}
