//! Prompt assembly for the think-aloud loop.

use crate::decision::Decision;
use crate::perception::SomResult;
use crate::persona::Persona;

/// Fixed navigation vocabulary used to surface menu-like labels.
const NAV_KEYWORDS: &[&str] = &[
    "menu", "nav", "home", "shop", "search", "login", "sign in", "account", "contact", "about",
    "products", "categories", "kontakt", "angebote", "suche", "warenkorb", "cart",
];

const BARE_RULES: &str = "You are a precise, evidence-driven web agent. Base every decision \
     only on what is visible in the screenshot and the listed marks. State \
     observations before conclusions and keep thoughts to one or two sentences.";

const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:
{"thought": "<first-person reasoning, 1-2 sentences>",
 "action": "click" | "scroll" | "type" | "wait" | "done",
 "targetId": "<mark number, for click/type>",
 "value": "<text to type, for type>"}
Use "done" once the mission is accomplished or clearly impossible."#;

/// Everything the prompt builder needs for one turn.
pub struct PromptContext<'a> {
    pub persona: &'a Persona,
    pub mission: &'a str,
    pub url: &'a str,
    pub title: &'a str,
    pub som: Option<&'a SomResult>,
    /// Mark ids that recently failed, with failure counts.
    pub failed_targets: Vec<(String, u32)>,
    /// Anti-loop paragraph, present when repetition was detected.
    pub loop_guard_hint: Option<String>,
    /// Recent decisions, oldest first.
    pub history: &'a [Decision],
    pub bare_mode: bool,
}

fn objective_keywords(mission: &str) -> Vec<String> {
    mission
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(str::to_lowercase)
        .collect()
}

fn menu_labels(som: &SomResult, mission: &str) -> Vec<String> {
    let objective = objective_keywords(mission);
    som.elements
        .iter()
        .filter_map(|el| {
            let label = el.label();
            if label.is_empty() {
                return None;
            }
            let lower = label.to_lowercase();
            let matches = NAV_KEYWORDS.iter().any(|kw| lower.contains(kw))
                || objective.iter().any(|kw| lower.contains(kw.as_str()));
            matches.then(|| format!("#{} {}", el.id, label))
        })
        .take(10)
        .collect()
}

fn format_mark_lines(som: &SomResult) -> Vec<String> {
    let mut ranked: Vec<_> = som.elements.iter().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
        .into_iter()
        .take(20)
        .map(|el| {
            let role = el
                .role
                .as_deref()
                .map(|r| format!(" role={r}"))
                .unwrap_or_default();
            format!("#{} <{}{}> \"{}\"", el.id, el.tag, role, el.label())
        })
        .collect()
}

fn format_history(history: &[Decision]) -> Vec<String> {
    let start = history.len().saturating_sub(10);
    history[start..]
        .iter()
        .enumerate()
        .map(|(offset, d)| {
            let mut line = format!(
                "step {}: {} -> {}",
                start + offset + 1,
                d.thought,
                d.action.label()
            );
            if let Some(target) = &d.target_id {
                line.push_str(&format!(" #{target}"));
            }
            if let Some(value) = &d.value {
                line.push_str(&format!(" \"{value}\""));
            }
            line
        })
        .collect()
}

/// Build the full prompt for one decision.
pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();

    if ctx.bare_mode {
        prompt.push_str(BARE_RULES);
    } else {
        prompt.push_str(&ctx.persona.base_prompt);
    }
    prompt.push_str("\n\n## Mission\n");
    prompt.push_str(ctx.mission);

    prompt.push_str("\n\n## Current page\n");
    prompt.push_str(&format!("URL: {}\nTitle: {}\n", ctx.url, ctx.title));

    match ctx.som {
        Some(som) => {
            prompt.push_str(&format!("Marked elements: {}\n", som.count));
            let menu = menu_labels(som, ctx.mission);
            if !menu.is_empty() {
                prompt.push_str("\n## Menu-like labels\n");
                for label in menu {
                    prompt.push_str(&label);
                    prompt.push('\n');
                }
            }
            prompt.push_str("\n## Strongest marks\n");
            for line in format_mark_lines(som) {
                prompt.push_str(&line);
                prompt.push('\n');
            }
        }
        None => {
            prompt.push_str(
                "Marked elements: none (perception unavailable, use the screenshot alone)\n",
            );
        }
    }

    if !ctx.failed_targets.is_empty() {
        prompt.push_str("\n## Targets that keep failing (avoid these)\n");
        for (id, count) in &ctx.failed_targets {
            prompt.push_str(&format!("#{id} failed {count}x\n"));
        }
    }

    if let Some(hint) = &ctx.loop_guard_hint {
        prompt.push_str("\n");
        prompt.push_str(hint);
        prompt.push('\n');
    }

    if !ctx.history.is_empty() {
        prompt.push_str("\n## Recent actions\n");
        for line in format_history(ctx.history) {
            prompt.push_str(&line);
            prompt.push('\n');
        }
    }

    prompt.push_str("\n");
    prompt.push_str(OUTPUT_CONTRACT);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::AgentAction;
    use crate::perception::{Rect, SomElement};
    use crate::persona;

    fn element(id: u32, text: &str, score: u8) -> SomElement {
        SomElement {
            id,
            tag: "a".to_string(),
            role: None,
            text: Some(text.to_string()),
            aria_label: None,
            title: None,
            href: None,
            score,
            rect: Rect {
                x: 0.0,
                y: 0.0,
                width: 60.0,
                height: 20.0,
            },
        }
    }

    fn base_context<'a>(persona: &'a Persona, som: Option<&'a SomResult>) -> PromptContext<'a> {
        PromptContext {
            persona,
            mission: "Find the cheapest bike",
            url: "https://example.com",
            title: "Example",
            som,
            failed_targets: Vec::new(),
            loop_guard_hint: None,
            history: &[],
            bare_mode: false,
        }
    }

    #[test]
    fn prompt_contains_persona_mission_and_contract() {
        let persona = persona::resolve("default");
        let prompt = build_prompt(&base_context(&persona, None));
        assert!(prompt.contains(&persona.base_prompt[..30]));
        assert!(prompt.contains("Find the cheapest bike"));
        assert!(prompt.contains("\"action\""));
    }

    #[test]
    fn bare_mode_swaps_persona_rules() {
        let persona = persona::resolve("default");
        let mut ctx = base_context(&persona, None);
        ctx.bare_mode = true;
        let prompt = build_prompt(&ctx);
        assert!(prompt.contains("evidence-driven"));
        assert!(!prompt.contains(&persona.base_prompt[..30]));
    }

    #[test]
    fn strongest_marks_capped_at_twenty() {
        let elements: Vec<_> = (0..40).map(|i| element(i, "Widget", 4)).collect();
        let som = SomResult {
            count: 40,
            elements,
        };
        let persona = persona::resolve("default");
        let prompt = build_prompt(&base_context(&persona, Some(&som)));
        let lines = prompt
            .lines()
            .filter(|l| l.starts_with('#') && l.contains("<a"))
            .count();
        assert_eq!(lines, 20);
    }

    #[test]
    fn menu_labels_match_objective_and_nav_keywords() {
        let som = SomResult {
            count: 3,
            elements: vec![
                element(0, "Shop", 4),
                element(1, "Cheapest bike deals", 3),
                element(2, "Imprint", 2),
            ],
        };
        let persona = persona::resolve("default");
        let prompt = build_prompt(&base_context(&persona, Some(&som)));
        assert!(prompt.contains("#0 Shop"));
        assert!(prompt.contains("#1 Cheapest bike deals"));
        assert!(!prompt.contains("#2 Imprint"));
    }

    #[test]
    fn history_limited_to_last_ten() {
        let history: Vec<Decision> = (0..15)
            .map(|i| Decision {
                thought: format!("thought {i}"),
                action: AgentAction::Click,
                target_id: Some(i.to_string()),
                value: None,
            })
            .collect();
        let persona = persona::resolve("default");
        let mut ctx = base_context(&persona, None);
        ctx.history = &history;
        let prompt = build_prompt(&ctx);
        assert!(!prompt.contains("step 5:"));
        assert!(prompt.contains("step 6:"));
        assert!(prompt.contains("step 15:"));
    }

    #[test]
    fn failed_targets_are_listed() {
        let persona = persona::resolve("default");
        let mut ctx = base_context(&persona, None);
        ctx.failed_targets = vec![("3".to_string(), 2)];
        let prompt = build_prompt(&ctx);
        assert!(prompt.contains("#3 failed 2x"));
    }
}
