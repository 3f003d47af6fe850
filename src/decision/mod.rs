//! Decision engine: prompt assembly, model invocation, answer normalisation
//! and the LLM-free monkey mode.

pub mod prompt;
pub mod provider;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::errors::AgentError;
use crate::perception::SomResult;
use provider::{DecisionProvider, DecisionRequest};

/// Normalised action set. `stop` and `fail` from the wire are aliases of
/// `Done`; anything unrecognised becomes `Wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Click,
    Scroll,
    Type,
    Wait,
    Done,
}

impl AgentAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Scroll => "scroll",
            Self::Type => "type",
            Self::Wait => "wait",
            Self::Done => "done",
        }
    }

    /// Actions that actually touch the page; used by the stagnation detector.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Click | Self::Type | Self::Scroll)
    }
}

/// One normalised decision per loop turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub thought: String,
    pub action: AgentAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Decision {
    pub fn wait(thought: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            action: AgentAction::Wait,
            target_id: None,
            value: None,
        }
    }

    /// Key used for loop-guard and stagnation grouping.
    pub fn group_key(&self) -> (AgentAction, Option<String>) {
        (self.action, self.target_id.clone())
    }
}

const DEFAULT_THOUGHT: &str = "I'm not sure what I'm seeing here, let me take a moment.";

/// Extract the first balanced `{…}` substring, tolerating fenced code blocks
/// and surrounding prose.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + idx + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalise any upstream text into a [`Decision`]. Never fails: unparsable
/// input degrades to a `wait`.
pub fn normalize(raw: &str) -> Decision {
    let Some(object) = extract_json_object(raw) else {
        return Decision::wait(DEFAULT_THOUGHT);
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&object) else {
        return Decision::wait(DEFAULT_THOUGHT);
    };

    let action = match value
        .get("action")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("click") => AgentAction::Click,
        Some("scroll") => AgentAction::Scroll,
        Some("type") => AgentAction::Type,
        Some("done") | Some("stop") | Some("fail") => AgentAction::Done,
        _ => AgentAction::Wait,
    };

    let thought = value
        .get("thought")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_THOUGHT)
        .to_string();

    let target_id = value.get("targetId").and_then(|v| match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    let input_value = value
        .get("value")
        .or_else(|| value.get("inputValue"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Decision {
        thought,
        action,
        target_id,
        value: input_value,
    }
}

/// Monkey mode: weighted random choice over observed marks, no model call.
pub fn monkey_decision(som: Option<&SomResult>, rng: &mut impl Rng) -> Decision {
    let Some(som) = som.filter(|s| !s.elements.is_empty()) else {
        return Decision {
            thought: "Monkey sees nothing to poke, scrolling onward.".to_string(),
            action: AgentAction::Scroll,
            target_id: None,
            value: None,
        };
    };

    let inputs: Vec<_> = som.elements.iter().filter(|e| e.is_input_like()).collect();
    let roll: f64 = rng.gen();
    if roll < 0.16 {
        Decision::wait("Monkey pauses to scratch its head.")
    } else if roll < 0.36 {
        Decision {
            thought: "Monkey flings the page downward.".to_string(),
            action: AgentAction::Scroll,
            target_id: None,
            value: None,
        }
    } else if roll < 0.56 && !inputs.is_empty() {
        let pick = inputs[rng.gen_range(0..inputs.len())];
        let words = ["banana", "test", "hello", "42", "why"];
        Decision {
            thought: format!("Monkey hammers on field #{}.", pick.id),
            action: AgentAction::Type,
            target_id: Some(pick.id.to_string()),
            value: Some(words[rng.gen_range(0..words.len())].to_string()),
        }
    } else {
        let pick = &som.elements[rng.gen_range(0..som.elements.len())];
        Decision {
            thought: format!("Monkey smacks mark #{}.", pick.id),
            action: AgentAction::Click,
            target_id: Some(pick.id.to_string()),
            value: None,
        }
    }
}

/// Orchestrates provider calls and degradation to `wait` on upstream trouble.
pub struct DecisionEngine {
    provider: Arc<dyn DecisionProvider>,
    model: String,
}

impl DecisionEngine {
    pub fn new(provider: Arc<dyn DecisionProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for the next decision. Upstream failures never escape:
    /// they degrade to a `wait` decision with an explanatory thought.
    pub async fn decide(&self, prompt: &str, screenshot_png: Option<&[u8]>) -> Decision {
        let request = DecisionRequest {
            prompt,
            screenshot_png,
            model: &self.model,
        };
        match self.provider.generate(request).await {
            Ok(raw) => {
                debug!(bytes = raw.len(), "model answered");
                normalize(&raw)
            }
            Err(AgentError::RateLimited) => Decision::wait(
                "The model is rate-limiting me, I'll hold still for a moment and retry.",
            ),
            Err(err) => {
                debug!(error = %err, "decision upstream failed");
                Decision::wait("Something went wrong talking to the model, waiting it out.")
            }
        }
    }
}
