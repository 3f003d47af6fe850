//! Set-of-Marks perception.
//!
//! Ships a self-contained traversal/scoring/overlay algorithm to the page,
//! then parses the returned mark metadata. Mark ids are dense from 0 and
//! stable only within one observation; re-injection reassigns them.

use std::time::Duration;

use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::warn;

use crate::browser::eval_value;
use crate::errors::AgentError;

const SOM_JS: &str = include_str!("js/som.js");

/// Attribute written onto each accepted element so the executor can locate it.
pub const MARK_ATTR: &str = "data-wf-mark";

/// Hard ceiling for one perception pass.
pub const SOM_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_MS: u64 = 500;
const STABILITY_CAP_MS: u64 = 3_000;
/// Upper bound on marks per observation.
pub const MAX_MARKS: usize = 220;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One accepted interactable candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SomElement {
    pub id: u32,
    pub tag: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    pub score: u8,
    pub rect: Rect,
}

impl SomElement {
    /// Best human-readable label for prompts, in preference order.
    pub fn label(&self) -> &str {
        self.text
            .as_deref()
            .or(self.aria_label.as_deref())
            .or(self.title.as_deref())
            .unwrap_or("")
    }

    /// Whether this mark looks like a text-entry control.
    pub fn is_input_like(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea")
            || matches!(
                self.role.as_deref(),
                Some("textbox") | Some("searchbox") | Some("combobox")
            )
    }
}

/// Result of one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SomResult {
    pub count: u32,
    pub elements: Vec<SomElement>,
}

impl SomResult {
    pub fn element(&self, id: u32) -> Option<&SomElement> {
        self.elements.iter().find(|e| e.id == id)
    }
}

/// Run a full perception pass on the active page.
///
/// Returns `None` when the injection throws or exceeds the ceiling; the loop
/// then proceeds with a raw screenshot.
pub async fn observe(page: &Page) -> Option<SomResult> {
    let params = json!({
        "quietMs": QUIET_MS,
        "capMs": STABILITY_CAP_MS,
        "maxMarks": MAX_MARKS,
        "markAttr": MARK_ATTR,
    });
    let expr = format!("({SOM_JS})({params})");

    match timeout(SOM_TIMEOUT, eval_value(page, &expr)).await {
        Ok(Ok(value)) => match serde_json::from_value::<SomResult>(value) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(error = %err, "perception returned unparsable payload");
                None
            }
        },
        Ok(Err(err)) => {
            warn!(error = %err, "perception injection failed");
            None
        }
        Err(_) => {
            warn!("perception exceeded {}s ceiling", SOM_TIMEOUT.as_secs());
            None
        }
    }
}

/// Toggle overlay visibility without re-running discovery. Used to produce a
/// clean operator capture when debug marks are off.
pub async fn set_overlay_visible(page: &Page, visible: bool) -> Result<(), AgentError> {
    let expr = format!(
        "(function(){{ if (window.__wfSom) window.__wfSom.setVisible({visible}); }})()"
    );
    eval_value(page, &expr)
        .await
        .map(|_| ())
        .map_err(|err| AgentError::perception(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: u32, tag: &str) -> SomElement {
        SomElement {
            id,
            tag: tag.to_string(),
            role: None,
            text: Some(format!("element {id}")),
            aria_label: None,
            title: None,
            href: None,
            score: 4,
            rect: Rect {
                x: 0.0,
                y: 0.0,
                width: 40.0,
                height: 20.0,
            },
        }
    }

    #[test]
    fn result_parses_from_page_payload() {
        let raw = serde_json::json!({
            "count": 2,
            "elements": [
                {"id": 0, "tag": "a", "role": null, "text": "Shop", "ariaLabel": null,
                 "title": null, "href": "/shop", "score": 4,
                 "rect": {"x": 1.0, "y": 2.0, "width": 80.0, "height": 24.0}},
                {"id": 1, "tag": "div", "role": "button", "text": null, "ariaLabel": "Menu",
                 "title": null, "href": null, "score": 3,
                 "rect": {"x": 10.0, "y": 20.0, "width": 30.0, "height": 30.0}}
            ]
        });
        let parsed: SomResult = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.count, 2);
        assert_eq!(parsed.element(1).unwrap().label(), "Menu");
        assert_eq!(parsed.element(0).unwrap().href.as_deref(), Some("/shop"));
    }

    #[test]
    fn ids_form_dense_prefix() {
        let result = SomResult {
            count: 3,
            elements: (0..3).map(|i| element(i, "button")).collect(),
        };
        for (idx, el) in result.elements.iter().enumerate() {
            assert_eq!(el.id as usize, idx);
        }
        assert_eq!(result.count as usize, result.elements.len());
    }

    #[test]
    fn input_like_covers_roles_and_tags() {
        assert!(element(0, "textarea").is_input_like());
        let mut span = element(1, "span");
        assert!(!span.is_input_like());
        span.role = Some("searchbox".to_string());
        assert!(span.is_input_like());
    }
}
