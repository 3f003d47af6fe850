//! Realises decided actions on the active page.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType,
};
use chromiumoxide::Page;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::debug;

use crate::browser::{eval_value, CursorDriver};
use crate::errors::AgentError;
use crate::perception::{Rect, MARK_ATTR};

const LOCATE_MARK_JS: &str = include_str!("js/locate_mark.js");
const NEAREST_FILLABLE_JS: &str = include_str!("js/nearest_fillable.js");
const CLEAR_FOCUSED_JS: &str = r#"(function () {
  const el = document.activeElement;
  if (!el) return false;
  if (el.isContentEditable) { el.textContent = ''; return true; }
  if ('value' in el) {
    el.value = '';
    el.dispatchEvent(new Event('input', { bubbles: true }));
    return true;
  }
  return false;
})()"#;

/// Fixed sleep for the `wait` action.
pub const WAIT_ACTION: Duration = Duration::from_millis(2_000);

#[derive(Debug, Deserialize)]
struct LocateResult {
    found: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    rect: Option<Rect>,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    fillable: Option<bool>,
}

/// Result of a successful click.
#[derive(Debug, Clone)]
pub struct ClickOutcome {
    pub selector: String,
    pub x: f64,
    pub y: f64,
}

/// Result of a successful type action.
#[derive(Debug, Clone)]
pub struct TypeOutcome {
    pub selector: String,
    pub x: f64,
    pub y: f64,
    /// The decided mark was not fillable and a nearby field was used instead.
    pub fallback_used: bool,
}

pub struct ActionExecutor {
    cursor: Arc<CursorDriver>,
}

impl ActionExecutor {
    pub fn new(cursor: Arc<CursorDriver>) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> &CursorDriver {
        &self.cursor
    }

    /// Click the element carrying the given mark.
    pub async fn click_mark(&self, page: &Page, mark: &str) -> Result<ClickOutcome, AgentError> {
        let located = self.locate(page, mark).await?;
        let rect = located
            .rect
            .ok_or_else(|| AgentError::action(mark, "missing bounding rectangle"))?;
        let (x, y) = pick_point(&rect, &mut rand::thread_rng());
        self.cursor.click_at(page, x, y).await?;
        Ok(ClickOutcome {
            selector: located.selector.unwrap_or_default(),
            x,
            y,
        })
    }

    /// Focus-click the mark and type into it, falling back to the nearest
    /// visible fillable field when the mark itself cannot take text.
    pub async fn type_into_mark(
        &self,
        page: &Page,
        mark: &str,
        value: &str,
    ) -> Result<TypeOutcome, AgentError> {
        let located = self.locate(page, mark).await?;
        let rect = located
            .rect
            .ok_or_else(|| AgentError::action(mark, "missing bounding rectangle"))?;
        let (mut x, mut y) = pick_point(&rect, &mut rand::thread_rng());
        self.cursor.click_at(page, x, y).await?;

        let mut selector = located.selector.unwrap_or_default();
        let mut fallback_used = false;
        if !located.fillable.unwrap_or(false) {
            let params = json!({ "x": x, "y": y });
            let expr = format!("({NEAREST_FILLABLE_JS})({params})");
            let nearest: LocateResult = serde_json::from_value(eval_value(page, &expr).await?)
                .map_err(|err| AgentError::action(mark, format!("fallback parse: {err}")))?;
            if !nearest.found {
                return Err(AgentError::action(
                    mark,
                    "target not fillable and no fillable field nearby",
                ));
            }
            let rect = nearest
                .rect
                .ok_or_else(|| AgentError::action(mark, "fallback missing rectangle"))?;
            let center = rect.center();
            x = center.0;
            y = center.1;
            selector = nearest.selector.unwrap_or_default();
            fallback_used = true;
            self.cursor.click_at(page, x, y).await?;
        }

        eval_value(page, CLEAR_FOCUSED_JS).await?;
        self.type_text(page, value).await?;
        Ok(TypeOutcome {
            selector,
            x,
            y,
            fallback_used,
        })
    }

    /// Nudge the cursor, then wheel-scroll. Returns the applied delta.
    pub async fn scroll(&self, page: &Page) -> Result<f64, AgentError> {
        self.cursor.nudge(page).await?;
        let delta: f64 = rand::thread_rng().gen_range(320.0..=680.0);
        self.cursor.wheel(page, delta).await?;
        Ok(delta)
    }

    pub async fn wait(&self) {
        sleep(WAIT_ACTION).await;
    }

    /// Type text into the focused element, one key event per character.
    pub async fn type_text(&self, page: &Page, value: &str) -> Result<(), AgentError> {
        for ch in value.chars() {
            let params = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .text(ch.to_string())
                .build()
                .map_err(AgentError::perception)?;
            page.execute(params)
                .await
                .map_err(|err| AgentError::perception(err.to_string()))?;
            let delay: u64 = rand::thread_rng().gen_range(35..=85);
            sleep(Duration::from_millis(delay)).await;
        }
        debug!(chars = value.chars().count(), "typed value");
        Ok(())
    }

    async fn locate(&self, page: &Page, mark: &str) -> Result<LocateResult, AgentError> {
        let params = json!({ "attr": MARK_ATTR, "id": mark });
        let expr = format!("({LOCATE_MARK_JS})({params})");
        let located: LocateResult = serde_json::from_value(eval_value(page, &expr).await?)
            .map_err(|err| AgentError::action(mark, format!("locate parse: {err}")))?;
        if !located.found {
            let reason = located
                .reason
                .unwrap_or_else(|| "missing element".to_string());
            return Err(AgentError::action(mark, reason));
        }
        Ok(located)
    }
}

/// Random point inside the rectangle, inset by 20% of the minor dimension
/// clamped to 2–10 px.
fn pick_point(rect: &Rect, rng: &mut impl Rng) -> (f64, f64) {
    let inset = (rect.width.min(rect.height) * 0.2).clamp(2.0, 10.0);
    let x = if rect.width > inset * 2.0 {
        rng.gen_range(rect.x + inset..=rect.x + rect.width - inset)
    } else {
        rect.x + rect.width / 2.0
    };
    let y = if rect.height > inset * 2.0 {
        rng.gen_range(rect.y + inset..=rect.y + rect.height - inset)
    } else {
        rect.y + rect.height / 2.0
    };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn picked_point_stays_inside_rect() {
        let rect = Rect {
            x: 100.0,
            y: 50.0,
            width: 120.0,
            height: 40.0,
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..64 {
            let (x, y) = pick_point(&rect, &mut rng);
            assert!(x >= rect.x && x <= rect.x + rect.width);
            assert!(y >= rect.y && y <= rect.y + rect.height);
        }
    }

    #[test]
    fn tiny_rect_falls_back_to_center() {
        let rect = Rect {
            x: 10.0,
            y: 10.0,
            width: 3.0,
            height: 3.0,
        };
        let mut rng = StdRng::seed_from_u64(2);
        let (x, y) = pick_point(&rect, &mut rng);
        assert_eq!((x, y), (11.5, 11.5));
    }
}
