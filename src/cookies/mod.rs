//! Layered cookie-banner recognition and dismissal.
//!
//! Runs at the top of every loop turn. Escalates DOM selectors → accept-phrase
//! search → iframes → vision-coordinate click until the surface disappears.
//! Never fatal: failures are absorbed and the next turn may retry.

use std::time::Duration;

use chromiumoxide::Page;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::browser::{eval_value, CursorDriver};

const DETECT_JS: &str = include_str!("js/cookie_detect.js");
const DISMISS_JS: &str = include_str!("js/cookie_dismiss.js");
const VISION_JS: &str = include_str!("js/cookie_vision.js");

/// Settle time before re-running detection after an attempt.
const RECHECK_DELAY: Duration = Duration::from_millis(850);

/// Which layer got rid of the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieLayer {
    StrictSelector,
    ContainerText,
    Iframe,
    VisionFallback,
}

impl CookieLayer {
    pub fn label(&self) -> &'static str {
        match self {
            Self::StrictSelector => "cookie banner selector",
            Self::ContainerText => "cookie banner text match",
            Self::Iframe => "cookie banner iframe",
            Self::VisionFallback => "cookie banner vision fallback",
        }
    }
}

/// Outcome of one cookie pass.
#[derive(Debug, Clone)]
pub enum CookieOutcome {
    /// No cookie surface present, or nothing worked this turn.
    Untouched,
    /// The surface was dismissed.
    Dismissed {
        layer: CookieLayer,
        label: String,
        /// Click coordinates, set for the vision fallback.
        coords: Option<(f64, f64)>,
    },
}

#[derive(Debug, Deserialize)]
struct DismissResult {
    clicked: bool,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisionResult {
    found: bool,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    label: Option<String>,
}

async fn surface_present(page: &Page) -> bool {
    match eval_value(page, DETECT_JS).await {
        Ok(value) => value.as_bool().unwrap_or(false),
        Err(err) => {
            debug!(error = %err, "cookie detection failed");
            false
        }
    }
}

async fn try_dom_layer(page: &Page, layer: &str) -> Option<String> {
    let params = json!({ "layer": layer });
    let expr = format!("({DISMISS_JS})({params})");
    match eval_value(page, &expr).await {
        Ok(value) => match serde_json::from_value::<DismissResult>(value) {
            Ok(result) if result.clicked => Some(result.label.unwrap_or_default()),
            _ => None,
        },
        Err(err) => {
            debug!(error = %err, layer, "cookie layer failed");
            None
        }
    }
}

/// Run one full cookie pass on the active page. Returns quickly when no
/// surface is detected.
pub async fn dismiss_pass(page: &Page, cursor: &CursorDriver) -> CookieOutcome {
    if !surface_present(page).await {
        return CookieOutcome::Untouched;
    }
    debug!("cookie surface detected, escalating through dismissal layers");

    let dom_layers = [
        (CookieLayer::StrictSelector, "strict"),
        (CookieLayer::ContainerText, "container-text"),
        (CookieLayer::Iframe, "iframe"),
    ];
    for (layer, key) in dom_layers {
        if let Some(label) = try_dom_layer(page, key).await {
            sleep(RECHECK_DELAY).await;
            if !surface_present(page).await {
                return CookieOutcome::Dismissed {
                    layer,
                    label,
                    coords: None,
                };
            }
        }
    }

    // Last resort: locate the strongest accept phrase on screen and click
    // its centre with real mouse motion.
    match eval_value(page, VISION_JS).await {
        Ok(value) => match serde_json::from_value::<VisionResult>(value) {
            Ok(vision) if vision.found => {
                let label = vision.label.unwrap_or_default();
                if let Err(err) = cursor.click_at(page, vision.x, vision.y).await {
                    warn!(error = %err, "vision fallback click failed");
                    return CookieOutcome::Untouched;
                }
                sleep(RECHECK_DELAY).await;
                if !surface_present(page).await {
                    return CookieOutcome::Dismissed {
                        layer: CookieLayer::VisionFallback,
                        label,
                        coords: Some((vision.x, vision.y)),
                    };
                }
                CookieOutcome::Untouched
            }
            _ => CookieOutcome::Untouched,
        },
        Err(err) => {
            debug!(error = %err, "cookie vision scan failed");
            CookieOutcome::Untouched
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_labels_name_their_source() {
        assert_eq!(
            CookieLayer::VisionFallback.label(),
            "cookie banner vision fallback"
        );
        assert_eq!(CookieLayer::StrictSelector.label(), "cookie banner selector");
    }

    #[test]
    fn dismiss_result_parses_partial_payload() {
        let result: DismissResult = serde_json::from_value(json!({ "clicked": false })).unwrap();
        assert!(!result.clicked);
        let result: DismissResult =
            serde_json::from_value(json!({ "clicked": true, "label": "Alle akzeptieren" }))
                .unwrap();
        assert_eq!(result.label.as_deref(), Some("Alle akzeptieren"));
    }

    #[test]
    fn vision_result_defaults_coordinates() {
        let result: VisionResult = serde_json::from_value(json!({ "found": false })).unwrap();
        assert!(!result.found);
        assert_eq!(result.x, 0.0);
    }
}
