//! Trace replay: the executable companion script and the runner that applies
//! it to a browser harness.
//!
//! The script is an op list derived deterministically from the trace; the
//! same derivation feeds the live runner and the test double, so what is
//! written is exactly what replays.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::trace::{TraceFile, TraceKind, TraceStep};
use crate::errors::AgentError;

/// One idempotent replay operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ReplayOp {
    Goto { url: String },
    ClickSelector { selector: String },
    ClickAt { x: f64, y: f64 },
    FillSelector { selector: String, value: String },
    FillAt { x: f64, y: f64, value: String },
    Scroll { delta_y: f64 },
    Wait { ms: u64 },
    TabSwitch,
}

impl ReplayOp {
    /// Derive the operation for one trace step. Selector targeting is
    /// preferred; coordinates are the fallback.
    pub fn from_step(step: &TraceStep) -> Option<Self> {
        match step.kind {
            TraceKind::Goto => Some(Self::Goto {
                url: step.url.clone(),
            }),
            TraceKind::Click => match (&step.selector, step.x, step.y) {
                (Some(selector), _, _) if !selector.is_empty() => Some(Self::ClickSelector {
                    selector: selector.clone(),
                }),
                (_, Some(x), Some(y)) => Some(Self::ClickAt { x, y }),
                _ => None,
            },
            TraceKind::Type => {
                let value = step.value.clone()?;
                match (&step.selector, step.x, step.y) {
                    (Some(selector), _, _) if !selector.is_empty() => Some(Self::FillSelector {
                        selector: selector.clone(),
                        value,
                    }),
                    (_, Some(x), Some(y)) => Some(Self::FillAt { x, y, value }),
                    _ => None,
                }
            }
            TraceKind::Scroll => Some(Self::Scroll {
                delta_y: step.delta_y.unwrap_or(400.0),
            }),
            TraceKind::Wait => Some(Self::Wait {
                ms: step.wait_ms.unwrap_or(2_000),
            }),
            TraceKind::TabSwitch => Some(Self::TabSwitch),
        }
    }
}

/// The emitted replay script: header plus op list, consumed by
/// `wayfarer replay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    pub version: u32,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub start_url: String,
    pub ops: Vec<ReplayOp>,
}

impl ReplayScript {
    pub fn from_trace(trace: &TraceFile) -> Self {
        let ops = trace.steps.iter().filter_map(ReplayOp::from_step).collect();
        Self {
            version: super::trace::TRACE_VERSION,
            run_id: trace.run_id.clone(),
            created_at: trace.created_at,
            start_url: trace.start_url.clone(),
            ops,
        }
    }
}

/// Browser harness the runner drives. The real implementation wraps the CDP
/// session; tests substitute a deterministic double.
#[async_trait]
pub trait ReplayDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), AgentError>;
    async fn click_selector(&mut self, selector: &str) -> Result<(), AgentError>;
    async fn click_at(&mut self, x: f64, y: f64) -> Result<(), AgentError>;
    async fn fill_selector(&mut self, selector: &str, value: &str) -> Result<(), AgentError>;
    async fn fill_at(&mut self, x: f64, y: f64, value: &str) -> Result<(), AgentError>;
    async fn scroll(&mut self, delta_y: f64) -> Result<(), AgentError>;
    async fn wait(&mut self, ms: u64) -> Result<(), AgentError>;
    /// Switch to the most recently opened page.
    async fn tab_switch(&mut self) -> Result<(), AgentError>;
}

/// Apply a script op-by-op, in order.
pub async fn run_script(
    script: &ReplayScript,
    driver: &mut dyn ReplayDriver,
) -> Result<usize, AgentError> {
    for (idx, op) in script.ops.iter().enumerate() {
        info!(step = idx, op = ?op, "replaying");
        match op {
            ReplayOp::Goto { url } => driver.goto(url).await?,
            ReplayOp::ClickSelector { selector } => driver.click_selector(selector).await?,
            ReplayOp::ClickAt { x, y } => driver.click_at(*x, *y).await?,
            ReplayOp::FillSelector { selector, value } => {
                driver.fill_selector(selector, value).await?
            }
            ReplayOp::FillAt { x, y, value } => driver.fill_at(*x, *y, value).await?,
            ReplayOp::Scroll { delta_y } => driver.scroll(*delta_y).await?,
            ReplayOp::Wait { ms } => driver.wait(*ms).await?,
            ReplayOp::TabSwitch => driver.tab_switch().await?,
        }
    }
    Ok(script.ops.len())
}

/// Live driver over a chromiumoxide session, used by the `replay` command.
pub struct CdpReplayDriver {
    session: crate::browser::BrowserSession,
}

impl CdpReplayDriver {
    pub fn new(session: crate::browser::BrowserSession) -> Self {
        Self { session }
    }

    pub async fn close(self) {
        self.session.close().await;
    }
}

#[async_trait]
impl ReplayDriver for CdpReplayDriver {
    async fn goto(&mut self, url: &str) -> Result<(), AgentError> {
        self.session.navigate(url).await
    }

    async fn click_selector(&mut self, selector: &str) -> Result<(), AgentError> {
        let element = self
            .session
            .active()
            .find_element(selector)
            .await
            .map_err(|err| AgentError::action(selector, err.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| AgentError::action(selector, err.to_string()))?;
        Ok(())
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<(), AgentError> {
        use chromiumoxide::cdp::browser_protocol::input::{
            DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
        };
        let page = self.session.active();
        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let params = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(x)
                .y(y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(AgentError::perception)?;
            page.execute(params)
                .await
                .map_err(|err| AgentError::perception(err.to_string()))?;
        }
        Ok(())
    }

    async fn fill_selector(&mut self, selector: &str, value: &str) -> Result<(), AgentError> {
        let element = self
            .session
            .active()
            .find_element(selector)
            .await
            .map_err(|err| AgentError::action(selector, err.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| AgentError::action(selector, err.to_string()))?;
        element
            .type_str(value)
            .await
            .map_err(|err| AgentError::action(selector, err.to_string()))?;
        Ok(())
    }

    async fn fill_at(&mut self, x: f64, y: f64, value: &str) -> Result<(), AgentError> {
        self.click_at(x, y).await?;
        use chromiumoxide::cdp::browser_protocol::input::{
            DispatchKeyEventParams, DispatchKeyEventType,
        };
        let page = self.session.active();
        for ch in value.chars() {
            let params = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .text(ch.to_string())
                .build()
                .map_err(AgentError::perception)?;
            page.execute(params)
                .await
                .map_err(|err| AgentError::perception(err.to_string()))?;
        }
        Ok(())
    }

    async fn scroll(&mut self, delta_y: f64) -> Result<(), AgentError> {
        use chromiumoxide::cdp::browser_protocol::input::{
            DispatchMouseEventParams, DispatchMouseEventType,
        };
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(400.0)
            .y(300.0)
            .delta_x(0.0)
            .delta_y(delta_y)
            .build()
            .map_err(AgentError::perception)?;
        self.session
            .active()
            .execute(params)
            .await
            .map_err(|err| AgentError::perception(err.to_string()))?;
        Ok(())
    }

    async fn wait(&mut self, ms: u64) -> Result<(), AgentError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn tab_switch(&mut self) -> Result<(), AgentError> {
        self.session.follow_new_page().await.map(|_| ())
    }
}
