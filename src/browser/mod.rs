//! Browser session, human-like cursor and the action executor.

mod cursor;
mod executor;
mod session;

pub use cursor::{plan_path, CursorDriver, MotionPlan};
pub use executor::{ActionExecutor, ClickOutcome, TypeOutcome};
pub use session::{BrowserSession, PageHealth, SessionConfig};

use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;

use crate::errors::AgentError;

/// Evaluate an expression on the page, awaiting promises and returning the
/// value by JSON. All in-page algorithms go through here.
pub async fn eval_value(page: &Page, expression: &str) -> Result<serde_json::Value, AgentError> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(AgentError::perception)?;
    let outcome = page
        .evaluate(params)
        .await
        .map_err(|err| AgentError::perception(err.to_string()))?;
    Ok(outcome.value().cloned().unwrap_or(serde_json::Value::Null))
}
