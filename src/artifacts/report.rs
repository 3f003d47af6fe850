//! Session report: JSON summary, RFC4180 CSV step log, and a PDF rendered
//! from generated HTML.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine as _;
use serde_json::{json, Value};

use super::recorder::{ErrorRecord, ScreenshotRecord, StepRecord, ThoughtRecord};
use super::RunMeta;
use crate::errors::AgentError;

/// Write `steps.csv` with the fixed header. The csv crate applies RFC4180
/// quoting for fields containing commas, quotes or newlines.
pub fn write_steps_csv(path: &Path, steps: &[StepRecord]) -> Result<(), AgentError> {
    let mut writer =
        csv::Writer::from_path(path).map_err(|err| AgentError::artifact(err.to_string()))?;
    writer
        .write_record(["id", "timestamp", "action", "targetId", "value", "thought", "url"])
        .map_err(|err| AgentError::artifact(err.to_string()))?;
    for step in steps {
        writer
            .write_record([
                step.id.to_string().as_str(),
                step.timestamp.to_rfc3339().as_str(),
                step.action.as_str(),
                step.target_id.as_deref().unwrap_or(""),
                step.value.as_deref().unwrap_or(""),
                step.thought.as_str(),
                step.url.as_str(),
            ])
            .map_err(|err| AgentError::artifact(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| AgentError::artifact(err.to_string()))?;
    Ok(())
}

pub fn action_breakdown(steps: &[StepRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for step in steps {
        *counts.entry(step.action.clone()).or_default() += 1;
    }
    counts
}

/// Full machine-readable report.
pub fn build_report_json(
    meta: &RunMeta,
    thoughts: &[ThoughtRecord],
    steps: &[StepRecord],
    errors: &[ErrorRecord],
    screenshots: &[ScreenshotRecord],
) -> Value {
    json!({
        "runId": meta.run_id,
        "persona": meta.persona_name,
        "objective": meta.objective,
        "modelName": meta.model_name,
        "startUrl": meta.start_url,
        "finalUrl": meta.final_url,
        "startedAt": meta.started_at,
        "finishedAt": meta.finished_at,
        "metrics": {
            "steps": steps.len(),
            "thoughts": thoughts.len(),
            "errors": errors.len(),
            "screenshots": screenshots.len(),
        },
        "actionBreakdown": action_breakdown(steps),
        "thoughts": thoughts,
        "steps": steps,
        "errors": errors,
        "screenshots": screenshots,
    })
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the report page: metadata, metrics, action breakdown, the last 20
/// thoughts and the first 12 screenshot previews.
pub fn build_report_html(
    meta: &RunMeta,
    thoughts: &[ThoughtRecord],
    steps: &[StepRecord],
    errors: &[ErrorRecord],
    screenshots: &[ScreenshotRecord],
    run_dir: &Path,
) -> String {
    let mut html = String::new();
    html.push_str(
        "<!doctype html><html><head><meta charset=\"utf-8\"><style>\
         body{font-family:sans-serif;margin:24px;color:#222}\
         h1{font-size:20px}h2{font-size:15px;margin-top:24px}\
         table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:4px 8px;font-size:12px}\
         .thought{font-size:12px;margin:2px 0}\
         img{max-width:220px;margin:4px;border:1px solid #ccc}\
         </style></head><body>",
    );

    html.push_str(&format!("<h1>Session report — {}</h1>", escape_html(&meta.run_id)));
    html.push_str("<h2>Metadata</h2><table>");
    for (key, value) in [
        ("Persona", meta.persona_name.as_str()),
        ("Objective", meta.objective.as_str()),
        ("Model", meta.model_name.as_str()),
        ("Start URL", meta.start_url.as_str()),
        ("Final URL", meta.final_url.as_str()),
    ] {
        html.push_str(&format!(
            "<tr><th>{}</th><td>{}</td></tr>",
            key,
            escape_html(value)
        ));
    }
    html.push_str("</table>");

    html.push_str("<h2>Metrics</h2><table><tr><th>Steps</th><th>Thoughts</th><th>Errors</th><th>Screenshots</th></tr>");
    html.push_str(&format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr></table>",
        steps.len(),
        thoughts.len(),
        errors.len(),
        screenshots.len()
    ));

    html.push_str("<h2>Actions</h2><table><tr><th>Action</th><th>Count</th></tr>");
    for (action, count) in action_breakdown(steps) {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&action),
            count
        ));
    }
    html.push_str("</table>");

    html.push_str("<h2>Last thoughts</h2>");
    let start = thoughts.len().saturating_sub(20);
    for thought in &thoughts[start..] {
        html.push_str(&format!(
            "<p class=\"thought\">[{}] {}</p>",
            thought.timestamp.format("%H:%M:%S"),
            escape_html(&thought.message)
        ));
    }

    html.push_str("<h2>Screenshots</h2>");
    for record in screenshots.iter().take(12) {
        let path = run_dir.join(&record.path);
        if let Ok(bytes) = std::fs::read(&path) {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            html.push_str(&format!(
                "<img src=\"data:image/png;base64,{encoded}\" alt=\"{}\">",
                escape_html(&record.path)
            ));
        }
    }

    html.push_str("</body></html>");
    html
}
