//! In-run event storage feeding the trace and report builders.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::trace::{TraceKind, TraceStep, TraceStepDraft};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub thought: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub url: String,
}

/// Append-only stores for one run. Written only from the loop; read by the
/// artifact builders after the loop exits.
#[derive(Default)]
pub struct RunRecorder {
    thoughts: Mutex<Vec<ThoughtRecord>>,
    steps: Mutex<Vec<StepRecord>>,
    errors: Mutex<Vec<ErrorRecord>>,
    screenshots: Mutex<Vec<ScreenshotRecord>>,
    trace: Mutex<Vec<TraceStep>>,
    next_step_id: AtomicU64,
    next_trace_id: AtomicU64,
}

impl RunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_thought(&self, message: impl Into<String>, url: impl Into<String>) {
        self.thoughts.lock().push(ThoughtRecord {
            timestamp: Utc::now(),
            message: message.into(),
            url: crate::redact::url(&url.into()),
        });
    }

    pub fn record_step(
        &self,
        action: &str,
        target_id: Option<String>,
        value: Option<String>,
        thought: &str,
        url: &str,
    ) -> u64 {
        let id = self.next_step_id.fetch_add(1, Ordering::Relaxed);
        self.steps.lock().push(StepRecord {
            id,
            timestamp: Utc::now(),
            action: action.to_string(),
            target_id,
            value,
            thought: thought.to_string(),
            url: crate::redact::url(url),
        });
        id
    }

    pub fn record_error(&self, message: impl Into<String>, url: impl Into<String>) {
        self.errors.lock().push(ErrorRecord {
            timestamp: Utc::now(),
            message: message.into(),
            url: crate::redact::url(&url.into()),
        });
    }

    pub fn record_screenshot(&self, path: impl Into<String>, url: impl Into<String>) {
        self.screenshots.lock().push(ScreenshotRecord {
            timestamp: Utc::now(),
            path: path.into(),
            url: crate::redact::url(&url.into()),
        });
    }

    /// Append a trace step; ids are sequential from 0.
    pub fn record_trace(&self, kind: TraceKind, draft: TraceStepDraft) -> u64 {
        let id = self.next_trace_id.fetch_add(1, Ordering::Relaxed);
        self.trace.lock().push(TraceStep {
            id,
            timestamp: Utc::now(),
            url: draft.url,
            kind,
            selector: draft.selector,
            x: draft.x,
            y: draft.y,
            value: draft.value,
            wait_ms: draft.wait_ms,
            delta_y: draft.delta_y,
            note: draft.note,
        });
        id
    }

    pub fn thoughts(&self) -> Vec<ThoughtRecord> {
        self.thoughts.lock().clone()
    }

    pub fn steps(&self) -> Vec<StepRecord> {
        self.steps.lock().clone()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().clone()
    }

    pub fn screenshots(&self) -> Vec<ScreenshotRecord> {
        self.screenshots.lock().clone()
    }

    pub fn trace_steps(&self) -> Vec<TraceStep> {
        self.trace.lock().clone()
    }

    pub fn step_count(&self) -> usize {
        self.steps.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ids_are_sequential() {
        let recorder = RunRecorder::new();
        let a = recorder.record_step("click", Some("0".into()), None, "t", "u");
        let b = recorder.record_step("scroll", None, None, "t", "u");
        assert_eq!((a, b), (0, 1));
        assert_eq!(recorder.step_count(), 2);
    }

    #[test]
    fn trace_ids_are_sequential_and_independent() {
        let recorder = RunRecorder::new();
        recorder.record_step("click", None, None, "t", "u");
        let a = recorder.record_trace(TraceKind::Goto, TraceStepDraft::at("https://a"));
        let b = recorder.record_trace(
            TraceKind::Click,
            TraceStepDraft::at("https://a").selector("#x").coords(1.0, 2.0),
        );
        assert_eq!((a, b), (0, 1));
        let steps = recorder.trace_steps();
        assert_eq!(steps[1].selector.as_deref(), Some("#x"));
        assert_eq!(steps[1].x, Some(1.0));
    }

    #[test]
    fn records_accumulate_in_order() {
        let recorder = RunRecorder::new();
        recorder.record_thought("first", "u1");
        recorder.record_thought("second", "u2");
        recorder.record_error("boom", "u2");
        let thoughts = recorder.thoughts();
        assert_eq!(thoughts.len(), 2);
        assert_eq!(thoughts[0].message, "first");
        assert_eq!(recorder.errors()[0].message, "boom");
    }
}
