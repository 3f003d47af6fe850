//! Deterministic replay trace: the structured step log written during a run
//! and serialised to `trace-<runId>.json` at the end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TRACE_VERSION: u32 = 2;

/// Kind of one recorded interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceKind {
    Goto,
    Click,
    Type,
    Scroll,
    Wait,
    TabSwitch,
}

impl TraceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Goto => "goto",
            Self::Click => "click",
            Self::Type => "type",
            Self::Scroll => "scroll",
            Self::Wait => "wait",
            Self::TabSwitch => "tab-switch",
        }
    }
}

/// One replayable interaction with the page. Append-only within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub kind: TraceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Fields of a trace step the loop provides; id and timestamp are assigned
/// by the recorder.
#[derive(Debug, Clone, Default)]
pub struct TraceStepDraft {
    pub url: String,
    pub selector: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub value: Option<String>,
    pub wait_ms: Option<u64>,
    pub delta_y: Option<f64>,
    pub note: Option<String>,
}

impl TraceStepDraft {
    pub fn at(url: impl Into<String>) -> Self {
        Self {
            url: crate::redact::url(&url.into()),
            ..Self::default()
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn coords(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn wait_ms(mut self, ms: u64) -> Self {
        self.wait_ms = Some(ms);
        self
    }

    pub fn delta_y(mut self, delta: f64) -> Self {
        self.delta_y = Some(delta);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// The on-disk trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFile {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub start_url: String,
    pub final_url: String,
    pub objective: String,
    pub persona: String,
    pub model_name: String,
    pub steps: Vec<TraceStep>,
}
