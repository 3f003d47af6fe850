//! Typed event fan-out.
//!
//! The run controller publishes a fixed enumeration of events; the operator
//! WebSocket and the artifact recorder subscribe. Backed by a broadcast
//! channel so slow subscribers never stall the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle states of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Scanning,
    Thinking,
    Acting,
    Stopped,
}

impl RunState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Scanning => "scanning",
            Self::Thinking => "thinking",
            Self::Acting => "acting",
            Self::Stopped => "stopped",
        }
    }
}

/// Everything the core publishes to operators, tagged for the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Status {
        state: RunState,
    },
    Thought {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Step {
        id: u64,
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        thought: String,
    },
    Screenshot {
        data_url: String,
    },
    Cursor {
        x: f64,
        y: f64,
        viewport_width: u32,
        viewport_height: u32,
    },
    Tts {
        id: String,
        text: String,
        mime: String,
        audio_base64: String,
    },
    TraceSaved {
        path: String,
        url: String,
    },
    ReportReady {
        paths: Vec<String>,
        urls: Vec<String>,
    },
    Error {
        message: String,
    },
}

/// In-process bus carrying [`AgentEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. A send error only means nobody is listening, which
    /// is fine: the loop must keep running without operators attached.
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(512)
    }
}
