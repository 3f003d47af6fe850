use thiserror::Error;

/// Errors emitted by the agent core.
///
/// The control loop never lets these escape a turn: they are reified into
/// thought/error events and, when they carry a mark id, charged against the
/// failed-target ledger. The typed variants exist so callers can tell those
/// cases apart.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A run is already active; only one run may exist per process.
    #[error("a run is already active")]
    RunActive,

    /// The browser process or browsing context could not be brought up.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Navigation did not complete; treated as a warning by the loop.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The in-page perception script threw or timed out.
    #[error("perception failed: {0}")]
    Perception(String),

    /// The upstream model rejected us with a rate limit after retries.
    #[error("rate limited by upstream model")]
    RateLimited,

    /// Any other upstream model failure.
    #[error("decision upstream error: {0}")]
    Upstream(String),

    /// An action against a marked element failed. Carries the mark id so the
    /// ledger can charge it.
    #[error("action on mark #{mark} failed: {reason}")]
    Action { mark: String, reason: String },

    /// Speech synthesis yielded no usable audio.
    #[error("speech synthesis failed: {0}")]
    Speech(String),

    /// Artifact emission failed (trace, thoughts, report).
    #[error("artifact error: {0}")]
    Artifact(String),

    /// The active page is gone and no survivor exists.
    #[error("no surviving page")]
    PageLost,

    /// Malformed request from the control surface.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AgentError {
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch(message.into())
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation(message.into())
    }

    pub fn perception(message: impl Into<String>) -> Self {
        Self::Perception(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn action(mark: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Action {
            mark: mark.into(),
            reason: reason.into(),
        }
    }

    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Mark id named by this error, if any. The loop uses this to charge the
    /// failed-target ledger.
    pub fn mark_id(&self) -> Option<&str> {
        match self {
            Self::Action { mark, .. } => Some(mark),
            _ => None,
        }
    }
}
