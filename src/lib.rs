//! wayfarer: an autonomous web-journey agent.
//!
//! Drives a real browser through a target site to execute a natural-language
//! mission from a persona's perspective, streaming reasoning, actions,
//! screenshots and cursor motion to operators, and emitting a reproducible
//! artifact bundle per run.

pub mod artifacts;
pub mod browser;
pub mod config;
pub mod cookies;
pub mod decision;
pub mod errors;
pub mod events;
pub mod perception;
pub mod persona;
pub mod redact;
pub mod run;
pub mod server;
pub mod speech;

pub use config::{AppConfig, RunOptions};
pub use errors::AgentError;
pub use events::{AgentEvent, EventBus, RunState};
pub use run::RunController;
