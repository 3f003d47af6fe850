//! Run lifecycle: the controller owning the browser, the ledgers and the
//! perceive-decide-act loop.

pub mod controller;
pub mod history;

pub use controller::{RunController, RunSummary};
pub use history::{FailedTargetLedger, HistoryLog, StagnationDetector};
