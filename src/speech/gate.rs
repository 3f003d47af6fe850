use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

/// Watchdog deadline for a thought of the given character length:
/// `max(7s, min(45s, len × 70ms))`.
pub fn watchdog_for(text_len: usize) -> Duration {
    let scaled = Duration::from_millis(text_len as u64 * 70);
    scaled.clamp(Duration::from_secs(7), Duration::from_secs(45))
}

struct Pending {
    id: String,
    tx: oneshot::Sender<()>,
}

/// Single-slot channel carrying the playback rendezvous.
#[derive(Default)]
pub struct SpeechGate {
    pending: Mutex<Option<Pending>>,
}

impl SpeechGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding request. Any previous watcher is cancelled
    /// first; there is never more than one.
    pub fn begin(&self, id: impl Into<String>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.pending.lock();
        if let Some(old) = slot.take() {
            debug!(id = %old.id, "cancelling superseded speech request");
            let _ = old.tx.send(());
        }
        *slot = Some(Pending { id: id.into(), tx });
        rx
    }

    /// Acknowledge playback end. A non-matching id is ignored.
    pub fn ack(&self, id: &str) -> bool {
        let mut slot = self.pending.lock();
        if slot.as_ref().is_some_and(|pending| pending.id == id) {
            if let Some(pending) = slot.take() {
                let _ = pending.tx.send(());
            }
            true
        } else {
            false
        }
    }

    /// Resolve whatever is outstanding, e.g. on stop or voice toggle-off.
    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().take() {
            let _ = pending.tx.send(());
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_clamps_both_ends() {
        assert_eq!(watchdog_for(3), Duration::from_secs(7));
        assert_eq!(watchdog_for(200), Duration::from_millis(14_000));
        assert_eq!(watchdog_for(100_000), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn matching_ack_resolves_the_gate() {
        let gate = SpeechGate::new();
        let rx = gate.begin("req-1");
        assert!(gate.ack("req-1"));
        rx.await.unwrap();
        assert!(!gate.has_pending());
    }

    #[tokio::test]
    async fn non_matching_ack_is_ignored() {
        let gate = SpeechGate::new();
        let _rx = gate.begin("req-1");
        assert!(!gate.ack("other"));
        assert!(gate.has_pending());
    }

    #[tokio::test]
    async fn new_request_cancels_previous_watcher() {
        let gate = SpeechGate::new();
        let rx1 = gate.begin("req-1");
        let _rx2 = gate.begin("req-2");
        rx1.await.unwrap();
        assert!(gate.has_pending());
        assert!(!gate.ack("req-1"));
        assert!(gate.ack("req-2"));
    }

    #[tokio::test]
    async fn cancel_releases_pending_wait() {
        let gate = SpeechGate::new();
        let rx = gate.begin("req-1");
        gate.cancel();
        rx.await.unwrap();
        assert!(!gate.has_pending());
    }
}
