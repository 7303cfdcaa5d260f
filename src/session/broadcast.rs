use crate::net::messages::{Role, TrainerState};
use tokio::sync::mpsc;

// ── SnapshotBroadcaster ─────────────────────────────────────────────────────

/// Pushes the shared state at the relay whenever host-owned state changes.
///
/// Always sends the complete snapshot, never a delta: clients overwrite
/// their whole view on every frame, so application is idempotent and a
/// lost intermediate frame is healed by the next one.
///
/// Silently does nothing unless this participant holds the host role on a
/// live link.
pub struct SnapshotBroadcaster {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    hosting: bool,
}

impl SnapshotBroadcaster {
    pub fn new() -> Self {
        Self {
            outgoing: None,
            hosting: false,
        }
    }

    /// Attach to a live link with the role the connection declared.
    pub fn attach(&mut self, outgoing: mpsc::UnboundedSender<String>, role: Role) {
        self.hosting = role == Role::Host;
        self.outgoing = Some(outgoing);
    }

    /// The link went away (or the role is being switched).
    pub fn detach(&mut self) {
        self.outgoing = None;
        self.hosting = false;
    }

    /// Serialize the full snapshot and queue it for sending. Returns true
    /// when a frame was actually queued.
    pub fn broadcast(&self, state: &TrainerState) -> bool {
        if !self.hosting {
            return false;
        }
        let Some(outgoing) = &self.outgoing else {
            return false;
        };
        match serde_json::to_string(state) {
            Ok(text) => outgoing.send(text).is_ok(),
            Err(e) => {
                log::error!("Failed to serialize snapshot: {e}");
                false
            }
        }
    }
}

impl Default for SnapshotBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::settings::TrainerSettings;

    fn state() -> TrainerState {
        TrainerState::new(TrainerSettings::default())
    }

    #[test]
    fn detached_broadcaster_is_a_no_op() {
        let b = SnapshotBroadcaster::new();
        assert!(!b.broadcast(&state()));
    }

    #[test]
    fn client_role_never_broadcasts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut b = SnapshotBroadcaster::new();
        b.attach(tx, Role::Client);
        assert!(!b.broadcast(&state()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn host_broadcast_sends_the_full_snapshot() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut b = SnapshotBroadcaster::new();
        b.attach(tx, Role::Host);

        assert!(b.broadcast(&state()));
        let frame = rx.try_recv().unwrap();
        for field in ["clef", "note", "lastWrongNote", "stats", "settings"] {
            assert!(frame.contains(&format!("\"{field}\"")), "missing {field}");
        }
    }

    #[test]
    fn every_call_sends_a_complete_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut b = SnapshotBroadcaster::new();
        b.attach(tx, Role::Host);

        let mut s = state();
        b.broadcast(&s);
        s.stats.correct = 1; // one logical field changed
        b.broadcast(&s);

        for _ in 0..2 {
            let frame = rx.try_recv().unwrap();
            assert!(frame.contains("\"settings\""), "deltas are not a thing: {frame}");
        }
    }

    #[test]
    fn broadcast_after_detach_is_a_no_op() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut b = SnapshotBroadcaster::new();
        b.attach(tx, Role::Host);
        b.detach();
        assert!(!b.broadcast(&state()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_on_a_dead_link_reports_false() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut b = SnapshotBroadcaster::new();
        b.attach(tx, Role::Host);
        drop(rx);
        assert!(!b.broadcast(&state()));
    }
}
