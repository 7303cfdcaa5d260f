use crate::net::messages::TrainerState;
use crate::session::StaffRenderer;

// ── StateMirror ─────────────────────────────────────────────────────────────

/// Client-side presentation state: whatever the host last said, verbatim.
///
/// Applying a snapshot overwrites every field and triggers a re-render.
/// There is no validation, no partial merge, and no reconciliation with
/// local history; clients hold no judgment state of their own.
pub struct StateMirror {
    view: Option<TrainerState>,
}

impl StateMirror {
    pub fn new() -> Self {
        Self { view: None }
    }

    /// Overwrite the local view with `snapshot` and redraw.
    pub fn apply(&mut self, snapshot: TrainerState, renderer: &mut dyn StaffRenderer) {
        renderer.render(snapshot.clef, snapshot.note, snapshot.last_wrong_note);
        self.view = Some(snapshot);
    }

    /// The mirrored state, if any snapshot has arrived yet.
    pub fn view(&self) -> Option<&TrainerState> {
        self.view.as_ref()
    }

    /// Forget everything. Used when arbitration restarts from scratch.
    pub fn reset(&mut self) {
        self.view = None;
    }
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
