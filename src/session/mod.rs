pub mod broadcast;
pub mod mirror;
pub mod role;
pub mod runner;

use crate::net::messages::TrainerState;
use crate::trainer::note::{Clef, Pitch};
use crate::trainer::settings::TrainerSettings;

// ── Session events ──────────────────────────────────────────────────────────

/// Events the session layer reports to the surrounding application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// This participant holds the host role and is generating notes.
    BecameHost,
    /// This participant mirrors a host elsewhere.
    BecameClient,
    /// The shared state changed (own mutation when hosting, applied
    /// snapshot when mirroring).
    StateChanged(TrainerState),
    /// The relay connection dropped; a reconnect is pending.
    ConnectionLost { reason: String },
    /// The relay reported an error the session does not handle itself.
    /// Surfaced to the user as a blocking notification.
    RelayFault(String),
}

// ── Input collaborator ──────────────────────────────────────────────────────

/// Abstract note-input events. Whatever decodes the MIDI or keyboard
/// device produces these; the session consumes them only while hosting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// The player identified a pitch.
    NoteIdentified(Pitch),
    /// A long-press / chord action.
    Special(SpecialAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialAction {
    CycleClef,
    ResetStats,
}

// ── Application commands ────────────────────────────────────────────────────

/// Commands from the surrounding application (e.g. a settings panel).
/// Honored only while hosting.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SetSettings(TrainerSettings),
}

// ── Rendering collaborator ──────────────────────────────────────────────────

/// Draws the staff. The session calls this after every state change and
/// consumes no return value.
pub trait StaffRenderer: Send {
    fn render(&mut self, clef: Clef, note: Option<Pitch>, wrong: Option<Pitch>);
}

/// Renderer that draws nothing. Headless sessions and tests.
pub struct NullRenderer;

impl StaffRenderer for NullRenderer {
    fn render(&mut self, _clef: Clef, _note: Option<Pitch>, _wrong: Option<Pitch>) {}
}
