use crate::trainer::note::Clef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ── Clef mode ───────────────────────────────────────────────────────────────

/// Which staves the trainer draws notes on. `Both` picks one at random per
/// note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClefMode {
    Treble,
    Bass,
    Both,
}

impl ClefMode {
    /// Cycle order used by the clef special action: treble → bass → both.
    pub fn next(self) -> Self {
        match self {
            ClefMode::Treble => ClefMode::Bass,
            ClefMode::Bass => ClefMode::Both,
            ClefMode::Both => ClefMode::Treble,
        }
    }

    /// The single clef this mode pins, if any.
    pub fn fixed_clef(self) -> Option<Clef> {
        match self {
            ClefMode::Treble => Some(Clef::Treble),
            ClefMode::Bass => Some(Clef::Bass),
            ClefMode::Both => None,
        }
    }
}

impl fmt::Display for ClefMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClefMode::Treble => write!(f, "treble"),
            ClefMode::Bass => write!(f, "bass"),
            ClefMode::Both => write!(f, "both"),
        }
    }
}

// ── Settings ────────────────────────────────────────────────────────────────

/// Trainer preferences. Owned and mutated by the host; mirrored read-only
/// on clients; persisted locally by whichever side last changed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerSettings {
    pub clef_mode: ClefMode,
    pub use_accidentals: bool,
    /// Octave radius around the clef's center octave that notes are drawn
    /// from.
    pub max_range: u8,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            clef_mode: ClefMode::Both,
            use_accidentals: false,
            max_range: 1,
        }
    }
}

// ── Persistence collaborator ────────────────────────────────────────────────

/// Where settings live between runs. Consulted once at startup and after
/// every host-side settings change.
pub trait SettingsStore: Send {
    /// Load persisted settings, falling back to defaults when nothing
    /// usable is stored.
    fn load(&self) -> TrainerSettings;

    /// Persist the given settings. Failures are logged, never fatal.
    fn save(&self, settings: &TrainerSettings);
}

/// JSON-file-backed store.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> TrainerSettings {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(_) => return TrainerSettings::default(),
        };
        match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable settings file {}: {e}",
                    self.path.display()
                );
                TrainerSettings::default()
            }
        }
    }

    fn save(&self, settings: &TrainerSettings) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_vec_pretty(settings) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    log::warn!("Failed to save settings to {}: {e}", self.path.display());
                }
            }
            Err(e) => log::warn!("Failed to serialize settings: {e}"),
        }
    }
}

/// In-memory store for tests and for running without persistence.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: parking_lot::Mutex<Option<TrainerSettings>>,
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> TrainerSettings {
        self.inner.lock().clone().unwrap_or_default()
    }

    fn save(&self, settings: &TrainerSettings) {
        *self.inner.lock() = Some(settings.clone());
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clef_mode_cycles_through_all_three() {
        let mut mode = ClefMode::Treble;
        mode = mode.next();
        assert_eq!(mode, ClefMode::Bass);
        mode = mode.next();
        assert_eq!(mode, ClefMode::Both);
        mode = mode.next();
        assert_eq!(mode, ClefMode::Treble);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let json = serde_json::to_string(&TrainerSettings::default()).unwrap();
        assert!(json.contains("\"clefMode\":\"both\""));
        assert!(json.contains("\"useAccidentals\":false"));
        assert!(json.contains("\"maxRange\":1"));
    }

    #[test]
    fn file_store_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("settings.json"));

        let settings = TrainerSettings {
            clef_mode: ClefMode::Bass,
            use_accidentals: true,
            max_range: 2,
        };
        store.save(&settings);
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load(), TrainerSettings::default());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = JsonSettingsStore::new(path);
        assert_eq!(store.load(), TrainerSettings::default());
    }

    #[test]
    fn memory_store_returns_last_saved() {
        let store = MemorySettingsStore::default();
        assert_eq!(store.load(), TrainerSettings::default());
        let s = TrainerSettings {
            clef_mode: ClefMode::Treble,
            use_accidentals: true,
            max_range: 0,
        };
        store.save(&s);
        assert_eq!(store.load(), s);
    }
}
