use crate::net::messages::TrainerState;
use crate::trainer::note::{pool, Clef, Pitch};
use crate::trainer::settings::TrainerSettings;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Duration;

// ── Timing ──────────────────────────────────────────────────────────────────

/// How long a wrong guess stays flashed on the staff before it clears on
/// its own.
pub const WRONG_FLASH: Duration = Duration::from_millis(1000);

/// Pause between a correct answer and the next note.
pub const NEXT_NOTE_DELAY: Duration = Duration::from_millis(500);

// ── Judgement ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    Correct,
    Wrong,
}

// ── TrainerEngine ───────────────────────────────────────────────────────────

/// The host's game logic: picks target notes, judges identified pitches,
/// and keeps the running stats. Owns the one authoritative
/// [`TrainerState`]; every mutation here is followed by a broadcast in the
/// session runner.
///
/// Pure and synchronous; timers (wrong-note flash, next-note delay) live
/// in the runner's event loop.
pub struct TrainerEngine {
    state: TrainerState,
    rng: StdRng,
}

impl TrainerEngine {
    pub fn new(settings: TrainerSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic engine for tests.
    pub fn seeded(settings: TrainerSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: TrainerSettings, rng: StdRng) -> Self {
        Self {
            state: TrainerState::new(settings),
            rng,
        }
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// Notes the current settings allow on `clef`: the clef's pool,
    /// restricted to `max_range` octaves around its center, with sharps
    /// removed unless accidentals are on.
    pub fn candidates(clef: Clef, settings: &TrainerSettings) -> Vec<Pitch> {
        let center = clef.center_octave();
        let radius = settings.max_range as i8;
        pool(clef)
            .into_iter()
            .filter(|p| (p.octave - center).abs() <= radius)
            .filter(|p| settings.use_accidentals || !p.is_accidental())
            .collect()
    }

    /// Pick a new target note. Clears any flashed wrong note, so a pending
    /// flash-clear timer for the old note must be dropped by the caller.
    pub fn next_note(&mut self) -> &TrainerState {
        let clef = match self.state.settings.clef_mode.fixed_clef() {
            Some(c) => c,
            None => {
                if self.rng.gen_bool(0.5) {
                    Clef::Treble
                } else {
                    Clef::Bass
                }
            }
        };

        let candidates = Self::candidates(clef, &self.state.settings);
        self.state.clef = clef;
        self.state.note = if candidates.is_empty() {
            None
        } else {
            Some(candidates[self.rng.gen_range(0..candidates.len())])
        };
        self.state.last_wrong_note = None;
        &self.state
    }

    /// Judge an identified pitch against the current target. Spelling does
    /// not matter; semitone value does. Returns `None` when no target is
    /// assigned.
    pub fn judge(&mut self, guess: Pitch) -> Option<Judgement> {
        let target = self.state.note?;
        if guess.semitone() == target.semitone() {
            self.state.stats.correct += 1;
            self.state.stats.streak += 1;
            self.state.last_wrong_note = None;
            Some(Judgement::Correct)
        } else {
            self.state.stats.wrong += 1;
            self.state.stats.streak = 0;
            self.state.last_wrong_note = Some(guess);
            Some(Judgement::Wrong)
        }
    }

    /// The wrong-note flash timed out. Returns true when there was
    /// something to clear (and therefore something to broadcast).
    pub fn clear_wrong_note(&mut self) -> bool {
        self.state.last_wrong_note.take().is_some()
    }

    /// Advance the clef mode (treble → bass → both). Returns the new
    /// settings for persistence.
    pub fn cycle_clef(&mut self) -> TrainerSettings {
        self.state.settings.clef_mode = self.state.settings.clef_mode.next();
        self.state.settings.clone()
    }

    /// Zero the counters.
    pub fn reset_stats(&mut self) {
        self.state.stats = Default::default();
    }

    /// Replace the settings wholesale. Returns the new settings for
    /// persistence.
    pub fn set_settings(&mut self, settings: TrainerSettings) -> TrainerSettings {
        self.state.settings = settings;
        self.state.settings.clone()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::note::PitchClass;
    use crate::trainer::settings::ClefMode;

    fn engine_with(settings: TrainerSettings) -> TrainerEngine {
        TrainerEngine::seeded(settings, 7)
    }

    fn fixed_treble() -> TrainerSettings {
        TrainerSettings {
            clef_mode: ClefMode::Treble,
            use_accidentals: false,
            max_range: 1,
        }
    }

    #[test]
    fn correct_answer_bumps_correct_and_streak() {
        let mut engine = engine_with(fixed_treble());
        engine.next_note();
        let target = engine.state().note.unwrap();

        assert_eq!(engine.judge(target), Some(Judgement::Correct));
        let stats = engine.state().stats;
        assert_eq!((stats.correct, stats.wrong, stats.streak), (1, 0, 1));
        assert!(engine.state().last_wrong_note.is_none());
    }

    #[test]
    fn wrong_answer_records_the_guess_and_breaks_the_streak() {
        let mut engine = engine_with(fixed_treble());
        engine.next_note();
        let target = engine.state().note.unwrap();
        engine.judge(target); // streak = 1

        // Guess a pitch class that cannot match the target.
        let miss: Pitch = if target.class == PitchClass::C {
            Pitch::new(PitchClass::D, target.octave)
        } else {
            Pitch::new(PitchClass::C, target.octave)
        };
        assert_eq!(engine.judge(miss), Some(Judgement::Wrong));

        let state = engine.state();
        assert_eq!(state.last_wrong_note, Some(miss));
        assert_eq!((state.stats.correct, state.stats.wrong, state.stats.streak), (1, 1, 0));
    }

    #[test]
    fn enharmonic_guess_counts_as_correct() {
        let mut engine = engine_with(TrainerSettings {
            use_accidentals: true,
            ..fixed_treble()
        });
        // Roll until the target is d#/4, then answer with the flat spelling.
        let mut found = false;
        for _ in 0..10_000 {
            engine.next_note();
            if engine.state().note == Some(Pitch::new(PitchClass::DSharp, 4)) {
                found = true;
                break;
            }
        }
        assert!(found, "d#/4 should come up within 10k draws");
        let flat: Pitch = "eb/4".parse().unwrap();
        assert_eq!(engine.judge(flat), Some(Judgement::Correct));
    }

    #[test]
    fn judging_without_a_target_is_a_no_op() {
        let mut engine = engine_with(fixed_treble());
        assert_eq!(engine.judge(Pitch::new(PitchClass::C, 4)), None);
        assert_eq!(engine.state().stats.correct, 0);
    }

    #[test]
    fn next_note_clears_the_wrong_flash() {
        let mut engine = engine_with(fixed_treble());
        engine.next_note();
        let target = engine.state().note.unwrap();
        let miss = if target.class == PitchClass::C {
            Pitch::new(PitchClass::D, target.octave)
        } else {
            Pitch::new(PitchClass::C, target.octave)
        };
        engine.judge(miss);
        assert!(engine.state().last_wrong_note.is_some());

        engine.next_note();
        assert!(engine.state().last_wrong_note.is_none());
    }

    #[test]
    fn clear_wrong_note_reports_whether_it_did_anything() {
        let mut engine = engine_with(fixed_treble());
        assert!(!engine.clear_wrong_note());

        engine.next_note();
        let target = engine.state().note.unwrap();
        let miss = if target.class == PitchClass::C {
            Pitch::new(PitchClass::D, target.octave)
        } else {
            Pitch::new(PitchClass::C, target.octave)
        };
        engine.judge(miss);
        assert!(engine.clear_wrong_note());
        assert!(engine.state().last_wrong_note.is_none());
        assert!(!engine.clear_wrong_note());
    }

    #[test]
    fn fixed_clef_mode_never_switches_staff() {
        let mut engine = engine_with(TrainerSettings {
            clef_mode: ClefMode::Bass,
            ..fixed_treble()
        });
        for _ in 0..50 {
            engine.next_note();
            assert_eq!(engine.state().clef, Clef::Bass);
        }
    }

    #[test]
    fn both_mode_uses_both_staves() {
        let mut engine = engine_with(TrainerSettings {
            clef_mode: ClefMode::Both,
            ..fixed_treble()
        });
        let mut seen_treble = false;
        let mut seen_bass = false;
        for _ in 0..100 {
            engine.next_note();
            match engine.state().clef {
                Clef::Treble => seen_treble = true,
                Clef::Bass => seen_bass = true,
            }
        }
        assert!(seen_treble && seen_bass);
    }

    #[test]
    fn candidates_respect_the_range_radius() {
        let settings = TrainerSettings {
            clef_mode: ClefMode::Treble,
            use_accidentals: false,
            max_range: 0,
        };
        let notes = TrainerEngine::candidates(Clef::Treble, &settings);
        assert!(!notes.is_empty());
        assert!(notes.iter().all(|p| p.octave == 4));
    }

    #[test]
    fn candidates_exclude_sharps_by_default() {
        let settings = fixed_treble();
        let notes = TrainerEngine::candidates(Clef::Treble, &settings);
        assert!(notes.iter().all(|p| !p.is_accidental()));

        let with = TrainerSettings {
            use_accidentals: true,
            ..settings
        };
        let notes = TrainerEngine::candidates(Clef::Treble, &with);
        assert!(notes.iter().any(|p| p.is_accidental()));
    }

    #[test]
    fn picked_notes_come_from_the_candidate_pool() {
        let settings = fixed_treble();
        let allowed = TrainerEngine::candidates(Clef::Treble, &settings);
        let mut engine = engine_with(settings);
        for _ in 0..50 {
            engine.next_note();
            assert!(allowed.contains(&engine.state().note.unwrap()));
        }
    }

    #[test]
    fn cycle_clef_walks_the_three_modes() {
        let mut engine = engine_with(fixed_treble());
        assert_eq!(engine.cycle_clef().clef_mode, ClefMode::Bass);
        assert_eq!(engine.cycle_clef().clef_mode, ClefMode::Both);
        assert_eq!(engine.cycle_clef().clef_mode, ClefMode::Treble);
    }

    #[test]
    fn reset_stats_zeroes_everything() {
        let mut engine = engine_with(fixed_treble());
        engine.next_note();
        let target = engine.state().note.unwrap();
        engine.judge(target);
        engine.reset_stats();
        let stats = engine.state().stats;
        assert_eq!((stats.correct, stats.wrong, stats.streak), (0, 0, 0));
    }
}
