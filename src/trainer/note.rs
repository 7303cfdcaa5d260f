use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ── Clef ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clef {
    Treble,
    Bass,
}

impl Clef {
    /// The octave the clef's staff is centered on. Range filtering for note
    /// selection radiates out from this octave.
    pub fn center_octave(self) -> i8 {
        match self {
            Clef::Treble => 4,
            Clef::Bass => 3,
        }
    }
}

impl fmt::Display for Clef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clef::Treble => write!(f, "treble"),
            Clef::Bass => write!(f, "bass"),
        }
    }
}

// ── Pitch class ─────────────────────────────────────────────────────────────

/// One of the twelve chromatic pitch classes, spelled with sharps.
///
/// Flat spellings are accepted on input and folded to their enharmonic
/// sharp equivalent; judging compares semitone values, so `eb/3` and
/// `d#/3` count as the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// Semitone offset from C within an octave (0–11).
    pub fn semitone(self) -> i32 {
        match self {
            PitchClass::C => 0,
            PitchClass::CSharp => 1,
            PitchClass::D => 2,
            PitchClass::DSharp => 3,
            PitchClass::E => 4,
            PitchClass::F => 5,
            PitchClass::FSharp => 6,
            PitchClass::G => 7,
            PitchClass::GSharp => 8,
            PitchClass::A => 9,
            PitchClass::ASharp => 10,
            PitchClass::B => 11,
        }
    }

    /// True for the five sharp classes.
    pub fn is_accidental(self) -> bool {
        matches!(
            self,
            PitchClass::CSharp
                | PitchClass::DSharp
                | PitchClass::FSharp
                | PitchClass::GSharp
                | PitchClass::ASharp
        )
    }

    fn from_semitone(s: i32) -> Self {
        match s.rem_euclid(12) {
            0 => PitchClass::C,
            1 => PitchClass::CSharp,
            2 => PitchClass::D,
            3 => PitchClass::DSharp,
            4 => PitchClass::E,
            5 => PitchClass::F,
            6 => PitchClass::FSharp,
            7 => PitchClass::G,
            8 => PitchClass::GSharp,
            9 => PitchClass::A,
            10 => PitchClass::ASharp,
            _ => PitchClass::B,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PitchClass::C => "c",
            PitchClass::CSharp => "c#",
            PitchClass::D => "d",
            PitchClass::DSharp => "d#",
            PitchClass::E => "e",
            PitchClass::F => "f",
            PitchClass::FSharp => "f#",
            PitchClass::G => "g",
            PitchClass::GSharp => "g#",
            PitchClass::A => "a",
            PitchClass::ASharp => "a#",
            PitchClass::B => "b",
        }
    }
}

/// Semitone value for a spelled note name, flats included.
///
/// `cb` maps to 11 and `b#` to 0 within the *same* octave, with no
/// octave carry.
fn name_to_semitone(name: &str) -> Option<i32> {
    Some(match name {
        "c" => 0,
        "c#" | "db" => 1,
        "d" => 2,
        "d#" | "eb" => 3,
        "e" | "fb" => 4,
        "e#" | "f" => 5,
        "f#" | "gb" => 6,
        "g" => 7,
        "g#" | "ab" => 8,
        "a" => 9,
        "a#" | "bb" => 10,
        "b" | "cb" => 11,
        _ => return None,
    })
}

// ── Pitch ───────────────────────────────────────────────────────────────────

/// A pitch class plus octave, written `"c#/4"` on the wire and in input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pitch {
    pub class: PitchClass,
    pub octave: i8,
}

impl Pitch {
    pub const fn new(class: PitchClass, octave: i8) -> Self {
        Self { class, octave }
    }

    /// Absolute semitone index. Equal values mean the same key, regardless
    /// of spelling.
    pub fn semitone(self) -> i32 {
        self.class.semitone() + i32::from(self.octave) * 12
    }

    pub fn is_accidental(self) -> bool {
        self.class.is_accidental()
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class.name(), self.octave)
    }
}

/// Error produced when a pitch string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePitchError(pub String);

impl fmt::Display for ParsePitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pitch: {:?}", self.0)
    }
}

impl std::error::Error for ParsePitchError {}

impl FromStr for Pitch {
    type Err = ParsePitchError;

    /// Parse `"f#/4"`. A bare `"f#4"` (no slash) is accepted too, since
    /// that is what people type at a terminal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (name, octave_str) = match s.split_once('/') {
            Some((n, o)) => (n.to_string(), o.to_string()),
            None => {
                let split = s
                    .find(|c: char| c.is_ascii_digit())
                    .ok_or_else(|| ParsePitchError(s.clone()))?;
                let (n, o) = s.split_at(split);
                (n.to_string(), o.to_string())
            }
        };
        let semitone = name_to_semitone(&name).ok_or_else(|| ParsePitchError(s.clone()))?;
        let octave: i8 = octave_str.parse().map_err(|_| ParsePitchError(s.clone()))?;
        Ok(Pitch::new(PitchClass::from_semitone(semitone), octave))
    }
}

impl Serialize for Pitch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pitch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Note pools ──────────────────────────────────────────────────────────────

/// Chromatic pool of notes a treble staff can display: c/4 up to c/6.
const TREBLE_POOL: [(PitchClass, i8); 25] = chromatic_span::<25>(PitchClass::C, 4);

/// Chromatic pool for the bass staff: e/2 up to c/4.
const BASS_POOL: [(PitchClass, i8); 21] = chromatic_span::<21>(PitchClass::E, 2);

/// Build `N` consecutive chromatic steps starting at `start`/`octave`.
const fn chromatic_span<const N: usize>(start: PitchClass, octave: i8) -> [(PitchClass, i8); N] {
    let base = start as i32 + octave as i32 * 12;
    let mut out = [(PitchClass::C, 0i8); N];
    let mut i = 0;
    while i < N {
        let s = base + i as i32;
        let class = match s % 12 {
            0 => PitchClass::C,
            1 => PitchClass::CSharp,
            2 => PitchClass::D,
            3 => PitchClass::DSharp,
            4 => PitchClass::E,
            5 => PitchClass::F,
            6 => PitchClass::FSharp,
            7 => PitchClass::G,
            8 => PitchClass::GSharp,
            9 => PitchClass::A,
            10 => PitchClass::ASharp,
            _ => PitchClass::B,
        };
        out[i] = (class, (s / 12) as i8);
        i += 1;
    }
    out
}

/// The full displayable range for a clef, sharps included.
pub fn pool(clef: Clef) -> Vec<Pitch> {
    let raw: &[(PitchClass, i8)] = match clef {
        Clef::Treble => &TREBLE_POOL,
        Clef::Bass => &BASS_POOL,
    };
    raw.iter().map(|&(c, o)| Pitch::new(c, o)).collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────
