//! Data model for representing a parsed MusicXML score.
//!
//! These structures capture the musical information needed to build an
//! absolute-time timeline: timing, ties, lyrics, tablature and the
//! performance markers that drive the character animation.

use serde::{Deserialize, Serialize};

use crate::error::RecoverableNoteError;

/// A complete musical score parsed from MusicXML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    /// Title of the piece
    pub title: Option<String>,
    /// Composer name
    pub composer: Option<String>,
    /// MusicXML version (e.g., "3.1", "4.0")
    pub version: Option<String>,
    /// Musical parts (instruments / voices)
    pub parts: Vec<Part>,
    /// Notes and directives skipped while parsing
    pub warnings: Vec<RecoverableNoteError>,
}

/// A musical part (one instrument or voice).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name (e.g., "Voice", "Classical Guitar")
    pub name: String,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number attribute as written
    pub number: String,
    /// Whether this is an implicit measure (e.g., pickup/anacrusis)
    pub implicit: bool,
    /// Divisions per quarter note in effect for this measure
    pub divisions: u32,
    /// Time signature in effect for this measure
    pub time: TimeSignature,
    /// Tempo directive in quarter-note BPM, if the measure carries one
    pub tempo_bpm: Option<f64>,
    /// Notes and rests in document order
    pub notes: Vec<Note>,
    /// Markers that were not followed by a note in this measure
    pub markers: Vec<PlacedMarker>,
    /// Furthest position reached by any voice, in divisions
    pub extent: u32,
}

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: u32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
        }
    }
}

impl TimeSignature {
    /// Nominal measure length in quarter notes (4/4 → 4.0, 6/8 → 3.0).
    pub fn quarters(&self) -> f64 {
        self.beats as f64 * 4.0 / self.beat_type as f64
    }
}

/// A single note or rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Pitch (None if this is a rest)
    pub pitch: Option<Pitch>,
    /// Duration in divisions
    pub duration: u32,
    /// Onset relative to the measure start, in divisions
    pub offset: u32,
    /// Voice number (defaults to 1)
    pub voice: u32,
    /// Staff number (defaults to 1)
    pub staff: u32,
    /// Whether this note is part of a chord with the previous note
    pub chord: bool,
    pub tie: TieState,
    pub lyric: Option<Lyric>,
    /// Tablature position from `<technical>`
    pub tab: Option<TabPosition>,
    /// Performance markers that precede this note
    pub markers: Vec<Marker>,
}

impl Note {
    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp
    pub alter: Option<f64>,
}

impl Pitch {
    /// Convert pitch to MIDI note number.
    /// Middle C (C4) = 60. Returns None for an unknown step.
    pub fn to_midi(&self) -> Option<i32> {
        let step_semitone = match self.step.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => return None,
        };
        let alter = self.alter.unwrap_or(0.0).round() as i32;
        Some((self.octave + 1) * 12 + step_semitone + alter)
    }
}

/// Tie state of a note. A note that both stops and starts a tie is
/// the middle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieState {
    #[default]
    None,
    Start,
    Stop,
    Continue,
}

impl TieState {
    pub fn from_flags(start: bool, stop: bool) -> Self {
        match (start, stop) {
            (true, true) => TieState::Continue,
            (true, false) => TieState::Start,
            (false, true) => TieState::Stop,
            (false, false) => TieState::None,
        }
    }
}

/// A lyric syllable attached to a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lyric {
    /// Lyric line (verse) number
    pub number: u32,
    pub text: String,
    pub syllabic: Syllabic,
}

/// Syllabic continuation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syllabic {
    #[default]
    Single,
    Begin,
    Middle,
    End,
}

impl Syllabic {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Syllabic::Single),
            "begin" => Some(Syllabic::Begin),
            "middle" => Some(Syllabic::Middle),
            "end" => Some(Syllabic::End),
            _ => None,
        }
    }
}

/// A string/fret position for tablature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabPosition {
    /// String number, 1 = highest string
    pub string: u8,
    pub fret: u8,
}

/// A performance marker authored as `CTRL:NAME[:value[b]]` direction words.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Marker {
    /// Tilt the head; reverts to neutral after the span if one is given.
    Tilt {
        direction: TiltDirection,
        span: Option<MarkerSpan>,
    },
    /// Wink one eye for the span (or the configured default).
    Wink {
        side: Option<WinkSide>,
        span: Option<MarkerSpan>,
    },
    /// Close both eyes until opened again, or for the span.
    CloseEyes { span: Option<MarkerSpan> },
    /// Open the eyes and keep them open for the span, even while tilted.
    OpenEyes { span: Option<MarkerSpan> },
    /// Close the eyes automatically while the head is tilted.
    EyeAuto { span: Option<MarkerSpan> },
    /// Change how fast later tilts move.
    Speed { speed: TiltSpeed },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TiltDirection {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinkSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TiltSpeed {
    Fast,
    Slow,
}

/// Marker duration, either absolute or in quarter-note beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSpan {
    Seconds(f64),
    Beats(f64),
}

impl Marker {
    /// Explicit duration written with the marker, if any.
    pub fn span(&self) -> Option<MarkerSpan> {
        match *self {
            Marker::Tilt { span, .. }
            | Marker::Wink { span, .. }
            | Marker::CloseEyes { span }
            | Marker::OpenEyes { span }
            | Marker::EyeAuto { span } => span,
            Marker::Speed { .. } => None,
        }
    }
}

/// A marker positioned inside a measure without a following note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacedMarker {
    /// Position relative to the measure start, in divisions
    pub offset: u32,
    pub marker: Marker,
}

impl Score {
    /// Create a new empty score.
    pub fn new() -> Self {
        Self {
            title: None,
            composer: None,
            version: None,
            parts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Get the number of measures of the first part.
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }

    /// Total number of pitched notes across all parts.
    pub fn note_count(&self) -> usize {
        self.parts
            .iter()
            .flat_map(|p| &p.measures)
            .flat_map(|m| &m.notes)
            .filter(|n| !n.is_rest())
            .count()
    }

    /// Find a part by its id.
    pub fn part(&self, id: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.id == id)
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_numbers() {
        let c4 = Pitch {
            step: "C".to_string(),
            octave: 4,
            alter: None,
        };
        assert_eq!(c4.to_midi(), Some(60));

        let b_flat3 = Pitch {
            step: "B".to_string(),
            octave: 3,
            alter: Some(-1.0),
        };
        assert_eq!(b_flat3.to_midi(), Some(58));

        let bogus = Pitch {
            step: "H".to_string(),
            octave: 4,
            alter: None,
        };
        assert_eq!(bogus.to_midi(), None);
    }

    #[test]
    fn time_signature_quarters() {
        assert_eq!(TimeSignature::default().quarters(), 4.0);
        let six_eight = TimeSignature {
            beats: 6,
            beat_type: 8,
        };
        assert_eq!(six_eight.quarters(), 3.0);
    }

    #[test]
    fn tie_flags() {
        assert_eq!(TieState::from_flags(true, true), TieState::Continue);
        assert_eq!(TieState::from_flags(false, true), TieState::Stop);
        assert_eq!(TieState::from_flags(false, false), TieState::None);
    }
}
