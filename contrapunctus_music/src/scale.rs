// Diatonic scale model: the pitch vocabulary every line draws from.
//
// A `Scale` is built once per (tonic, scale type) pair and never mutated.
// It lists every piano key (A0 = position 0 through C8 = position 87) that
// belongs to the scale, in ascending order, with its functional degree
// (1-7) and whether it belongs to the tonic triad. Lines address pitches by
// "position in degrees", the ordinal of an element within this list, so a
// movement of +1 is always one diatonic step regardless of the semitone gap.
//
// Used by piece.rs to slice per-line pitch ranges and by rules.rs to look up
// degrees and triad membership of candidate pitches.

use crate::error::{MusicError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of keys on a standard piano (A0..=C8).
pub const N_PIANO_KEYS: usize = 88;

/// MIDI note number of A0, the lowest piano key.
pub const LOWEST_MIDI_PITCH: u8 = 21;

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// The supported diatonic scale types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    Major,
    NaturalMinor,
    HarmonicMinor,
}

impl ScaleType {
    /// Semitone offsets of degrees 1-7 from the tonic.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            ScaleType::Major => [0, 2, 4, 5, 7, 9, 11],
            ScaleType::NaturalMinor => [0, 2, 3, 5, 7, 8, 10],
            ScaleType::HarmonicMinor => [0, 2, 3, 5, 7, 8, 11],
        }
    }

    /// Semitone offsets of the tonic triad (root, third, fifth).
    pub fn tonic_triad(self) -> [u8; 3] {
        match self {
            ScaleType::Major => [0, 4, 7],
            ScaleType::NaturalMinor | ScaleType::HarmonicMinor => [0, 3, 7],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScaleType::Major => "major",
            ScaleType::NaturalMinor => "natural_minor",
            ScaleType::HarmonicMinor => "harmonic_minor",
        }
    }
}

impl FromStr for ScaleType {
    type Err = MusicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "major" => Ok(ScaleType::Major),
            "natural_minor" | "minor" => Ok(ScaleType::NaturalMinor),
            "harmonic_minor" => Ok(ScaleType::HarmonicMinor),
            other => Err(MusicError::Configuration(format!(
                "unknown scale type `{other}`"
            ))),
        }
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a pitch class name like `C`, `F#` or `Bb` into its natural pitch
/// class and accidental offset.
fn parse_letter_and_accidental(name: &str) -> Result<(i32, i32)> {
    let mut chars = name.chars();
    let letter = chars
        .next()
        .ok_or_else(|| MusicError::UnknownNote(name.to_string()))?;
    let natural = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(MusicError::UnknownNote(name.to_string())),
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return Err(MusicError::UnknownNote(name.to_string())),
    };
    Ok((natural, accidental))
}

/// Parse a pitch class name like `C`, `F#` or `Bb` into 0-11.
pub fn parse_pitch_class(name: &str) -> Result<u8> {
    let (natural, accidental) = parse_letter_and_accidental(name)?;
    Ok((natural + accidental).rem_euclid(12) as u8)
}

/// Convert a note name like `C#4` or `Eb3` into a piano-key position.
pub fn note_to_position(name: &str) -> Result<usize> {
    let unknown = || MusicError::UnknownNote(name.to_string());
    let split = name.find(|c: char| c.is_ascii_digit()).ok_or_else(unknown)?;
    let (pitch_class, octave) = name.split_at(split);
    let (natural, accidental) = parse_letter_and_accidental(pitch_class).map_err(|_| unknown())?;
    let octave: i32 = octave.parse().map_err(|_| unknown())?;
    // Cb and B# cross the octave boundary, so go through MIDI numbers.
    let midi = (octave + 1) * 12 + natural + accidental;
    let position = midi - LOWEST_MIDI_PITCH as i32;
    if !(0..N_PIANO_KEYS as i32).contains(&position) {
        return Err(unknown());
    }
    Ok(position as usize)
}

/// Canonical (sharp-spelled) name of a piano-key position.
pub fn position_to_note(position: usize) -> String {
    let midi = position + LOWEST_MIDI_PITCH as usize;
    let octave = midi / 12 - 1;
    format!("{}{}", PITCH_CLASS_NAMES[midi % 12], octave)
}

/// Pitch class (0 = C) of a piano-key position.
pub fn pitch_class_of(position: usize) -> u8 {
    ((position + LOWEST_MIDI_PITCH as usize) % 12) as u8
}

/// One pitch of a scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleElement {
    /// Canonical note name, e.g. `C4`.
    pub note: String,
    /// Piano-key position (A0 = 0).
    pub position_in_semitones: usize,
    /// Ordinal of this element within the scale.
    pub position_in_degrees: usize,
    /// Functional degree, 1 (tonic) to 7.
    pub degree: u8,
    pub is_from_tonic_triad: bool,
}

impl ScaleElement {
    /// MIDI note number of this pitch.
    pub fn midi_pitch(&self) -> u8 {
        self.position_in_semitones as u8 + LOWEST_MIDI_PITCH
    }
}

/// An immutable diatonic scale spanning the whole piano keyboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scale {
    tonic: u8,
    scale_type: ScaleType,
    elements: Vec<ScaleElement>,
    /// Maps piano-key position to position in degrees.
    by_semitone: Vec<Option<usize>>,
}

impl Scale {
    /// Build the scale for a tonic pitch class name (`C`, `F#`, `Bb`...).
    pub fn new(tonic: &str, scale_type: ScaleType) -> Result<Self> {
        let tonic_pc = parse_pitch_class(tonic)?;
        let intervals = scale_type.intervals();
        let triad = scale_type.tonic_triad();

        let mut elements = Vec::with_capacity(N_PIANO_KEYS / 12 * 7 + 7);
        let mut by_semitone = vec![None; N_PIANO_KEYS];
        for position in 0..N_PIANO_KEYS {
            let offset = (pitch_class_of(position) + 12 - tonic_pc) % 12;
            let Some(degree_index) = intervals.iter().position(|&iv| iv == offset) else {
                continue;
            };
            let position_in_degrees = elements.len();
            by_semitone[position] = Some(position_in_degrees);
            elements.push(ScaleElement {
                note: position_to_note(position),
                position_in_semitones: position,
                position_in_degrees,
                degree: degree_index as u8 + 1,
                is_from_tonic_triad: triad.contains(&offset),
            });
        }

        Ok(Scale {
            tonic: tonic_pc,
            scale_type,
            elements,
            by_semitone,
        })
    }

    pub fn tonic_pitch_class(&self) -> u8 {
        self.tonic
    }

    pub fn scale_type(&self) -> ScaleType {
        self.scale_type
    }

    /// Human-readable name such as `C major`.
    pub fn name(&self) -> String {
        format!("{} {}", PITCH_CLASS_NAMES[self.tonic as usize], self.scale_type)
    }

    pub fn elements(&self) -> &[ScaleElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether a pitch class (0 = C) belongs to the scale.
    pub fn contains_pitch_class(&self, pitch_class: u8) -> bool {
        let offset = (pitch_class % 12 + 12 - self.tonic) % 12;
        self.scale_type.intervals().contains(&offset)
    }

    pub fn get_element_by_note(&self, note: &str) -> Result<&ScaleElement> {
        let position = note_to_position(note)?;
        self.get_element_by_position_in_semitones(position)
            .map_err(|_| self.not_in_scale(note.to_string()))
    }

    pub fn get_element_by_position_in_semitones(&self, position: usize) -> Result<&ScaleElement> {
        self.by_semitone
            .get(position)
            .copied()
            .flatten()
            .map(|index| &self.elements[index])
            .ok_or_else(|| self.not_in_scale(format!("semitone position {position}")))
    }

    pub fn get_element_by_position_in_degrees(&self, position: usize) -> Result<&ScaleElement> {
        self.elements
            .get(position)
            .ok_or_else(|| self.not_in_scale(format!("degree position {position}")))
    }

    /// Piano-key positions of all tonic triad members.
    pub fn tonic_triad_positions(&self) -> Vec<usize> {
        self.elements
            .iter()
            .filter(|e| e.is_from_tonic_triad)
            .map(|e| e.position_in_semitones)
            .collect()
    }

    fn not_in_scale(&self, what: String) -> MusicError {
        MusicError::NotInScale {
            what,
            scale: self.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TONICS: [&str; 12] = [
        "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
    ];
    const ALL_TYPES: [ScaleType; 3] = [
        ScaleType::Major,
        ScaleType::NaturalMinor,
        ScaleType::HarmonicMinor,
    ];

    #[test]
    fn test_note_positions() {
        assert_eq!(note_to_position("A0").unwrap(), 0);
        assert_eq!(note_to_position("C1").unwrap(), 3);
        assert_eq!(note_to_position("C4").unwrap(), 39);
        assert_eq!(note_to_position("Db4").unwrap(), 40);
        assert_eq!(note_to_position("C#4").unwrap(), 40);
        assert_eq!(note_to_position("C8").unwrap(), 87);
        assert_eq!(position_to_note(39), "C4");
        assert_eq!(position_to_note(40), "C#4");
        assert!(note_to_position("H4").is_err());
        assert!(note_to_position("C9").is_err());
        assert!(note_to_position("G#0").is_err());
    }

    #[test]
    fn test_c_major_lowest_positions() {
        let scale = Scale::new("C", ScaleType::Major).unwrap();
        let positions: Vec<usize> = scale.elements()[..7]
            .iter()
            .map(|e| e.position_in_semitones)
            .collect();
        assert_eq!(positions, vec![0, 2, 3, 5, 7, 8, 10]);
        // A0 is the sixth degree of C major.
        assert_eq!(scale.elements()[0].degree, 6);
    }

    #[test]
    fn test_lookup_by_note() {
        let scale = Scale::new("C", ScaleType::Major).unwrap();
        let c1 = scale.get_element_by_note("C1").unwrap();
        assert_eq!(c1.position_in_semitones, 3);
        assert_eq!(c1.position_in_degrees, 2);
        assert_eq!(c1.degree, 1);
        assert!(c1.is_from_tonic_triad);

        let d4 = scale.get_element_by_note("D4").unwrap();
        assert_eq!(d4.degree, 2);
        assert!(!d4.is_from_tonic_triad);
        assert_eq!(d4.midi_pitch(), 62);
    }

    #[test]
    fn test_lookup_misses() {
        let scale = Scale::new("C", ScaleType::Major).unwrap();
        assert!(matches!(
            scale.get_element_by_note("C#4"),
            Err(MusicError::NotInScale { .. })
        ));
        assert!(matches!(
            scale.get_element_by_position_in_semitones(40),
            Err(MusicError::NotInScale { .. })
        ));
        assert!(matches!(
            scale.get_element_by_position_in_degrees(scale.len()),
            Err(MusicError::NotInScale { .. })
        ));
        assert!(matches!(
            scale.get_element_by_note("X4"),
            Err(MusicError::UnknownNote(_))
        ));
    }

    #[test]
    fn test_harmonic_minor_leading_tone() {
        let scale = Scale::new("A", ScaleType::HarmonicMinor).unwrap();
        let g_sharp = scale.get_element_by_note("G#4").unwrap();
        assert_eq!(g_sharp.degree, 7);
        assert!(scale.get_element_by_note("G4").is_err());
        let c = scale.get_element_by_note("C5").unwrap();
        assert!(c.is_from_tonic_triad);
        assert!(!scale.get_element_by_note("D5").unwrap().is_from_tonic_triad);
    }

    #[test]
    fn test_elements_strictly_increasing_and_degrees_cycle() {
        for tonic in ALL_TONICS {
            for scale_type in ALL_TYPES {
                let scale = Scale::new(tonic, scale_type).unwrap();
                for pair in scale.elements().windows(2) {
                    assert!(pair[0].position_in_semitones < pair[1].position_in_semitones);
                    assert_eq!(pair[0].position_in_degrees + 1, pair[1].position_in_degrees);
                    assert_eq!(pair[0].degree % 7 + 1, pair[1].degree);
                }
                for element in scale.elements() {
                    assert_eq!(
                        element.is_from_tonic_triad,
                        matches!(element.degree, 1 | 3 | 5)
                    );
                }
            }
        }
    }

    #[test]
    fn test_scale_type_parsing() {
        assert_eq!("major".parse::<ScaleType>().unwrap(), ScaleType::Major);
        assert_eq!(
            "harmonic_minor".parse::<ScaleType>().unwrap(),
            ScaleType::HarmonicMinor
        );
        assert!("lydian".parse::<ScaleType>().is_err());
        let scale = Scale::new("Bb", ScaleType::NaturalMinor).unwrap();
        assert_eq!(scale.name(), "A# natural_minor");
        assert!(scale.contains_pitch_class(1));
        assert!(!scale.contains_pitch_class(2));
    }
}
