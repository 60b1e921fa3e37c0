use rand::Rng;
use serde::{Deserialize, Serialize};

/// Coarse major/minor colouring of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarmonicClass {
    Major,
    Minor,
}

impl HarmonicClass {
    /// Pitch classes 0, 4 and 7 (C, E, G) count as major, everything else minor.
    pub fn of_pitch_class(pc: u8) -> Self {
        match pc % 12 {
            0 | 4 | 7 => HarmonicClass::Major,
            _ => HarmonicClass::Minor,
        }
    }

    pub fn of_midi(note: u8) -> Self {
        Self::of_pitch_class(note % 12)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub name: &'static str,
    pub class: HarmonicClass,
    pub frequency: f32,
}

const fn note(name: &'static str, class: HarmonicClass, frequency: f32) -> Note {
    Note {
        name,
        class,
        frequency,
    }
}

/// Fourth-octave chromatic scale.
pub static NOTES: [Note; 12] = [
    note("C", HarmonicClass::Major, 261.63),
    note("C#", HarmonicClass::Minor, 277.18),
    note("D", HarmonicClass::Minor, 293.66),
    note("D#", HarmonicClass::Minor, 311.13),
    note("E", HarmonicClass::Major, 329.63),
    note("F", HarmonicClass::Minor, 349.23),
    note("F#", HarmonicClass::Minor, 369.99),
    note("G", HarmonicClass::Major, 392.0),
    note("G#", HarmonicClass::Minor, 415.3),
    note("A", HarmonicClass::Minor, 440.0),
    note("A#", HarmonicClass::Minor, 466.16),
    note("B", HarmonicClass::Minor, 493.88),
];

impl Note {
    pub fn by_name(name: &str) -> Option<&'static Note> {
        NOTES.iter().find(|n| n.name.eq_ignore_ascii_case(name))
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> &'static Note {
        &NOTES[rng.gen_range(0..NOTES.len())]
    }
}

/// How an interaction names its note: by table entry or by raw MIDI number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoteRef {
    Midi(u8),
    Named(String),
}

impl NoteRef {
    pub fn named(note: &Note) -> Self {
        NoteRef::Named(note.name.to_string())
    }

    pub fn harmonic_class(&self) -> Option<HarmonicClass> {
        match self {
            NoteRef::Named(name) => Note::by_name(name).map(|n| n.class),
            NoteRef::Midi(number) => Some(HarmonicClass::of_midi(*number)),
        }
    }

    /// Base frequency before any environment shaping.
    pub fn frequency(&self) -> Option<f32> {
        match self {
            NoteRef::Named(name) => Note::by_name(name).map(|n| n.frequency),
            NoteRef::Midi(number) => Some(midi_note_to_freq(*number)),
        }
    }
}

impl std::fmt::Display for NoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoteRef::Named(name) => f.write_str(name),
            NoteRef::Midi(number) => write!(f, "{}", number),
        }
    }
}

/// Converts a MIDI note to frequency
pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * (2.0_f32).powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        assert_eq!(Note::by_name("c#").map(|n| n.frequency), Some(277.18));
        assert!(Note::by_name("H").is_none());
    }

    #[test]
    fn test_midi_harmonic_heuristic() {
        assert_eq!(HarmonicClass::of_midi(60), HarmonicClass::Major);
        assert_eq!(HarmonicClass::of_midi(64), HarmonicClass::Major);
        assert_eq!(HarmonicClass::of_midi(67), HarmonicClass::Major);
        assert_eq!(HarmonicClass::of_midi(62), HarmonicClass::Minor);
        assert_eq!(HarmonicClass::of_midi(69), HarmonicClass::Minor);
    }

    #[test]
    fn test_table_agrees_with_heuristic() {
        for (pc, n) in NOTES.iter().enumerate() {
            assert_eq!(n.class, HarmonicClass::of_pitch_class(pc as u8), "{}", n.name);
        }
    }

    #[test]
    fn test_note_ref_frequency() {
        assert!((NoteRef::Midi(69).frequency().unwrap() - 440.0).abs() < 1e-3);
        assert_eq!(NoteRef::Named("G".into()).frequency(), Some(392.0));
        assert_eq!(NoteRef::Named("X".into()).harmonic_class(), None);
    }
}
