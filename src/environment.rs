//! Built-in sound environments.
//!
//! An environment bundles everything that changes when the user picks a new
//! "place" for the canvas: oscillator timbre, envelope times, effect sends and
//! the visual palette. Exactly one is active at a time and the set is static.

use serde::{Deserialize, Serialize};

use crate::error::{HeartbeatError, Result};

/// 8-bit RGB color, serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn hex(value: u32) -> Self {
        Self::new((value >> 16) as u8, (value >> 8) as u8, value as u8)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let digits = s.trim().trim_start_matches('#');
        if digits.len() != 6 {
            return Err(HeartbeatError::InvalidColor(s.to_string()));
        }
        u32::from_str_radix(digits, 16)
            .map(Self::hex)
            .map_err(|_| HeartbeatError::InvalidColor(s.to_string()))
    }

    /// Multiplies every channel by `factor`, saturating at 255.
    pub fn scaled(self, factor: f32) -> Self {
        let scale = |c: u8| (c as f32 * factor).round().clamp(0.0, 255.0) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

impl TryFrom<String> for Rgb {
    type Error = HeartbeatError;

    fn try_from(value: String) -> Result<Self> {
        Rgb::parse(&value)
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> Self {
        c.to_string()
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    /// One sample at `phase` in [0, 1).
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (2.0 * std::f32::consts::PI * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Ripple,
    Burst,
    Wave,
    Spiral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSend {
    pub wet: f32,
    /// Impulse length in seconds.
    pub decay: f32,
    /// Seconds of silence before the impulse starts.
    pub pre_delay: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySend {
    pub wet: f32,
    /// Seconds between repeats.
    pub time: f32,
    pub feedback: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChorusStage {
    pub rate_hz: f32,
    pub depth_ms: f32,
    pub mix: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaserStage {
    pub rate_hz: f32,
    pub depth: f32,
    pub feedback: f32,
    pub stages: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualStyle {
    pub primary: Rgb,
    pub secondary: Rgb,
    pub background: Rgb,
    pub shapes: &'static [ShapeType],
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoundEnvironment {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub frequency_multiplier: f32,
    pub octave_shift: i32,
    /// Seconds.
    pub attack: f32,
    /// Seconds.
    pub release: f32,
    pub reverb: ReverbSend,
    pub delay: DelaySend,
    pub waveform: Waveform,
    pub chorus: Option<ChorusStage>,
    pub phaser: Option<PhaserStage>,
    pub visual: VisualStyle,
}

use ShapeType::*;

static PRESETS: [SoundEnvironment; 6] = [
    SoundEnvironment {
        id: "starlight-meadow",
        name: "Starlight Meadow",
        description: "Soft sine bells drifting over a quiet field at dusk.",
        frequency_multiplier: 1.0,
        octave_shift: 0,
        attack: 0.05,
        release: 0.8,
        reverb: ReverbSend {
            wet: 0.3,
            decay: 2.0,
            pre_delay: 0.02,
        },
        delay: DelaySend {
            wet: 0.15,
            time: 0.3,
            feedback: 0.3,
        },
        waveform: Waveform::Sine,
        chorus: None,
        phaser: None,
        visual: VisualStyle {
            primary: Rgb::hex(0xFF85B3),
            secondary: Rgb::hex(0xC9E4FF),
            background: Rgb::hex(0xFFF6FA),
            shapes: &[Ripple, Burst, Wave, Spiral],
        },
    },
    SoundEnvironment {
        id: "ocean-depths",
        name: "Ocean Depths",
        description: "Low, slow triangle tones rolling like deep water.",
        frequency_multiplier: 1.0,
        octave_shift: -1,
        attack: 0.15,
        release: 1.5,
        reverb: ReverbSend {
            wet: 0.5,
            decay: 3.5,
            pre_delay: 0.04,
        },
        delay: DelaySend {
            wet: 0.25,
            time: 0.45,
            feedback: 0.4,
        },
        waveform: Waveform::Triangle,
        chorus: Some(ChorusStage {
            rate_hz: 0.3,
            depth_ms: 4.0,
            mix: 0.4,
        }),
        phaser: None,
        visual: VisualStyle {
            primary: Rgb::hex(0x3195FF),
            secondary: Rgb::hex(0x7DBCFF),
            background: Rgb::hex(0x0B1E3A),
            shapes: &[Wave, Ripple],
        },
    },
    SoundEnvironment {
        id: "crystal-ice-cave",
        name: "Crystal Ice Cave",
        description: "Bright, slightly sharp chimes echoing off frozen walls.",
        frequency_multiplier: 1.02,
        octave_shift: 1,
        attack: 0.01,
        release: 1.2,
        reverb: ReverbSend {
            wet: 0.6,
            decay: 4.0,
            pre_delay: 0.03,
        },
        delay: DelaySend {
            wet: 0.3,
            time: 0.25,
            feedback: 0.45,
        },
        waveform: Waveform::Sine,
        chorus: Some(ChorusStage {
            rate_hz: 0.8,
            depth_ms: 2.0,
            mix: 0.3,
        }),
        phaser: None,
        visual: VisualStyle {
            primary: Rgb::hex(0xA3D0FF),
            secondary: Rgb::hex(0xE8F7FF),
            background: Rgb::hex(0x0E2233),
            shapes: &[Burst, Spiral, Ripple],
        },
    },
    SoundEnvironment {
        id: "forest-whispers",
        name: "Forest Whispers",
        description: "Woody triangle tones under a canopy of leaves.",
        frequency_multiplier: 0.98,
        octave_shift: 0,
        attack: 0.08,
        release: 1.0,
        reverb: ReverbSend {
            wet: 0.35,
            decay: 2.5,
            pre_delay: 0.02,
        },
        delay: DelaySend {
            wet: 0.2,
            time: 0.35,
            feedback: 0.25,
        },
        waveform: Waveform::Triangle,
        chorus: None,
        phaser: None,
        visual: VisualStyle {
            primary: Rgb::hex(0x5FAF6E),
            secondary: Rgb::hex(0xD8F8E1),
            background: Rgb::hex(0x10261A),
            shapes: &[Wave, Ripple, Spiral],
        },
    },
    SoundEnvironment {
        id: "sunset-desert",
        name: "Sunset Desert",
        description: "Warm sawtooth plucks with long sweeping echoes.",
        frequency_multiplier: 1.0,
        octave_shift: 0,
        attack: 0.02,
        release: 0.6,
        reverb: ReverbSend {
            wet: 0.2,
            decay: 1.5,
            pre_delay: 0.01,
        },
        delay: DelaySend {
            wet: 0.35,
            time: 0.5,
            feedback: 0.35,
        },
        waveform: Waveform::Sawtooth,
        chorus: None,
        phaser: Some(PhaserStage {
            rate_hz: 0.25,
            depth: 0.7,
            feedback: 0.3,
            stages: 4,
        }),
        visual: VisualStyle {
            primary: Rgb::hex(0xFF9F45),
            secondary: Rgb::hex(0xFFF3CD),
            background: Rgb::hex(0x2B1608),
            shapes: &[Burst, Wave, Ripple],
        },
    },
    SoundEnvironment {
        id: "cosmic-nebula",
        name: "Cosmic Nebula",
        description: "Shimmering square pads swirling through deep space.",
        frequency_multiplier: 1.0,
        octave_shift: 1,
        attack: 0.3,
        release: 2.0,
        reverb: ReverbSend {
            wet: 0.7,
            decay: 5.0,
            pre_delay: 0.06,
        },
        delay: DelaySend {
            wet: 0.4,
            time: 0.6,
            feedback: 0.5,
        },
        waveform: Waveform::Square,
        chorus: Some(ChorusStage {
            rate_hz: 0.5,
            depth_ms: 5.0,
            mix: 0.5,
        }),
        phaser: Some(PhaserStage {
            rate_hz: 0.15,
            depth: 0.8,
            feedback: 0.5,
            stages: 6,
        }),
        visual: VisualStyle {
            primary: Rgb::hex(0xB57BFF),
            secondary: Rgb::hex(0xFF5C8D),
            background: Rgb::hex(0x0A0614),
            shapes: &[Ripple, Burst, Wave, Spiral],
        },
    },
];

impl SoundEnvironment {
    pub fn presets() -> &'static [SoundEnvironment] {
        &PRESETS
    }

    pub fn by_id(id: &str) -> Result<&'static SoundEnvironment> {
        PRESETS
            .iter()
            .find(|env| env.id == id)
            .ok_or_else(|| HeartbeatError::UnknownEnvironment(id.to_string()))
    }

    pub fn default_preset() -> &'static SoundEnvironment {
        &PRESETS[0]
    }

    /// `base × multiplier × 2^octave_shift`
    pub fn adjusted_frequency(&self, base: f32) -> f32 {
        base * self.frequency_multiplier * 2f32.powi(self.octave_shift)
    }
}
