//! Interaction-pattern classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interaction::InteractionEvent;
use crate::notes::HarmonicClass;

/// Fewest events `classify` will look at.
pub const MIN_CLASSIFY_EVENTS: usize = 3;
/// History size at which the session starts re-classifying after each event.
pub const ANALYSIS_TRIGGER_EVENTS: usize = 5;

const ENERGETIC_MAX_GAP_MS: f64 = 500.0;
const ENERGETIC_MIN_INTENSITY: f64 = 0.7;
const CALM_MIN_GAP_MS: f64 = 1500.0;
const CALM_MAX_INTENSITY: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionStyle {
    Energetic,
    Calm,
    #[default]
    Neutral,
}

impl fmt::Display for InteractionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InteractionStyle::Energetic => "energetic",
            InteractionStyle::Calm => "calm",
            InteractionStyle::Neutral => "neutral",
        })
    }
}

/// Majority harmonic class over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DominantHarmony {
    Major,
    Minor,
    Balanced,
}

impl fmt::Display for DominantHarmony {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DominantHarmony::Major => "major",
            DominantHarmony::Minor => "minor",
            DominantHarmony::Balanced => "balanced",
        })
    }
}

/// Classifies cadence and force of a window of interactions.
///
/// Returns `None` for fewer than [`MIN_CLASSIFY_EVENTS`] events. Events are
/// expected in timestamp order.
pub fn classify(window: &[InteractionEvent]) -> Option<InteractionStyle> {
    if window.len() < MIN_CLASSIFY_EVENTS {
        return None;
    }

    let gaps: f64 = window
        .windows(2)
        .map(|pair| pair[1].timestamp.saturating_sub(pair[0].timestamp) as f64)
        .sum();
    let mean_gap = gaps / (window.len() - 1) as f64;
    let mean_intensity =
        window.iter().map(|e| e.intensity as f64).sum::<f64>() / window.len() as f64;

    let style = if mean_gap < ENERGETIC_MAX_GAP_MS && mean_intensity > ENERGETIC_MIN_INTENSITY {
        InteractionStyle::Energetic
    } else if mean_gap > CALM_MIN_GAP_MS || mean_intensity < CALM_MAX_INTENSITY {
        InteractionStyle::Calm
    } else {
        InteractionStyle::Neutral
    };
    Some(style)
}

pub fn dominant_harmony<'a, I>(events: I) -> DominantHarmony
where
    I: IntoIterator<Item = &'a InteractionEvent>,
{
    let (mut major, mut minor) = (0usize, 0usize);
    for event in events {
        match event.note.harmonic_class() {
            Some(HarmonicClass::Major) => major += 1,
            Some(HarmonicClass::Minor) => minor += 1,
            None => {}
        }
    }
    match major.cmp(&minor) {
        std::cmp::Ordering::Greater => DominantHarmony::Major,
        std::cmp::Ordering::Less => DominantHarmony::Minor,
        std::cmp::Ordering::Equal => DominantHarmony::Balanced,
    }
}
