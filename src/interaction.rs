//! Input normalization.
//!
//! Pointer clicks, MIDI messages, mapped keys, collaborator events and replayed
//! frames all arrive as [`RawInput`] and leave as a single [`InteractionEvent`]
//! shape. The router holds the little bit of input state that decides whether a
//! raw input produces an event at all: MIDI precedence over the pointer, the
//! held-key set and the accessibility toggle.

use std::collections::{HashSet, VecDeque};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::environment::{Rgb, ShapeType};
use crate::notes::{Note, NoteRef};

/// Rolling window length used for analysis.
pub const HISTORY_WINDOW_MS: u64 = 10_000;
/// Maximum number of events kept in the rolling window.
pub const HISTORY_MAX_EVENTS: usize = 10;
/// Velocity-free intensity for mapped keys.
pub const KEY_INTENSITY: f32 = 0.7;

/// Physical keys of the accessibility keyboard, in slot order.
pub const KEY_MAP: [(char, &str); 12] = [
    ('a', "C"),
    ('w', "C#"),
    ('s', "D"),
    ('e', "D#"),
    ('d', "E"),
    ('f', "F"),
    ('t', "F#"),
    ('g', "G"),
    ('y', "G#"),
    ('h', "A"),
    ('u', "A#"),
    ('j', "B"),
];

/// Where an interaction came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Pointer,
    Midi,
    Key(char),
    Collaborator(String),
    Playback,
}

/// One normalized interaction. Immutable once routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Milliseconds on the session clock.
    pub timestamp: u64,
    pub x: f32,
    pub y: f32,
    /// 0.0-1.0
    pub intensity: f32,
    pub note: NoteRef,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
}

impl InteractionEvent {
    pub fn new(timestamp: u64, x: f32, y: f32, intensity: f32, note: NoteRef, origin: Origin) -> Self {
        Self {
            timestamp,
            x,
            y,
            intensity: intensity.clamp(0.0, 1.0),
            note,
            origin,
            shape: None,
            color: None,
        }
    }

    /// Stamps the visual assigned at spawn time.
    pub fn with_visual(mut self, shape: ShapeType, color: Rgb) -> Self {
        self.shape = Some(shape);
        self.color = Some(color);
        self
    }

    /// Same note, position, intensity and visual, re-stamped for a new origin.
    fn replayed(&self, timestamp: u64, origin: Origin) -> Self {
        Self {
            timestamp,
            origin,
            ..self.clone()
        }
    }
}

/// MIDI messages the canvas reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiMessage {
    /// Sustain pedal controller number
    pub const SUSTAIN: u8 = 64;

    /// Parse a MIDI message from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }
        let status = bytes[0];
        let channel = status & 0x0F;
        match status & 0xF0 {
            // Note On with velocity 0 is treated as Note Off
            0x90 if bytes[2] == 0 => Some(MidiMessage::NoteOff {
                channel,
                note: bytes[1],
            }),
            0x90 => Some(MidiMessage::NoteOn {
                channel,
                note: bytes[1],
                velocity: bytes[2],
            }),
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: bytes[1],
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                controller: bytes[1],
                value: bytes[2],
            }),
            _ => None,
        }
    }
}

/// Input before normalization.
#[derive(Debug, Clone)]
pub enum RawInput {
    /// Canvas-local pointer position.
    Pointer { x: f32, y: f32 },
    Midi(Vec<u8>),
    KeyDown(char),
    KeyUp(char),
    Remote { peer: String, event: InteractionEvent },
    Replay(InteractionEvent),
}

/// What the router made of a raw input.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Event(InteractionEvent),
    /// Sustain pedal moved: `true` when pressed.
    Sustain(bool),
    Ignored,
}

#[derive(Debug)]
pub struct InteractionRouter {
    midi_connected: bool,
    accessibility: bool,
    active_keys: HashSet<char>,
    width: f32,
    height: f32,
}

impl InteractionRouter {
    pub fn new(width: f32, height: f32, accessibility: bool) -> Self {
        Self {
            midi_connected: false,
            accessibility,
            active_keys: HashSet::new(),
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn set_canvas_size(&mut self, width: f32, height: f32) {
        self.width = width.max(1.0);
        self.height = height.max(1.0);
    }

    pub fn set_midi_connected(&mut self, connected: bool) {
        self.midi_connected = connected;
    }

    pub fn midi_connected(&self) -> bool {
        self.midi_connected
    }

    pub fn set_accessibility(&mut self, enabled: bool) {
        self.accessibility = enabled;
        if !enabled {
            self.active_keys.clear();
        }
    }

    pub fn accessibility(&self) -> bool {
        self.accessibility
    }

    pub fn submit<R: Rng + ?Sized>(&mut self, raw: RawInput, now: u64, rng: &mut R) -> Routed {
        match raw {
            RawInput::Pointer { x, y } => {
                if self.midi_connected {
                    debug!("Pointer input ignored while MIDI is connected");
                    return Routed::Ignored;
                }
                let note = Note::random(rng);
                Routed::Event(InteractionEvent::new(
                    now,
                    x,
                    y,
                    1.0,
                    NoteRef::named(note),
                    Origin::Pointer,
                ))
            }
            RawInput::Midi(bytes) => self.route_midi(&bytes, now, rng),
            RawInput::KeyDown(key) => self.route_key_down(key, now),
            RawInput::KeyUp(key) => {
                self.active_keys.remove(&key.to_ascii_lowercase());
                Routed::Ignored
            }
            RawInput::Remote { peer, event } => {
                Routed::Event(event.replayed(now, Origin::Collaborator(peer)))
            }
            RawInput::Replay(event) => Routed::Event(event.replayed(now, Origin::Playback)),
        }
    }

    fn route_midi<R: Rng + ?Sized>(&mut self, bytes: &[u8], now: u64, rng: &mut R) -> Routed {
        match MidiMessage::from_bytes(bytes) {
            Some(MidiMessage::NoteOn { note, velocity, .. }) => {
                let x = rng.gen_range(0.0..self.width);
                let y = rng.gen_range(0.0..self.height);
                Routed::Event(InteractionEvent::new(
                    now,
                    x,
                    y,
                    velocity as f32 / 127.0,
                    NoteRef::Midi(note),
                    Origin::Midi,
                ))
            }
            Some(MidiMessage::ControlChange {
                controller: MidiMessage::SUSTAIN,
                value,
                ..
            }) => Routed::Sustain(value >= 64),
            other => {
                debug!("Unhandled MIDI message: {:?} ({:?})", other, bytes);
                Routed::Ignored
            }
        }
    }

    fn route_key_down(&mut self, key: char, now: u64) -> Routed {
        if !self.accessibility {
            return Routed::Ignored;
        }
        let key = key.to_ascii_lowercase();
        let Some(slot) = KEY_MAP.iter().position(|(k, _)| *k == key) else {
            return Routed::Ignored;
        };
        if !self.active_keys.insert(key) {
            return Routed::Ignored;
        }
        let slot_width = self.width / KEY_MAP.len() as f32;
        let x = slot as f32 * slot_width + slot_width / 2.0;
        let note = KEY_MAP[slot].1;
        Routed::Event(InteractionEvent::new(
            now,
            x,
            self.height / 2.0,
            KEY_INTENSITY,
            NoteRef::Named(note.to_string()),
            Origin::Key(key),
        ))
    }
}

/// Recent interactions: the last ten seconds, at most ten events.
#[derive(Debug, Default)]
pub struct InteractionHistory {
    events: VecDeque<InteractionEvent>,
    last_timestamp: Option<u64>,
}

impl InteractionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: InteractionEvent) {
        let now = event.timestamp;
        self.last_timestamp = Some(now);
        self.events.push_back(event);
        if let Some(cutoff) = now.checked_sub(HISTORY_WINDOW_MS) {
            self.events.retain(|e| e.timestamp > cutoff);
        }
        while self.events.len() > HISTORY_MAX_EVENTS {
            self.events.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> Vec<InteractionEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn expect_event(routed: Routed) -> InteractionEvent {
        match routed {
            Routed::Event(e) => e,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_pointer_event_uses_full_intensity_and_table_note() {
        let mut router = InteractionRouter::new(800.0, 600.0, false);
        let event = expect_event(router.submit(RawInput::Pointer { x: 10.0, y: 20.0 }, 5, &mut rng()));
        assert_eq!((event.x, event.y, event.intensity), (10.0, 20.0, 1.0));
        assert_eq!(event.origin, Origin::Pointer);
        match event.note {
            NoteRef::Named(ref n) => assert!(Note::by_name(n).is_some()),
            _ => panic!("pointer notes come from the table"),
        }
    }

    #[test]
    fn test_pointer_ignored_while_midi_connected() {
        let mut router = InteractionRouter::new(800.0, 600.0, false);
        router.set_midi_connected(true);
        let routed = router.submit(RawInput::Pointer { x: 1.0, y: 1.0 }, 0, &mut rng());
        assert_eq!(routed, Routed::Ignored);
    }

    #[test]
    fn test_midi_note_on() {
        let mut router = InteractionRouter::new(800.0, 600.0, false);
        let event = expect_event(router.submit(RawInput::Midi(vec![144, 61, 127]), 0, &mut rng()));
        assert_eq!(event.note, NoteRef::Midi(61));
        assert!((event.intensity - 1.0).abs() < 1e-6);
        assert!(event.x >= 0.0 && event.x < 800.0);
        assert!(event.y >= 0.0 && event.y < 600.0);

        let zero = router.submit(RawInput::Midi(vec![144, 61, 0]), 0, &mut rng());
        assert_eq!(zero, Routed::Ignored);
    }

    #[test]
    fn test_sustain_pedal() {
        let mut router = InteractionRouter::new(800.0, 600.0, false);
        assert_eq!(
            router.submit(RawInput::Midi(vec![176, 64, 64]), 0, &mut rng()),
            Routed::Sustain(true)
        );
        assert_eq!(
            router.submit(RawInput::Midi(vec![176, 64, 63]), 0, &mut rng()),
            Routed::Sustain(false)
        );
        assert_eq!(
            router.submit(RawInput::Midi(vec![176, 1, 100]), 0, &mut rng()),
            Routed::Ignored
        );
    }

    #[test]
    fn test_keys_require_accessibility_mode() {
        let mut router = InteractionRouter::new(1200.0, 600.0, false);
        assert_eq!(router.submit(RawInput::KeyDown('a'), 0, &mut rng()), Routed::Ignored);

        router.set_accessibility(true);
        let event = expect_event(router.submit(RawInput::KeyDown('w'), 0, &mut rng()));
        assert_eq!(event.note, NoteRef::Named("C#".into()));
        assert_eq!(event.x, 150.0);
        assert_eq!(event.y, 300.0);
        assert_eq!(event.intensity, KEY_INTENSITY);
    }

    #[test]
    fn test_held_key_does_not_repeat() {
        let mut router = InteractionRouter::new(1200.0, 600.0, true);
        assert!(matches!(router.submit(RawInput::KeyDown('a'), 0, &mut rng()), Routed::Event(_)));
        assert_eq!(router.submit(RawInput::KeyDown('a'), 10, &mut rng()), Routed::Ignored);
        router.submit(RawInput::KeyUp('a'), 20, &mut rng());
        assert!(matches!(router.submit(RawInput::KeyDown('a'), 30, &mut rng()), Routed::Event(_)));
    }

    #[test]
    fn test_replay_keeps_payload() {
        let mut router = InteractionRouter::new(800.0, 600.0, false);
        let original = InteractionEvent::new(100, 3.0, 4.0, 0.4, NoteRef::Midi(40), Origin::Midi)
            .with_visual(ShapeType::Wave, Rgb::new(1, 2, 3));
        let replayed = expect_event(router.submit(RawInput::Replay(original.clone()), 900, &mut rng()));
        assert_eq!(replayed.timestamp, 900);
        assert_eq!((replayed.x, replayed.y, replayed.intensity), (3.0, 4.0, 0.4));
        assert_eq!(replayed.note, original.note);
        assert_eq!(replayed.origin, Origin::Playback);
        assert_eq!(replayed.shape, Some(ShapeType::Wave));
        assert_eq!(replayed.color, Some(Rgb::new(1, 2, 3)));
    }

    #[test]
    fn test_history_keeps_events_from_session_start() {
        let mut history = InteractionHistory::new();
        for i in 0..5 {
            history.push(InteractionEvent::new(i * 100, 0.0, 0.0, 1.0, NoteRef::Midi(60), Origin::Midi));
        }
        assert_eq!(history.len(), 5);

        history.push(InteractionEvent::new(10_000, 0.0, 0.0, 1.0, NoteRef::Midi(60), Origin::Midi));
        assert_eq!(history.len(), 5);
        assert_eq!(history.events()[0].timestamp, 100);
    }

    #[test]
    fn test_history_caps_by_count_and_age() {
        let mut history = InteractionHistory::new();
        for i in 0..15 {
            history.push(InteractionEvent::new(i * 100, 0.0, 0.0, 1.0, NoteRef::Midi(60), Origin::Midi));
        }
        assert_eq!(history.len(), HISTORY_MAX_EVENTS);

        history.push(InteractionEvent::new(20_000, 0.0, 0.0, 1.0, NoteRef::Midi(60), Origin::Midi));
        assert_eq!(history.len(), 1);
        assert_eq!(history.last_timestamp(), Some(20_000));
    }
}
