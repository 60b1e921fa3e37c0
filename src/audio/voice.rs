//! Per-note oscillators and their envelopes.

use crate::environment::Waveform;

/// Highest gain a single note may reach.
const MAX_PEAK: f32 = 0.8;

/// `min(0.8, 0.3 + intensity × 0.5)`
pub fn peak_gain(intensity: f32) -> f32 {
    (0.3 + intensity.clamp(0.0, 1.0) * 0.5).min(MAX_PEAK)
}

/// Linear attack, hold, linear release; reaches zero exactly at `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    peak: f32,
    attack_end: u64,
    release_start: u64,
    end: u64,
}

impl Envelope {
    /// All times in seconds. If attack and release do not fit into the note
    /// they are shrunk proportionally.
    pub fn new(attack: f32, release: f32, duration: f32, peak: f32, sample_rate: f32) -> Self {
        let duration = duration.max(0.0);
        let (mut attack, mut release) = (attack.max(0.0), release.max(0.0));
        let total = attack + release;
        if total > duration && total > 0.0 {
            let scale = duration / total;
            attack *= scale;
            release *= scale;
        }
        let to_samples = |secs: f32| (secs * sample_rate).round() as u64;
        let end = to_samples(duration);
        let attack_end = to_samples(attack).min(end);
        let release_start = end.saturating_sub(to_samples(release)).max(attack_end);
        Self {
            peak,
            attack_end,
            release_start,
            end,
        }
    }

    pub fn level(&self, t: u64) -> f32 {
        if t >= self.end {
            0.0
        } else if t < self.attack_end {
            self.peak * t as f32 / self.attack_end as f32
        } else if t < self.release_start {
            self.peak
        } else {
            let span = (self.end - self.release_start) as f32;
            self.peak * (self.end - t) as f32 / span
        }
    }

    pub fn end(&self) -> u64 {
        self.end
    }
}

pub type VoiceId = u64;

/// One sounding note: oscillator plus gain envelope.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: VoiceId,
    pub frequency: f32,
    waveform: Waveform,
    phase: f32,
    envelope: Envelope,
    elapsed: u64,
}

impl Voice {
    pub fn new(id: VoiceId, frequency: f32, waveform: Waveform, envelope: Envelope) -> Self {
        Self {
            id,
            frequency,
            waveform,
            phase: 0.0,
            envelope,
            elapsed: 0,
        }
    }

    pub fn next_sample(&mut self, sample_rate: f32) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let value = self.waveform.sample(self.phase) * self.envelope.level(self.elapsed);
        self.phase = (self.phase + self.frequency / sample_rate) % 1.0;
        self.elapsed += 1;
        value
    }

    /// Oscillator stops exactly where the envelope ends.
    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.envelope.end()
    }
}

/// Registry of sounding voices with oldest-first stealing.
#[derive(Debug)]
pub struct VoiceBank {
    voices: Vec<Voice>,
    max_voices: usize,
    next_id: VoiceId,
}

impl VoiceBank {
    pub fn new(max_voices: usize) -> Self {
        Self {
            voices: Vec::new(),
            max_voices: max_voices.max(1),
            next_id: 0,
        }
    }

    pub fn start(&mut self, frequency: f32, waveform: Waveform, envelope: Envelope) -> VoiceId {
        if self.voices.len() >= self.max_voices {
            // Voices are pushed in start order, so the front is the oldest.
            self.voices.remove(0);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.voices.push(Voice::new(id, frequency, waveform, envelope));
        id
    }

    /// Mixes one sample of every voice and disposes of the finished ones.
    pub fn next_sample(&mut self, sample_rate: f32) -> f32 {
        let mut sum = 0.0;
        for voice in self.voices.iter_mut() {
            sum += voice.next_sample(sample_rate);
        }
        self.voices.retain(|v| !v.is_finished());
        sum
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn silence_all(&mut self) {
        self.voices.clear();
    }
}
