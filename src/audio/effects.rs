//! Effect stages: convolution reverb, feedback delay, chorus and phaser.
//!
//! Every stage processes one mono sample at a time and is built from the
//! parameters of a [`SoundEnvironment`](crate::environment::SoundEnvironment).
//! Constructors reject parameters they cannot render so the graph can fall
//! back to direct routing.

use std::f32::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::environment::{ChorusStage, DelaySend, PhaserStage, ReverbSend};
use crate::error::{HeartbeatError, Result};

/// Partition size of the reverb convolution; also its latency in samples.
pub const REVERB_BLOCK: usize = 256;
const MAX_REVERB_SECONDS: f32 = 10.0;
const MAX_DELAY_SECONDS: f32 = 2.0;
const MAX_FEEDBACK: f32 = 0.95;
/// Amplitude falls by 60 dB over the decay time.
const DECAY_60DB: f32 = 6.907_755;

pub trait Processor: Send {
    fn process(&mut self, input: f32) -> f32;
}

fn check(ok: bool, what: impl FnOnce() -> String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(HeartbeatError::EffectConstruction(what()))
    }
}

fn check_sample_rate(sample_rate: f32) -> Result<()> {
    check(sample_rate.is_finite() && sample_rate > 0.0, || {
        format!("sample rate {}", sample_rate)
    })
}

/// White noise with an exponential decay, preceded by `pre_delay` seconds of silence.
pub fn synthetic_impulse(decay: f32, pre_delay: f32, sample_rate: f32, seed: u64) -> Vec<f32> {
    let silent = (pre_delay * sample_rate).round() as usize;
    let tail = (decay * sample_rate).round().max(1.0) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut impulse = vec![0.0; silent];
    impulse.extend((0..tail).map(|i| {
        let t = i as f32 / sample_rate;
        rng.gen_range(-1.0..=1.0f32) * (-DECAY_60DB * t / decay).exp()
    }));

    // Unit energy keeps long and short rooms at a comparable loudness.
    let energy: f32 = impulse.iter().map(|s| s * s).sum();
    if energy > 0.0 {
        let norm = energy.sqrt().recip();
        impulse.iter_mut().for_each(|s| *s *= norm);
    }
    impulse
}

/// Uniformly partitioned overlap-add convolution.
pub struct ConvolutionReverb {
    partitions: Vec<Vec<Complex<f32>>>,
    /// Input spectra, one per partition, used as a ring; `head` is the newest.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    acc: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    input: Vec<f32>,
    output: Vec<f32>,
    overlap: Vec<f32>,
    pos: usize,
}

impl ConvolutionReverb {
    pub fn new(params: &ReverbSend, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        check(params.decay > 0.0 && params.decay <= MAX_REVERB_SECONDS, || {
            format!("reverb decay {}s", params.decay)
        })?;
        check((0.0..=1.0).contains(&params.pre_delay), || {
            format!("reverb pre-delay {}s", params.pre_delay)
        })?;
        let impulse = synthetic_impulse(params.decay, params.pre_delay, sample_rate, 0x5EED);
        Ok(Self::from_impulse(&impulse))
    }

    pub fn from_impulse(impulse: &[f32]) -> Self {
        let size = REVERB_BLOCK * 2;
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        let partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(REVERB_BLOCK)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); size];
                for (slot, &s) in spectrum.iter_mut().zip(chunk) {
                    slot.re = s;
                }
                forward.process(&mut spectrum);
                spectrum
            })
            .collect();

        let zero = Complex::new(0.0, 0.0);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            history: vec![vec![zero; size]; partitions.len()],
            head: 0,
            acc: vec![zero; size],
            scratch: vec![zero; scratch_len],
            partitions,
            forward,
            inverse,
            input: vec![0.0; REVERB_BLOCK],
            output: vec![0.0; REVERB_BLOCK],
            overlap: vec![0.0; REVERB_BLOCK],
            pos: 0,
        }
    }

    /// Runs in the audio callback; works only in preallocated buffers.
    fn convolve_block(&mut self) {
        let count = self.history.len();
        if count == 0 {
            self.output.fill(0.0);
            return;
        }
        let zero = Complex::new(0.0, 0.0);

        // The oldest slot becomes the newest.
        self.head = (self.head + count - 1) % count;
        let spectrum = &mut self.history[self.head];
        spectrum.fill(zero);
        for (slot, &s) in spectrum.iter_mut().zip(&self.input) {
            slot.re = s;
        }
        self.forward.process_with_scratch(spectrum, &mut self.scratch);

        self.acc.fill(zero);
        for (age, partition) in self.partitions.iter().enumerate() {
            let past = &self.history[(self.head + age) % count];
            for ((a, x), h) in self.acc.iter_mut().zip(past).zip(partition) {
                *a += x * h;
            }
        }
        self.inverse.process_with_scratch(&mut self.acc, &mut self.scratch);

        let scale = 1.0 / self.acc.len() as f32;
        for i in 0..REVERB_BLOCK {
            self.output[i] = self.acc[i].re * scale + self.overlap[i];
            self.overlap[i] = self.acc[i + REVERB_BLOCK].re * scale;
        }
    }
}

impl Processor for ConvolutionReverb {
    fn process(&mut self, input: f32) -> f32 {
        let out = self.output[self.pos];
        self.input[self.pos] = input;
        self.pos += 1;
        if self.pos == REVERB_BLOCK {
            self.pos = 0;
            self.convolve_block();
        }
        out
    }
}

/// Delay line whose output is fed back into its input.
pub struct FeedbackDelay {
    buffer: Vec<f32>,
    feedback: f32,
    pos: usize,
}

impl FeedbackDelay {
    pub fn new(params: &DelaySend, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        check(params.time > 0.0 && params.time <= MAX_DELAY_SECONDS, || {
            format!("delay time {}s", params.time)
        })?;
        check((0.0..=MAX_FEEDBACK).contains(&params.feedback), || {
            format!("delay feedback {}", params.feedback)
        })?;
        let len = ((params.time * sample_rate).round() as usize).max(1);
        Ok(Self {
            buffer: vec![0.0; len],
            feedback: params.feedback,
            pos: 0,
        })
    }
}

impl Processor for FeedbackDelay {
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        self.buffer[self.pos] = input + delayed * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        delayed
    }
}

/// Sine LFO, `phase` in [0, 1).
#[derive(Debug, Clone, Copy)]
struct Lfo {
    phase: f32,
    increment: f32,
}

impl Lfo {
    fn new(rate_hz: f32, sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            increment: rate_hz / sample_rate,
        }
    }

    /// Next value in [0, 1].
    fn next_unipolar(&mut self) -> f32 {
        let value = 0.5 + 0.5 * (2.0 * PI * self.phase).sin();
        self.phase = (self.phase + self.increment) % 1.0;
        value
    }
}

const CHORUS_BASE_MS: f32 = 15.0;

pub struct Chorus {
    buffer: Vec<f32>,
    pos: usize,
    lfo: Lfo,
    base: f32,
    depth: f32,
    mix: f32,
}

impl Chorus {
    pub fn new(params: &ChorusStage, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        check(params.rate_hz > 0.0 && params.rate_hz < 20.0, || {
            format!("chorus rate {}Hz", params.rate_hz)
        })?;
        check(params.depth_ms >= 0.0 && params.depth_ms <= CHORUS_BASE_MS, || {
            format!("chorus depth {}ms", params.depth_ms)
        })?;
        check((0.0..=1.0).contains(&params.mix), || format!("chorus mix {}", params.mix))?;

        let base = CHORUS_BASE_MS / 1000.0 * sample_rate;
        let depth = params.depth_ms / 1000.0 * sample_rate;
        let len = (base + depth).ceil() as usize + 2;
        Ok(Self {
            buffer: vec![0.0; len],
            pos: 0,
            lfo: Lfo::new(params.rate_hz, sample_rate),
            base,
            depth,
            mix: params.mix,
        })
    }

    fn read_delayed(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let read = (self.pos as f32 - delay).rem_euclid(len as f32);
        let i0 = read.floor() as usize % len;
        let i1 = (i0 + 1) % len;
        let frac = read - read.floor();
        self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac
    }
}

impl Processor for Chorus {
    fn process(&mut self, input: f32) -> f32 {
        self.buffer[self.pos] = input;
        let delay = self.base + self.depth * self.lfo.next_unipolar();
        let wet = self.read_delayed(delay);
        self.pos = (self.pos + 1) % self.buffer.len();
        input * (1.0 - self.mix) + wet * self.mix
    }
}

const PHASER_MIN_HZ: f32 = 200.0;
const PHASER_SWEEP_HZ: f32 = 1600.0;

pub struct Phaser {
    states: Vec<f32>,
    lfo: Lfo,
    depth: f32,
    feedback: f32,
    last: f32,
    sample_rate: f32,
}

impl Phaser {
    pub fn new(params: &PhaserStage, sample_rate: f32) -> Result<Self> {
        check_sample_rate(sample_rate)?;
        check(params.stages > 0 && params.stages <= 12, || {
            format!("phaser stages {}", params.stages)
        })?;
        check(params.rate_hz > 0.0 && params.rate_hz < 20.0, || {
            format!("phaser rate {}Hz", params.rate_hz)
        })?;
        check((0.0..=1.0).contains(&params.depth), || format!("phaser depth {}", params.depth))?;
        check((0.0..=MAX_FEEDBACK).contains(&params.feedback), || {
            format!("phaser feedback {}", params.feedback)
        })?;
        Ok(Self {
            states: vec![0.0; params.stages],
            lfo: Lfo::new(params.rate_hz, sample_rate),
            depth: params.depth,
            feedback: params.feedback,
            last: 0.0,
            sample_rate,
        })
    }
}

impl Processor for Phaser {
    fn process(&mut self, input: f32) -> f32 {
        let freq = PHASER_MIN_HZ + PHASER_SWEEP_HZ * self.depth * self.lfo.next_unipolar();
        let t = (PI * freq / self.sample_rate).tan();
        let a = (t - 1.0) / (t + 1.0);

        let mut x = input + self.last * self.feedback;
        for z in self.states.iter_mut() {
            let y = a * x + *z;
            *z = x - a * y;
            x = y;
        }
        self.last = x;
        0.5 * (input + x)
    }
}
