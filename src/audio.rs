//! Audio engine: lazy output stream plus a rebuildable signal graph.

pub mod analyser;
pub mod effects;
pub mod graph;
pub mod voice;

use std::sync::Arc;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Sample, SampleFormat, StreamConfig,
};
use tracing::{error, info, warn};

use self::analyser::SpectrumAnalyser;
use self::graph::{AudioSettings, GraphPlan, SignalGraph};
use self::voice::peak_gain;
use crate::environment::SoundEnvironment;
use crate::error::{HeartbeatError, Result};
use crate::state::AudioState;

/// Effects the user can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Reverb,
    Delay,
}

enum Backend {
    /// Default output device, opened on first note.
    Device,
    /// No device; samples are pulled with [`AudioEngine::render`].
    Headless { sample_rate: f32 },
}

pub struct AudioEngine {
    state: Arc<AudioState>,
    backend: Backend,
    stream: Option<cpal::Stream>,
    unavailable: bool,
    closed: bool,
    environment: &'static SoundEnvironment,
    settings: AudioSettings,
    max_voices: usize,
    analyser: SpectrumAnalyser,
}

impl AudioEngine {
    pub fn new(environment: &'static SoundEnvironment, settings: AudioSettings, max_voices: usize) -> Self {
        Self::with_backend(Backend::Device, environment, settings, max_voices)
    }

    pub fn headless(
        sample_rate: f32,
        environment: &'static SoundEnvironment,
        settings: AudioSettings,
        max_voices: usize,
    ) -> Self {
        Self::with_backend(Backend::Headless { sample_rate }, environment, settings, max_voices)
    }

    fn with_backend(
        backend: Backend,
        environment: &'static SoundEnvironment,
        settings: AudioSettings,
        max_voices: usize,
    ) -> Self {
        Self {
            state: AudioState::new(),
            backend,
            stream: None,
            unavailable: false,
            closed: false,
            environment,
            settings,
            max_voices,
            analyser: SpectrumAnalyser::default(),
        }
    }

    /// Builds the graph (and opens the device) the first time it is needed.
    fn ensure_graph(&mut self) -> bool {
        if self.unavailable || self.closed {
            return false;
        }
        if self.state.graph().is_some() {
            return true;
        }

        let sample_rate = match self.backend {
            Backend::Headless { sample_rate } => sample_rate,
            Backend::Device => match open_output(self.state.clone()) {
                Ok((stream, sample_rate)) => {
                    self.stream = Some(stream);
                    sample_rate
                }
                Err(e) => {
                    error!("{}; audio disabled", e);
                    self.unavailable = true;
                    return false;
                }
            },
        };

        let mut graph = SignalGraph::new(sample_rate, self.max_voices);
        graph.apply(GraphPlan::build(self.environment, &self.settings));
        *self.state.graph() = Some(graph);
        info!("Audio graph ready at {} Hz", sample_rate);
        true
    }

    /// Sounds one note shaped by the active environment.
    ///
    /// Returns the frequency actually played, or `None` when audio is unavailable.
    pub fn play_note(&mut self, frequency: f32, duration_ms: u64, intensity: f32) -> Option<f32> {
        if !self.ensure_graph() {
            return None;
        }
        let env = self.environment;
        let adjusted = env.adjusted_frequency(frequency);
        let mut guard = self.state.graph();
        let graph = guard.as_mut()?;
        graph.start_voice(
            adjusted,
            env.waveform,
            env.attack,
            env.release,
            duration_ms as f32 / 1000.0,
            peak_gain(intensity),
        );
        Some(adjusted)
    }

    pub fn environment(&self) -> &'static SoundEnvironment {
        self.environment
    }

    pub fn set_environment(&mut self, environment: &'static SoundEnvironment) {
        self.environment = environment;
        self.rebuild_routing();
    }

    pub fn settings(&self) -> AudioSettings {
        self.settings
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.settings.volume = volume.min(100);
        self.rebuild_routing();
    }

    pub fn set_effect_enabled(&mut self, effect: Effect, enabled: bool) {
        match effect {
            Effect::Reverb => self.settings.reverb_enabled = enabled,
            Effect::Delay => self.settings.delay_enabled = enabled,
        }
        self.rebuild_routing();
    }

    fn rebuild_routing(&mut self) {
        let plan = GraphPlan::build(self.environment, &self.settings);
        if let Some(graph) = self.state.graph().as_mut() {
            let applied = graph.apply(plan);
            info!(
                "Routing for '{}': {} nodes",
                self.environment.name,
                applied.nodes.len()
            );
        }
    }

    /// Plan currently installed, if the graph exists.
    pub fn current_plan(&self) -> Option<GraphPlan> {
        self.state.graph().as_ref().map(|g| g.plan().clone())
    }

    pub fn active_voices(&self) -> usize {
        self.state.graph().as_ref().map_or(0, |g| g.voices().len())
    }

    /// Frequencies of the sounding voices, oldest first.
    pub fn voice_frequencies(&self) -> Vec<f32> {
        self.state
            .graph()
            .as_ref()
            .map(|g| g.voices().voices().iter().map(|v| v.frequency).collect())
            .unwrap_or_default()
    }

    /// Normalized spectrum bars from the analysis tap.
    pub fn frequency_data(&self, bars: usize) -> Vec<f32> {
        let samples = self.state.tap().snapshot();
        self.analyser.bars(&samples, bars)
    }

    /// Time-domain snapshot of the analysis tap.
    pub fn waveform(&self) -> Vec<f32> {
        self.state.tap().snapshot()
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable && !self.closed
    }

    /// Pulls samples directly; used by headless engines.
    pub fn render(&self, data: &mut [f32], channels: usize) {
        render_into(&self.state, data, channels);
    }

    /// Stops every voice, drops the graph and closes the output stream.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(graph) = self.state.graph().as_mut() {
            graph.silence_all();
        }
        *self.state.graph() = None;
        self.state.tap().clear();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause audio stream: {}", e);
            }
        }
        info!("Audio engine shut down");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_into(state: &AudioState, data: &mut [f32], channels: usize) {
    let mut graph = state.graph();
    match graph.as_mut() {
        Some(graph) => {
            let mut tap = state.tap();
            graph.render(data, channels, &mut tap);
        }
        None => data.fill(f32::EQUILIBRIUM),
    }
}

/// Opens the default output device and starts a stream that renders `state`.
fn open_output(state: Arc<AudioState>) -> Result<(cpal::Stream, f32)> {
    // Initialize the audio host and device
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| HeartbeatError::AudioUnavailable("no output device found".to_string()))?;
    info!(
        "Default output device found: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    // Get supported stream configuration
    let supported_config = device
        .default_output_config()
        .map_err(|e| HeartbeatError::AudioUnavailable(e.to_string()))?;
    if supported_config.sample_format() != SampleFormat::F32 {
        warn!(
            "Default output format is {:?}; requesting f32 anyway",
            supported_config.sample_format()
        );
    }

    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    info!("Audio stream configuration: {:?}", config);

    let channels = config.channels as usize;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_into(&state, data, channels);
            },
            |err| {
                error!("An error occurred on the audio stream: {}", err);
            },
            None,
        )
        .map_err(|e| HeartbeatError::AudioStream(e.to_string()))?;

    info!("Starting audio stream...");
    stream
        .play()
        .map_err(|e| HeartbeatError::AudioStream(e.to_string()))?;

    Ok((stream, config.sample_rate.0 as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::Note;

    fn engine(env_id: &str) -> AudioEngine {
        AudioEngine::headless(
            8000.0,
            SoundEnvironment::by_id(env_id).unwrap(),
            AudioSettings::default(),
            4,
        )
    }

    #[test]
    fn test_graph_is_built_lazily() {
        let mut engine = engine("starlight-meadow");
        assert!(engine.current_plan().is_none());
        engine.play_note(440.0, 500, 1.0);
        assert!(engine.current_plan().is_some());
        assert_eq!(engine.active_voices(), 1);
    }

    #[test]
    fn test_crystal_cave_frequency() {
        let mut engine = engine("crystal-ice-cave");
        let c = Note::by_name("C").unwrap();
        let played = engine.play_note(c.frequency, 1000, 0.5).unwrap();
        assert!((played - 533.73).abs() < 0.01, "played {}", played);
        assert_eq!(engine.voice_frequencies(), vec![played]);
    }

    #[test]
    fn test_every_note_uses_adjusted_frequency() {
        for env in SoundEnvironment::presets() {
            let mut engine = AudioEngine::headless(8000.0, env, AudioSettings::default(), 32);
            for note in crate::notes::NOTES.iter() {
                let played = engine.play_note(note.frequency, 100, 0.5).unwrap();
                let expected = note.frequency * env.frequency_multiplier * 2f32.powi(env.octave_shift);
                assert!((played - expected).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_voice_cap_steals_oldest() {
        let mut engine = engine("starlight-meadow");
        for f in [100.0, 200.0, 300.0, 400.0, 500.0] {
            engine.play_note(f, 1000, 0.5);
        }
        assert_eq!(engine.voice_frequencies(), vec![200.0, 300.0, 400.0, 500.0]);
    }

    #[test]
    fn test_voices_dispose_after_duration() {
        let mut engine = engine("starlight-meadow");
        engine.play_note(440.0, 100, 1.0);
        let mut buf = vec![0.0; 2 * 1000];
        engine.render(&mut buf, 2);
        assert_eq!(engine.active_voices(), 0);
        assert!(buf.iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn test_environment_switch_rebuilds_routing() {
        let mut engine = engine("starlight-meadow");
        engine.play_note(440.0, 100, 1.0);
        let before = engine.current_plan().unwrap();
        engine.set_environment(SoundEnvironment::by_id("cosmic-nebula").unwrap());
        let after = engine.current_plan().unwrap();
        assert_ne!(before, after);
        assert!(after.kinds().any(|k| matches!(k, graph::NodeKind::Phaser(_))));
    }

    #[test]
    fn test_effect_toggle_and_volume() {
        let mut engine = engine("starlight-meadow");
        engine.play_note(440.0, 100, 1.0);
        engine.set_effect_enabled(Effect::Reverb, false);
        engine.set_volume(150);
        let plan = engine.current_plan().unwrap();
        assert!(!plan.kinds().any(|k| matches!(k, graph::NodeKind::ReverbSend(_))));
        assert_eq!(engine.settings().volume, 100);
        assert!((plan.master_gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut engine = engine("starlight-meadow");
        engine.play_note(440.0, 5000, 1.0);
        engine.shutdown();
        assert_eq!(engine.active_voices(), 0);
        assert!(engine.current_plan().is_none());
        assert_eq!(engine.play_note(440.0, 100, 1.0), None);
        let mut buf = vec![1.0; 16];
        engine.render(&mut buf, 2);
        assert!(buf.iter().all(|&s| s == 0.0));
    }
}
