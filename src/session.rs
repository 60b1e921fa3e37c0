//! The canvas session: routes every input through sound, visuals, history,
//! recording and collaboration, and advances all of them once per frame.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{self, InteractionStyle, ANALYSIS_TRIGGER_EVENTS};
use crate::audio::{AudioEngine, Effect};
use crate::collab::CollaborationChannel;
use crate::config::Config;
use crate::environment::{Rgb, SoundEnvironment};
use crate::error::Result;
use crate::interaction::{InteractionEvent, InteractionHistory, InteractionRouter, Origin, RawInput, Routed};
use crate::recorder::{PendingRecording, Recorder, Recording, SessionMode};
use crate::reflection::{ReflectionClient, ReflectionJob, ReflectionState, ReflectionTrigger};
use crate::visual::VisualEngine;

/// Hold time added on top of the environment's attack and release.
const NOTE_HOLD_MS: u64 = 500;

type Inbox = Arc<Mutex<VecDeque<(String, InteractionEvent)>>>;

pub struct CanvasSession {
    environment: &'static SoundEnvironment,
    router: InteractionRouter,
    history: InteractionHistory,
    style: InteractionStyle,
    reflection: ReflectionTrigger,
    reflection_client: Option<ReflectionClient>,
    reflection_job: Option<ReflectionJob>,
    fallback: String,
    visual: VisualEngine,
    recorder: Recorder,
    audio: AudioEngine,
    collab: Option<Box<dyn CollaborationChannel>>,
    inbox: Inbox,
    export_dir: PathBuf,
    rng: StdRng,
}

impl CanvasSession {
    pub fn new(config: &Config, mut audio: AudioEngine, width: f32, height: f32) -> Result<Self> {
        let environment = SoundEnvironment::by_id(&config.session.environment)?;
        audio.set_environment(environment);

        let mut visual = VisualEngine::new(
            width,
            config.visual.complexity,
            config.visual.max_elements,
            config.visual.canvas_mode,
        );
        visual.set_custom_colors(config.visual.primary_color, config.visual.secondary_color);

        info!("Session started in '{}'", environment.name);
        Ok(Self {
            environment,
            router: InteractionRouter::new(width, height, config.input.accessibility),
            history: InteractionHistory::new(),
            style: InteractionStyle::default(),
            reflection: ReflectionTrigger::new(),
            reflection_client: None,
            reflection_job: None,
            fallback: config.reflection.fallback.clone(),
            visual,
            recorder: Recorder::new(),
            audio,
            collab: None,
            inbox: Arc::default(),
            export_dir: config.session.export_dir.clone(),
            rng: StdRng::from_entropy(),
        })
    }

    #[cfg(test)]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn set_reflection_client(&mut self, client: Option<ReflectionClient>) {
        self.reflection_client = client;
    }

    pub fn environment(&self) -> &'static SoundEnvironment {
        self.environment
    }

    pub fn visual(&self) -> &VisualEngine {
        &self.visual
    }

    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    pub fn router(&self) -> &InteractionRouter {
        &self.router
    }

    pub fn history(&self) -> &InteractionHistory {
        &self.history
    }

    pub fn style(&self) -> InteractionStyle {
        self.style
    }

    pub fn reflection(&self) -> &ReflectionState {
        self.reflection.state()
    }

    pub fn recordings(&self) -> &[Recording] {
        self.recorder.recordings()
    }

    pub fn mode(&self) -> SessionMode {
        self.recorder.mode()
    }

    pub fn set_canvas_size(&mut self, width: f32, height: f32) {
        self.router.set_canvas_size(width, height);
        self.visual.set_width(width);
    }

    /// Routes one raw input to completion. Returns the event it produced, if any.
    pub fn submit(&mut self, raw: RawInput, now: u64) -> Option<InteractionEvent> {
        match self.router.submit(raw, now, &mut self.rng) {
            Routed::Event(event) => Some(self.handle_event(event)),
            Routed::Sustain(down) => {
                debug!("Sustain {}", if down { "down" } else { "up" });
                self.visual.set_glow(down);
                None
            }
            Routed::Ignored => None,
        }
    }

    fn handle_event(&mut self, event: InteractionEvent) -> InteractionEvent {
        let env = self.environment;
        let (shape, color) = self.visual.spawn(&event, &env.visual, &mut self.rng);
        let event = event.with_visual(shape, color);

        if let Some(frequency) = event.note.frequency() {
            let duration_ms = ((env.attack + env.release) * 1000.0) as u64 + NOTE_HOLD_MS;
            self.audio.play_note(frequency, duration_ms, event.intensity);
        }

        self.history.push(event.clone());
        if self.history.len() >= ANALYSIS_TRIGGER_EVENTS {
            if let Some(style) = analysis::classify(&self.history.events()) {
                if style != self.style {
                    debug!("Interaction style is now {}", style);
                }
                self.style = style;
            }
        }

        self.recorder.record(&event);

        if !matches!(event.origin, Origin::Collaborator(_)) {
            if let Some(channel) = &self.collab {
                if let Err(e) = channel.send(&event) {
                    warn!("Failed to share interaction: {}", e);
                }
            }
        }
        event
    }

    /// Advances every subsystem by one frame.
    pub fn tick(&mut self, now: u64) {
        self.recorder.begin_frame(now);
        for event in self.recorder.poll_playback(now) {
            self.submit(RawInput::Replay(event), now);
        }

        let remote: Vec<_> = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (peer, event) in remote {
            self.submit(RawInput::Remote { peer, event }, now);
        }

        self.visual.tick(now, &mut self.rng);
        self.reflection
            .evaluate(self.history.len(), self.history.last_timestamp(), now);

        if let Some(job) = self.reflection_job.as_mut() {
            if let Some(text) = job.poll() {
                self.reflection.resolve(text);
                self.reflection_job = None;
            }
        }
    }

    pub fn set_environment(&mut self, id: &str) -> Result<()> {
        let env = SoundEnvironment::by_id(id)?;
        self.environment = env;
        self.audio.set_environment(env);
        info!("Environment changed to '{}'", env.name);
        Ok(())
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.audio.set_volume(volume);
    }

    pub fn set_effect_enabled(&mut self, effect: Effect, enabled: bool) {
        self.audio.set_effect_enabled(effect, enabled);
    }

    pub fn set_complexity(&mut self, complexity: f32) {
        self.visual.set_complexity(complexity);
    }

    pub fn set_custom_colors(&mut self, primary: Option<Rgb>, secondary: Option<Rgb>) {
        self.visual.set_custom_colors(primary, secondary);
    }

    pub fn toggle_canvas_mode(&mut self) -> bool {
        let on = self.visual.toggle_canvas_mode();
        info!("{} mode", if on { "Canvas" } else { "Flow" });
        on
    }

    pub fn clear_canvas(&mut self) {
        self.visual.clear_persistent();
    }

    pub fn set_midi_connected(&mut self, connected: bool) {
        self.router.set_midi_connected(connected);
    }

    pub fn set_accessibility(&mut self, enabled: bool) {
        self.router.set_accessibility(enabled);
    }

    /// Requests a reflection if the prompt is showing.
    pub fn activate_reflection(&mut self) -> bool {
        let dominant = analysis::dominant_harmony(self.history.events().iter());
        let Some(request) = self.reflection.activate(self.style, dominant) else {
            return false;
        };
        match &self.reflection_client {
            Some(client) => self.reflection_job = Some(client.spawn(request)),
            None => self.reflection.resolve(self.fallback.clone()),
        }
        true
    }

    pub fn dismiss_reflection(&mut self) {
        self.reflection_job = None;
        self.reflection.dismiss();
    }

    pub fn start_recording(&mut self, now: u64) -> Result<()> {
        self.recorder.start_recording(now)
    }

    pub fn stop_recording(&mut self, now: u64) -> Result<PendingRecording> {
        self.recorder.stop_recording(now)
    }

    pub fn save_recording(&mut self, pending: PendingRecording, name: &str) -> Uuid {
        self.recorder.save_recording(pending, name).id
    }

    pub fn delete_recording(&mut self, id: Uuid) -> Result<()> {
        self.recorder.delete(id).map(|_| ())
    }

    pub fn play_recording(&mut self, id: Uuid, now: u64) -> Result<()> {
        self.recorder.play(id, now)
    }

    pub fn stop_playback(&mut self) {
        self.recorder.stop_playback();
    }

    pub fn export_recording(&self, id: Uuid) -> Result<PathBuf> {
        self.recorder.export_to_dir(id, &self.export_dir)
    }

    pub fn import_recording(&mut self, json: &str) -> Result<Uuid> {
        Ok(self.recorder.import_document(json)?.id)
    }

    /// Starts sharing interactions over `channel`; remote events are routed on the next tick.
    pub fn enable_collaboration(&mut self, mut channel: Box<dyn CollaborationChannel>) {
        let inbox = self.inbox.clone();
        channel.on_receive(Box::new(move |peer, event| {
            inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back((peer.to_string(), event.clone()));
        }));
        info!("Collaboration enabled");
        self.collab = Some(channel);
    }

    pub fn disable_collaboration(&mut self) {
        if self.collab.take().is_some() {
            info!("Collaboration disabled");
        }
    }

    pub fn collaborating(&self) -> bool {
        self.collab.is_some()
    }

    pub fn peers(&self) -> Vec<String> {
        self.collab.as_ref().map(|c| c.peers()).unwrap_or_default()
    }

    /// Stops sound, playback and pending requests. Idempotent.
    pub fn shutdown(&mut self) {
        self.recorder.stop_playback();
        self.reflection_job = None;
        self.collab = None;
        self.audio.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::AudioSettings;
    use crate::collab::LoopbackChannel;
    use crate::error::HeartbeatError;
    use crate::notes::NoteRef;

    fn session() -> CanvasSession {
        let config = Config::default();
        let env = SoundEnvironment::default_preset();
        let audio = AudioEngine::headless(8000.0, env, AudioSettings::default(), 32);
        CanvasSession::new(&config, audio, 800.0, 600.0)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(11))
    }

    fn pointer() -> RawInput {
        RawInput::Pointer { x: 100.0, y: 120.0 }
    }

    /// Within the ±20% brightness jitter of `base`.
    fn near(color: Rgb, base: Rgb) -> bool {
        let within = |c: u8, b: u8| {
            let b = b as f32;
            (c as f32) >= (b * 0.8).floor() && (c as f32) <= (b * 1.2).ceil().min(255.0)
        };
        within(color.r, base.r) && within(color.g, base.g) && within(color.b, base.b)
    }

    #[test]
    fn test_pointer_event_reaches_every_subsystem() {
        let mut session = session();
        let event = session.submit(pointer(), 1000).unwrap();

        assert!(event.shape.is_some() && event.color.is_some());
        assert_eq!(session.visual().elements().len(), 1);
        assert_eq!(session.audio().active_voices(), 1);
        assert_eq!(session.history().len(), 1);
        let played = session.audio().voice_frequencies()[0];
        assert_eq!(Some(played), event.note.frequency());
    }

    #[test]
    fn test_midi_takes_precedence_over_pointer() {
        let mut session = session();
        session.set_midi_connected(true);
        assert!(session.submit(pointer(), 0).is_none());
        assert!(session.visual().elements().is_empty());

        let event = session.submit(RawInput::Midi(vec![0x90, 60, 127]), 10).unwrap();
        assert_eq!(event.note, NoteRef::Midi(60));
        assert_eq!(session.visual().elements().len(), 1);
    }

    #[test]
    fn test_sustain_drives_glow() {
        let mut session = session();
        assert!(session.submit(RawInput::Midi(vec![0xB0, 64, 127]), 0).is_none());
        assert!(session.visual().glow());
        session.submit(RawInput::Midi(vec![0xB0, 64, 0]), 10);
        assert!(!session.visual().glow());
    }

    #[test]
    fn test_environment_switch_applies_to_next_note() {
        let mut session = session();
        let first = session.submit(RawInput::Midi(vec![0x90, 69, 100]), 0).unwrap();
        session.set_environment("ocean-depths").unwrap();
        assert_eq!(Some(session.visual().elements()[0].color), first.color);
        let event = session.submit(RawInput::Midi(vec![0x90, 69, 100]), 10).unwrap();

        let ocean = SoundEnvironment::by_id("ocean-depths").unwrap();
        assert!(ocean.visual.shapes.contains(&event.shape.unwrap()));
        assert_eq!(session.visual().elements()[0].color, first.color.unwrap());
        let spawned = session.visual().elements()[1].color;
        assert_eq!(Some(spawned), event.color);
        assert!(
            near(spawned, ocean.visual.primary) || near(spawned, ocean.visual.secondary),
            "{:?}",
            spawned
        );
        let freqs = session.audio().voice_frequencies();
        assert!((freqs[1] - 220.0).abs() < 1e-3, "got {}", freqs[1]);
        assert!(matches!(
            session.set_environment("nowhere"),
            Err(HeartbeatError::UnknownEnvironment(_))
        ));
        assert_eq!(session.environment().id, "ocean-depths");
    }

    #[test]
    fn test_style_updates_after_five_events() {
        let mut session = session();
        for i in 0..4 {
            session.submit(pointer(), i * 200);
        }
        assert_eq!(session.style(), InteractionStyle::Neutral);
        session.submit(pointer(), 800);
        assert_eq!(session.style(), InteractionStyle::Energetic);
    }

    #[test]
    fn test_reflection_without_client_uses_fallback() {
        let mut session = session();
        for i in 0..5 {
            session.submit(pointer(), i * 100);
        }
        session.tick(3000);
        assert_eq!(session.reflection(), &ReflectionState::Idle);
        session.tick(3500);
        assert_eq!(session.reflection(), &ReflectionState::PromptShown);

        assert!(session.activate_reflection());
        assert_eq!(
            session.reflection(),
            &ReflectionState::Showing(Config::default().reflection.fallback)
        );
        session.dismiss_reflection();
        assert_eq!(session.reflection(), &ReflectionState::Idle);
        assert!(!session.activate_reflection());
    }

    #[tokio::test]
    async fn test_reflection_job_resolves_on_tick() {
        use crate::reflection::{CompletionRequest, TextCompletion};
        use async_trait::async_trait;

        struct Poet;

        #[async_trait]
        impl TextCompletion for Poet {
            async fn complete(&self, _request: CompletionRequest) -> Result<String> {
                Ok("Pink bursts giggle across the sky.".to_string())
            }
        }

        let mut session = session();
        session.set_reflection_client(Some(ReflectionClient::new(
            Arc::new(Poet),
            tokio::runtime::Handle::current(),
            &Config::default().reflection,
        )));
        for i in 0..5 {
            session.submit(pointer(), i * 100);
        }
        session.tick(4000);
        assert!(session.activate_reflection());
        assert_eq!(session.reflection(), &ReflectionState::Pending);

        let mut now = 4000;
        while session.reflection() == &ReflectionState::Pending && now < 5000 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            now += 16;
            session.tick(now);
        }
        assert_eq!(
            session.reflection(),
            &ReflectionState::Showing("Pink bursts giggle across the sky.".to_string())
        );
    }

    #[test]
    fn test_recorded_session_replays_through_pipeline() {
        let mut session = session();
        session.start_recording(0).unwrap();
        session.tick(0);
        session.submit(RawInput::Midi(vec![0x90, 60, 100]), 5);
        session.tick(300);
        session.submit(RawInput::Midi(vec![0x90, 64, 100]), 305);
        let pending = session.stop_recording(600).unwrap();
        let id = session.save_recording(pending, "Two Notes");

        session.play_recording(id, 10_000).unwrap();
        assert_eq!(session.mode(), SessionMode::Playing);
        assert!(session.start_recording(10_001).is_err());

        let before = session.history().len();
        session.tick(10_000);
        assert_eq!(session.history().len(), before + 1);
        session.tick(10_299);
        assert_eq!(session.history().len(), before + 1);
        session.tick(10_300);
        assert_eq!(session.history().len(), before + 2);
        assert_eq!(session.mode(), SessionMode::Idle);

        let events = session.history().events();
        let replayed = &events[events.len() - 2..];
        assert!(replayed.iter().all(|e| e.origin == Origin::Playback));
        assert_eq!(replayed[0].note, NoteRef::Midi(60));
        assert_eq!(replayed[1].note, NoteRef::Midi(64));
    }

    #[test]
    fn test_replay_and_remote_keep_recorded_visuals() {
        let mut session = session();
        session.start_recording(0).unwrap();
        session.tick(0);
        let recorded = session.submit(RawInput::Midi(vec![0x90, 60, 100]), 5).unwrap();
        let pending = session.stop_recording(100).unwrap();
        let id = session.save_recording(pending, "One Note");

        session.play_recording(id, 1000).unwrap();
        session.tick(1000);
        let replayed = session.history().events().last().cloned().unwrap();
        assert_eq!(replayed.origin, Origin::Playback);
        assert_eq!((replayed.shape, replayed.color), (recorded.shape, recorded.color));
        let element = session.visual().elements().last().unwrap();
        assert_eq!(Some(element.shape), recorded.shape);
        assert_eq!(Some(element.color), recorded.color);

        let channel = LoopbackChannel::new();
        session.enable_collaboration(Box::new(channel.clone()));
        channel.inject_remote("ada", &recorded);
        session.tick(1100);
        let element = session.visual().elements().last().unwrap();
        assert_eq!(Some(element.shape), recorded.shape);
        assert_eq!(Some(element.color), recorded.color);
    }

    #[test]
    fn test_export_uses_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.session.export_dir = dir.path().to_path_buf();
        let audio = AudioEngine::headless(
            8000.0,
            SoundEnvironment::default_preset(),
            AudioSettings::default(),
            8,
        );
        let mut session = CanvasSession::new(&config, audio, 400.0, 300.0).unwrap();

        session.start_recording(0).unwrap();
        let pending = session.stop_recording(10).unwrap();
        let id = session.save_recording(pending, "Quiet Time");
        let path = session.export_recording(id).unwrap();
        assert_eq!(path, dir.path().join("quiet-time.json"));

        let json = std::fs::read_to_string(&path).unwrap();
        let imported = session.import_recording(&json).unwrap();
        assert_ne!(imported, id);
        assert_eq!(session.recordings().len(), 2);
    }

    #[test]
    fn test_collaboration_shares_and_receives() {
        let mut session = session();
        let channel = LoopbackChannel::new();
        session.enable_collaboration(Box::new(channel.clone()));
        channel.join("ada");
        assert_eq!(session.peers(), vec!["ada".to_string()]);

        let local = session.submit(pointer(), 0).unwrap();
        assert_eq!(channel.sent(), vec![local.clone()]);

        channel.inject_remote("ada", &local);
        assert_eq!(session.history().len(), 1);
        session.tick(50);
        assert_eq!(session.history().len(), 2);
        let events = session.history().events();
        assert_eq!(events[1].origin, Origin::Collaborator("ada".to_string()));
        // Remote events are not echoed back.
        assert_eq!(channel.sent().len(), 1);
    }

    #[test]
    fn test_canvas_mode_and_clear() {
        let mut session = session();
        assert!(session.toggle_canvas_mode());
        session.submit(pointer(), 0);
        session.tick(60_000);
        assert_eq!(session.visual().elements().len(), 1);
        session.clear_canvas();
        assert!(session.visual().elements().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut session = session();
        session.submit(pointer(), 0);
        session.shutdown();
        session.shutdown();
        assert_eq!(session.audio().active_voices(), 0);
        assert!(!session.audio().is_available());
        assert!(session.submit(pointer(), 10).is_some());
    }
}
