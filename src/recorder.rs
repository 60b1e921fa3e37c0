//! Session recording and playback.
//!
//! Recording groups interactions by frame. Each frame keeps its offset from
//! the start of the recording so playback keeps the recorded timing.
//! Recording and playback exclude each other.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{HeartbeatError, Result};
use crate::interaction::InteractionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Recording,
    Playing,
}

/// Events captured during one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Milliseconds since recording started.
    pub offset_ms: u64,
    pub events: Vec<InteractionEvent>,
}

/// A saved recording. This is also the export document format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub name: String,
    pub duration_ms: u64,
    pub frames: Vec<RecordedFrame>,
    pub created_at: DateTime<Utc>,
}

impl Recording {
    pub fn event_count(&self) -> usize {
        self.frames.iter().map(|f| f.events.len()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Lowercased name with whitespace runs collapsed to `-`.
    pub fn export_file_name(&self) -> String {
        let slug = self
            .name
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '/' || c == '\\')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if slug.is_empty() {
            format!("recording-{}.json", self.id)
        } else {
            format!("{}.json", slug)
        }
    }
}

/// A stopped recording that has not been named yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecording {
    pub duration_ms: u64,
    pub frames: Vec<RecordedFrame>,
}

#[derive(Debug)]
struct Capture {
    start: u64,
    frames: Vec<RecordedFrame>,
}

#[derive(Debug)]
struct Playback {
    id: Uuid,
    start: u64,
    frames: VecDeque<RecordedFrame>,
}

#[derive(Debug)]
enum Activity {
    Idle,
    Recording(Capture),
    Playing(Playback),
}

#[derive(Debug)]
pub struct Recorder {
    activity: Activity,
    recordings: Vec<Recording>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            activity: Activity::Idle,
            recordings: Vec::new(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self.activity {
            Activity::Idle => SessionMode::Idle,
            Activity::Recording(_) => SessionMode::Recording,
            Activity::Playing(_) => SessionMode::Playing,
        }
    }

    pub fn start_recording(&mut self, now: u64) -> Result<()> {
        match self.activity {
            Activity::Playing(_) => Err(HeartbeatError::RecordingWhilePlaying),
            Activity::Recording(_) => Err(HeartbeatError::AlreadyRecording),
            Activity::Idle => {
                info!("Recording started");
                self.activity = Activity::Recording(Capture {
                    start: now,
                    frames: vec![RecordedFrame {
                        offset_ms: 0,
                        events: Vec::new(),
                    }],
                });
                Ok(())
            }
        }
    }

    /// Opens a new frame; called once per tick while recording.
    pub fn begin_frame(&mut self, now: u64) {
        let Activity::Recording(capture) = &mut self.activity else {
            return;
        };
        let offset_ms = now.saturating_sub(capture.start);
        match capture.frames.last_mut() {
            // An empty frame is reused rather than stacking up idle ticks.
            Some(last) if last.events.is_empty() => last.offset_ms = offset_ms,
            Some(last) if last.offset_ms == offset_ms => {}
            _ => capture.frames.push(RecordedFrame {
                offset_ms,
                events: Vec::new(),
            }),
        }
    }

    /// Appends to the current frame. No-op unless recording.
    pub fn record(&mut self, event: &InteractionEvent) {
        if let Activity::Recording(capture) = &mut self.activity {
            if let Some(frame) = capture.frames.last_mut() {
                frame.events.push(event.clone());
            }
        }
    }

    pub fn stop_recording(&mut self, now: u64) -> Result<PendingRecording> {
        let capture = match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Recording(capture) => capture,
            other => {
                self.activity = other;
                return Err(HeartbeatError::NotRecording);
            }
        };
        let mut frames = capture.frames;
        frames.retain(|f| !f.events.is_empty());
        let duration_ms = now.saturating_sub(capture.start);
        info!("Recording stopped: {} frames over {}ms", frames.len(), duration_ms);
        Ok(PendingRecording { duration_ms, frames })
    }

    /// Names and stores a stopped recording; empty recordings are kept too.
    pub fn save_recording(&mut self, pending: PendingRecording, name: &str) -> &Recording {
        let name = match name.trim() {
            "" => format!("Recording {}", self.recordings.len() + 1),
            trimmed => trimmed.to_string(),
        };
        let recording = Recording {
            id: Uuid::new_v4(),
            name,
            duration_ms: pending.duration_ms,
            frames: pending.frames,
            created_at: Utc::now(),
        };
        info!("Saved recording '{}' ({})", recording.name, recording.id);
        self.push(recording)
    }

    fn push(&mut self, recording: Recording) -> &Recording {
        self.recordings.push(recording);
        let last = self.recordings.len() - 1;
        &self.recordings[last]
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn recording(&self, id: Uuid) -> Option<&Recording> {
        self.recordings.iter().find(|r| r.id == id)
    }

    pub fn delete(&mut self, id: Uuid) -> Result<Recording> {
        let index = self
            .recordings
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| HeartbeatError::UnknownRecording(id.to_string()))?;
        if matches!(&self.activity, Activity::Playing(p) if p.id == id) {
            self.stop_playback();
        }
        Ok(self.recordings.remove(index))
    }

    /// Starts playback, replacing any playback already running.
    pub fn play(&mut self, id: Uuid, now: u64) -> Result<()> {
        if let Activity::Recording(_) = self.activity {
            return Err(HeartbeatError::PlaybackWhileRecording);
        }
        let recording = self
            .recording(id)
            .ok_or_else(|| HeartbeatError::UnknownRecording(id.to_string()))?;
        info!("Playing '{}' ({} events)", recording.name, recording.event_count());
        let frames = recording.frames.iter().cloned().collect();
        self.activity = Activity::Playing(Playback { id, start: now, frames });
        Ok(())
    }

    /// Events of every frame that is due, in recorded order.
    pub fn poll_playback(&mut self, now: u64) -> Vec<InteractionEvent> {
        let Activity::Playing(playback) = &mut self.activity else {
            return Vec::new();
        };
        let elapsed = now.saturating_sub(playback.start);
        let mut due = Vec::new();
        while playback.frames.front().is_some_and(|f| f.offset_ms <= elapsed) {
            if let Some(frame) = playback.frames.pop_front() {
                due.extend(frame.events);
            }
        }
        if playback.frames.is_empty() {
            debug!("Playback finished");
            self.activity = Activity::Idle;
        }
        due
    }

    pub fn stop_playback(&mut self) {
        if let Activity::Playing(_) = self.activity {
            info!("Playback stopped");
            self.activity = Activity::Idle;
        }
    }

    /// Writes the recording as pretty JSON into `dir`.
    pub fn export_to_dir(&self, id: Uuid, dir: &Path) -> Result<PathBuf> {
        let recording = self
            .recording(id)
            .ok_or_else(|| HeartbeatError::UnknownRecording(id.to_string()))?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(recording.export_file_name());
        std::fs::write(&path, recording.to_json()?)?;
        info!("Exported '{}' to {:?}", recording.name, path);
        Ok(path)
    }

    /// Adds a previously exported recording. A clashing id is replaced.
    pub fn import_document(&mut self, json: &str) -> Result<&Recording> {
        let mut recording: Recording = serde_json::from_str(json)?;
        if self.recording(recording.id).is_some() {
            recording.id = Uuid::new_v4();
        }
        recording.frames.sort_by_key(|f| f.offset_ms);
        info!("Imported recording '{}'", recording.name);
        Ok(self.push(recording))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::Origin;
    use crate::notes::NoteRef;

    fn event(ts: u64, x: f32) -> InteractionEvent {
        InteractionEvent::new(ts, x, 10.0, 0.5, NoteRef::Midi(60), Origin::Pointer)
    }

    fn sample_recording(recorder: &mut Recorder) -> Uuid {
        recorder.start_recording(1000).unwrap();
        recorder.begin_frame(1000);
        recorder.record(&event(1000, 1.0));
        recorder.begin_frame(1016);
        recorder.begin_frame(1200);
        recorder.record(&event(1200, 2.0));
        recorder.record(&event(1201, 3.0));
        recorder.begin_frame(1216);
        let pending = recorder.stop_recording(1500).unwrap();
        recorder.save_recording(pending, "Morning Song").id
    }

    #[test]
    fn test_empty_frames_are_pruned() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);
        let recording = recorder.recording(id).unwrap();
        assert_eq!(recording.duration_ms, 500);
        let offsets: Vec<u64> = recording.frames.iter().map(|f| f.offset_ms).collect();
        assert_eq!(offsets, vec![0, 200]);
        assert_eq!(recording.event_count(), 3);
    }

    #[test]
    fn test_playback_preserves_relative_timing() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);

        recorder.play(id, 5000).unwrap();
        assert_eq!(recorder.mode(), SessionMode::Playing);

        let first = recorder.poll_playback(5000);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].x, 1.0);
        assert!(recorder.poll_playback(5199).is_empty());

        let second = recorder.poll_playback(5200);
        let xs: Vec<f32> = second.iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![2.0, 3.0]);
        assert_eq!(recorder.mode(), SessionMode::Idle);
    }

    #[test]
    fn test_late_poll_delivers_all_due_frames() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);
        recorder.play(id, 0).unwrap();
        assert_eq!(recorder.poll_playback(10_000).len(), 3);
    }

    #[test]
    fn test_recording_and_playback_exclude_each_other() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);

        recorder.play(id, 0).unwrap();
        assert!(matches!(
            recorder.start_recording(10),
            Err(HeartbeatError::RecordingWhilePlaying)
        ));

        recorder.stop_playback();
        recorder.start_recording(20).unwrap();
        assert!(matches!(
            recorder.play(id, 30),
            Err(HeartbeatError::PlaybackWhileRecording)
        ));
        assert!(matches!(
            recorder.start_recording(40),
            Err(HeartbeatError::AlreadyRecording)
        ));
    }

    #[test]
    fn test_stop_without_recording() {
        let mut recorder = Recorder::new();
        assert!(matches!(recorder.stop_recording(0), Err(HeartbeatError::NotRecording)));

        let id = sample_recording(&mut recorder);
        recorder.play(id, 0).unwrap();
        assert!(recorder.stop_recording(10).is_err());
        assert_eq!(recorder.mode(), SessionMode::Playing);
    }

    #[test]
    fn test_stop_playback_drops_pending_frames() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);
        recorder.play(id, 0).unwrap();
        recorder.poll_playback(0);
        recorder.stop_playback();
        assert_eq!(recorder.mode(), SessionMode::Idle);
        assert!(recorder.poll_playback(1000).is_empty());
    }

    #[test]
    fn test_empty_recording_is_saved() {
        let mut recorder = Recorder::new();
        recorder.start_recording(0).unwrap();
        recorder.begin_frame(16);
        let pending = recorder.stop_recording(100).unwrap();
        let saved = recorder.save_recording(pending, "  ");
        assert_eq!(saved.name, "Recording 1");
        assert!(saved.frames.is_empty());

        let id = saved.id;
        recorder.play(id, 0).unwrap();
        assert!(recorder.poll_playback(0).is_empty());
        assert_eq!(recorder.mode(), SessionMode::Idle);
    }

    #[test]
    fn test_events_outside_recording_are_ignored() {
        let mut recorder = Recorder::new();
        recorder.begin_frame(0);
        recorder.record(&event(0, 1.0));
        assert_eq!(recorder.mode(), SessionMode::Idle);
        assert!(recorder.recordings().is_empty());
    }

    #[test]
    fn test_delete() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);
        recorder.play(id, 0).unwrap();
        let removed = recorder.delete(id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(recorder.mode(), SessionMode::Idle);
        assert!(matches!(recorder.delete(id), Err(HeartbeatError::UnknownRecording(_))));
    }

    #[test]
    fn test_export_file_name() {
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);
        let recording = recorder.recording(id).unwrap().clone();
        assert_eq!(recording.export_file_name(), "morning-song.json");

        let spaced = Recording {
            name: "My  Big\tTune".to_string(),
            ..recording
        };
        assert_eq!(spaced.export_file_name(), "my-big-tune.json");
    }

    #[test]
    fn test_export_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new();
        let id = sample_recording(&mut recorder);

        let path = recorder.export_to_dir(id, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "morning-song.json");

        let json = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for field in ["id", "name", "duration_ms", "frames", "created_at"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }

        let original = recorder.recording(id).unwrap().clone();
        let imported = recorder.import_document(&json).unwrap().clone();
        assert_ne!(imported.id, original.id);
        assert_eq!(imported.frames, original.frames);
        assert_eq!(imported.duration_ms, original.duration_ms);
        assert_eq!(recorder.recordings().len(), 2);

        let mut fresh = Recorder::new();
        let kept = fresh.import_document(&json).unwrap();
        assert_eq!(kept.id, original.id);
    }

    #[test]
    fn test_import_rejects_garbage() {
        let mut recorder = Recorder::new();
        assert!(matches!(recorder.import_document("{"), Err(HeartbeatError::Json(_))));
    }
}
