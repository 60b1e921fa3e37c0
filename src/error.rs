//! Error types for the sensory canvas
use thiserror::Error;

/// Canvas errors
#[derive(Error, Debug)]
pub enum HeartbeatError {
    /// No usable audio output device
    #[error("Audio device unavailable: {0}")]
    AudioUnavailable(String),

    /// Audio stream could not be built or started
    #[error("Audio stream error: {0}")]
    AudioStream(String),

    /// An effect stage rejected its parameters
    #[error("Effect construction failed: {0}")]
    EffectConstruction(String),

    /// MIDI initialization error
    #[error("MIDI init error: {0}")]
    MidiInit(#[from] midir::InitError),

    /// MIDI connection error
    #[error("MIDI connection error: {0}")]
    MidiConnection(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Completion service answered with something unusable
    #[error("Completion service error: {0}")]
    Completion(String),

    /// Completion service did not answer in time
    #[error("Completion request timed out after {0}s")]
    Timeout(u64),

    /// Recording requested while a playback is running
    #[error("Cannot start recording while a playback is in progress")]
    RecordingWhilePlaying,

    /// Playback requested while a recording is running
    #[error("Cannot start playback while recording")]
    PlaybackWhileRecording,

    /// Recording already running
    #[error("A recording is already in progress")]
    AlreadyRecording,

    /// Stop requested with no recording running
    #[error("No recording in progress")]
    NotRecording,

    /// Recording id not present in the session list
    #[error("Recording not found: {0}")]
    UnknownRecording(String),

    /// Environment id not present in the preset table
    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Color string not in #RRGGBB form
    #[error("Invalid color: {0}")]
    InvalidColor(String),
}

/// Result type for canvas operations
pub type Result<T> = std::result::Result<T, HeartbeatError>;
