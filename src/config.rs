//! Application configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::environment::Rgb;
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub visual: VisualConfig,
    pub input: InputConfig,
    pub reflection: ReflectionConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Master volume, 0-100.
    pub volume: u8,
    pub reverb_enabled: bool,
    pub delay_enabled: bool,
    /// Oldest voice is stolen once this many notes sound at once.
    pub max_voices: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 70,
            reverb_enabled: true,
            delay_enabled: true,
            max_voices: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// 0.0-1.0; scales element size, lifetime and ambient particle rate.
    pub complexity: f32,
    pub max_elements: usize,
    pub canvas_mode: bool,
    pub primary_color: Option<Rgb>,
    pub secondary_color: Option<Rgb>,
    pub show_spectrum: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            complexity: 0.5,
            max_elements: 400,
            canvas_mode: false,
            primary_color: None,
            secondary_color: None,
            show_spectrum: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub midi: bool,
    pub accessibility: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            midi: true,
            accessibility: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub fallback: String,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama3-70b-8192".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 100,
            timeout_secs: 15,
            fallback: "Soft colors dance with the sounds.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub environment: String,
    pub export_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            environment: "starlight-meadow".to_string(),
            export_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        info!("Loaded config from {:?}", path);
        Ok(config.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.audio.volume = self.audio.volume.min(100);
        self.audio.max_voices = self.audio.max_voices.max(1);
        self.visual.complexity = self.visual.complexity.clamp(0.0, 1.0);
        self.visual.max_elements = self.visual.max_elements.max(1);
        self
    }
}
