mod analysis;
mod audio;
mod collab;
mod config;
mod environment;
mod error;
mod interaction;
mod midi;
mod notes;
mod recorder;
mod reflection;
mod session;
mod state;
mod ui;
mod visual;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::graph::AudioSettings;
use crate::audio::AudioEngine;
use crate::config::Config;
use crate::environment::SoundEnvironment;
use crate::reflection::{HttpCompletionClient, ReflectionClient};
use crate::session::CanvasSession;

/// Interactive sensory canvas: play notes, watch them bloom.
#[derive(Parser, Debug)]
#[command(name = "piano-heartbeat", version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "piano_heartbeat.toml")]
    config: PathBuf,

    /// Sound environment to start in
    #[arg(short, long)]
    environment: Option<String>,

    /// Play notes from the keyboard (A W S E D F T G Y H U J)
    #[arg(long)]
    accessibility: bool,

    /// Don't look for MIDI devices
    #[arg(long)]
    no_midi: bool,

    /// Start in canvas mode, where shapes persist
    #[arg(long)]
    canvas_mode: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Load exported recordings into the session list
    #[arg(long, value_name = "FILE")]
    import: Vec<PathBuf>,

    /// Print the available environments and exit
    #[arg(long)]
    list_environments: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.list_environments {
        for env in SoundEnvironment::presets() {
            println!("{:<18} {}  {}", env.id, env.name, env.description);
        }
        return Ok(());
    }

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {:?}", args.config))?;
    if let Some(environment) = args.environment {
        config.session.environment = environment;
    }
    config.input.accessibility |= args.accessibility;
    config.input.midi &= !args.no_midi;
    config.visual.canvas_mode |= args.canvas_mode;

    let start_env = SoundEnvironment::by_id(&config.session.environment)?;
    let settings = AudioSettings {
        volume: config.audio.volume,
        reverb_enabled: config.audio.reverb_enabled,
        delay_enabled: config.audio.delay_enabled,
    };
    let audio = AudioEngine::new(start_env, settings, config.audio.max_voices);

    let mut session = CanvasSession::new(&config, audio, 800.0, 600.0)?;
    match HttpCompletionClient::from_config(&config.reflection) {
        Ok(http) => session.set_reflection_client(Some(ReflectionClient::new(
            Arc::new(http),
            tokio::runtime::Handle::current(),
            &config.reflection,
        ))),
        Err(e) => warn!("Reflections will use the fallback text: {}", e),
    }

    for path in &args.import {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {:?}", path))?;
        session
            .import_recording(&json)
            .with_context(|| format!("failed to import recording {:?}", path))?;
    }

    let midi = if config.input.midi {
        let (tx, rx) = std::sync::mpsc::channel();
        tokio::spawn(midi::run_midi_listener(tx));
        Some(rx)
    } else {
        info!("MIDI disabled");
        None
    };

    info!("Launching the canvas...");
    ui::run_ui(session, midi, config.visual.show_spectrum)
        .map_err(|e| anyhow::anyhow!("UI error: {}", e))?;

    info!("Goodbye");
    Ok(())
}
