use midir::{Ignore, MidiInput, MidiInputConnection};
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{HeartbeatError, Result};

const CLIENT_NAME: &str = "piano-heartbeat";
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

/// What the listener reports to the canvas thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiUpdate {
    /// At least one input port is (or is no longer) connected.
    Connected(bool),
    Message(Vec<u8>),
}

/// Names of the input ports currently visible.
pub fn port_names() -> Result<Vec<String>> {
    let midi_input = MidiInput::new(CLIENT_NAME)?;
    Ok(midi_input
        .ports()
        .iter()
        .map(|p| midi_input.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
        .collect())
}

/// Connects to every visible input port, forwarding raw messages to `tx`.
fn connect_all(tx: &Sender<MidiUpdate>, count: usize) -> Vec<MidiInputConnection<()>> {
    let mut connections = Vec::with_capacity(count);
    for index in 0..count {
        // Each connection consumes its own client.
        let mut midi_input = match MidiInput::new(CLIENT_NAME) {
            Ok(input) => input,
            Err(e) => {
                error!("Failed to create MIDI input: {}", e);
                continue;
            }
        };
        midi_input.ignore(Ignore::None);

        let ports = midi_input.ports();
        let Some(port) = ports.get(index) else {
            continue;
        };
        let name = midi_input
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let sender = tx.clone();
        match midi_input.connect(
            port,
            "piano-heartbeat-in",
            move |_, message, _| {
                debug!("MIDI message: {:?}", message);
                // Receiver gone means the canvas is closing.
                let _ = sender.send(MidiUpdate::Message(message.to_vec()));
            },
            (),
        ) {
            Ok(conn) => {
                info!("Using MIDI input: {}", name);
                connections.push(conn);
            }
            Err(e) => warn!("{}", HeartbeatError::MidiConnection(format!("{}: {}", name, e))),
        }
    }
    connections
}

/// Watches for MIDI inputs until the receiving side hangs up.
///
/// Every port is connected; the set is rebuilt whenever the visible ports
/// change. Without MIDI support the listener reports `Connected(false)` and
/// keeps probing.
pub async fn run_midi_listener(tx: Sender<MidiUpdate>) {
    let outcome = tokio::task::spawn_blocking(move || {
        let mut known: Option<Vec<String>> = None;
        let mut connections: Vec<MidiInputConnection<()>> = Vec::new();

        loop {
            let names = match port_names() {
                Ok(names) => names,
                Err(e) => {
                    if known.is_none() {
                        warn!("MIDI unavailable: {}", e);
                    }
                    Vec::new()
                }
            };

            if known.as_ref() != Some(&names) {
                if names.is_empty() {
                    warn!("No MIDI input devices found");
                } else {
                    info!("Available MIDI input ports:");
                    for (i, name) in names.iter().enumerate() {
                        info!("Port {}: {}", i, name);
                    }
                }
                for conn in connections.drain(..) {
                    conn.close();
                }
                connections = connect_all(&tx, names.len());
                known = Some(names);
            }

            // Also detects when the canvas has hung up.
            if tx.send(MidiUpdate::Connected(!connections.is_empty())).is_err() {
                break;
            }

            std::thread::sleep(RESCAN_INTERVAL);
        }
        info!("MIDI listener stopped");
    })
    .await;

    if let Err(e) = outcome {
        error!("MIDI listener task failed: {}", e);
    }
}
