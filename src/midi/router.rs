// MIDI output router - maps events to (port, channel) and owns the port
// sender handles. Ports are opened lazily on first use and kept open.

use crate::midi::event::EventKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a port scan may block before we give up.
/// Platform MIDI layers can hang indefinitely on enumeration.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("MIDI driver init failed: {0}")]
    Init(String),

    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    #[error("MIDI connect failed: {0}")]
    Connect(String),

    #[error("MIDI port scan timed out")]
    ScanTimeout,
}

type SharedSender = Arc<Mutex<midir::MidiOutputConnection>>;

/// Routes scheduled events to MIDI output ports.
///
/// The port map is guarded by an RwLock; senders are created under the write
/// lock with a double-checked lookup so concurrent callers open a port once.
pub struct MidiRouter {
    default_port: RwLock<String>,
    senders: RwLock<HashMap<String, SharedSender>>,
    /// Ports that failed to open - logged once, then silently dropped
    failed_ports: Mutex<Vec<String>>,
}

impl MidiRouter {
    pub fn new() -> Self {
        Self {
            default_port: RwLock::new(String::new()),
            senders: RwLock::new(HashMap::new()),
            failed_ports: Mutex::new(Vec::new()),
        }
    }

    /// Port used when a track has no explicit port name
    pub fn set_default_port(&self, name: &str) {
        *self.default_port.write().unwrap() = name.to_string();
    }

    pub fn default_port(&self) -> String {
        self.default_port.read().unwrap().clone()
    }

    /// Resolve the effective port for a track (empty = default)
    fn resolve_port(&self, port_name: &str) -> String {
        if port_name.is_empty() {
            self.default_port()
        } else {
            port_name.to_string()
        }
    }

    /// Send one event on the given user channel (1..=16) and port.
    /// Failures are logged and swallowed: the stream recovers on the next
    /// event, and an unopenable port drops events until the user changes it.
    pub fn send(&self, port_name: &str, channel: u8, kind: EventKind) {
        let port = self.resolve_port(port_name);
        if port.is_empty() {
            return;
        }

        let Some(sender) = self.sender_for(&port) else {
            return;
        };

        let wire_channel = channel.saturating_sub(1) & 0x0F;
        let mut conn = sender.lock().unwrap();
        let result = match kind {
            EventKind::NoteOn { note, velocity } => {
                conn.send(&[0x90 | wire_channel, note & 0x7F, velocity & 0x7F])
            }
            EventKind::NoteOff { note } => conn.send(&[0x80 | wire_channel, note & 0x7F, 0]),
            EventKind::Trigger { note, velocity } => conn
                .send(&[0x90 | wire_channel, note & 0x7F, velocity & 0x7F])
                .and_then(|_| conn.send(&[0x80 | wire_channel, note & 0x7F, 0])),
            EventKind::PitchBend { bend } => {
                // 14-bit value centered on 8192
                let value = (bend as i32 + 8192).clamp(0, 16383) as u16;
                conn.send(&[
                    0xE0 | wire_channel,
                    (value & 0x7F) as u8,
                    (value >> 7) as u8,
                ])
            }
            EventKind::ControlChange { controller, value } => {
                conn.send(&[0xB0 | wire_channel, controller & 0x7F, value & 0x7F])
            }
        };

        if let Err(e) = result {
            // Transient: drop this event, keep the connection
            warn!(port = %port, "MIDI send failed: {e}");
        }
    }

    /// Sender for a port, opening it on first use (double-checked)
    fn sender_for(&self, port_name: &str) -> Option<SharedSender> {
        if let Some(sender) = self.senders.read().unwrap().get(port_name) {
            return Some(sender.clone());
        }

        let mut senders = self.senders.write().unwrap();
        // Re-check: another thread may have opened it while we waited
        if let Some(sender) = senders.get(port_name) {
            return Some(sender.clone());
        }

        match open_output(port_name) {
            Ok(conn) => {
                info!(port = %port_name, "opened MIDI output port");
                let sender = Arc::new(Mutex::new(conn));
                senders.insert(port_name.to_string(), sender.clone());
                Some(sender)
            }
            Err(e) => {
                let mut failed = self.failed_ports.lock().unwrap();
                if !failed.iter().any(|p| p == port_name) {
                    warn!(port = %port_name, "cannot open MIDI output, dropping events: {e}");
                    failed.push(port_name.to_string());
                } else {
                    debug!(port = %port_name, "event dropped, port unavailable");
                }
                None
            }
        }
    }
}

impl Default for MidiRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn open_output(port_name: &str) -> Result<midir::MidiOutputConnection, MidiError> {
    let midi_out =
        midir::MidiOutput::new("gridseq").map_err(|e| MidiError::Init(e.to_string()))?;

    let port = midi_out
        .ports()
        .into_iter()
        .find(|p| {
            midi_out
                .port_name(p)
                .map(|name| name == port_name)
                .unwrap_or(false)
        })
        .ok_or_else(|| MidiError::PortNotFound(port_name.to_string()))?;

    midi_out
        .connect(&port, "gridseq-out")
        .map_err(|e| MidiError::Connect(e.to_string()))
}

/// Enumerate MIDI output port names on a helper thread, bounded by
/// SCAN_TIMEOUT. An empty result means no devices; the caller may retry.
/// A driver init failure is reported as `MidiError::Init`.
pub fn scan_output_ports() -> Result<Vec<String>, MidiError> {
    let (tx, rx) = crossbeam_channel::bounded(1);

    std::thread::spawn(move || {
        let result = midir::MidiOutput::new("gridseq scan")
            .map(|out| {
                out.ports()
                    .iter()
                    .filter_map(|p| out.port_name(p).ok())
                    .collect()
            })
            .map_err(|e| MidiError::Init(e.to_string()));
        let _ = tx.send(result);
    });

    rx.recv_timeout(SCAN_TIMEOUT)
        .map_err(|_| MidiError::ScanTimeout)?
}

/// Enumerate MIDI input port names, bounded by SCAN_TIMEOUT
pub fn scan_input_ports() -> Result<Vec<String>, MidiError> {
    let (tx, rx) = crossbeam_channel::bounded(1);

    std::thread::spawn(move || {
        let result = midir::MidiInput::new("gridseq scan")
            .map(|input| {
                input
                    .ports()
                    .iter()
                    .filter_map(|p| input.port_name(p).ok())
                    .collect()
            })
            .map_err(|e| MidiError::Init(e.to_string()));
        let _ = tx.send(result);
    });

    rx.recv_timeout(SCAN_TIMEOUT)
        .map_err(|_| MidiError::ScanTimeout)?
}
