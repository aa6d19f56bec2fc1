// MIDI keyboard input - feeds note events from a midir input port into a
// bounded channel consumed by the engine's input loop

use crate::midi::controller::{Controller, ControllerKind, LedUpdate, NoteEvent, PadEvent};
use crate::midi::event::EventKind;
use crate::midi::router::MidiError;
use crossbeam_channel::{bounded, Receiver, Sender};
use midir::{MidiInput, MidiInputConnection};
use std::sync::Mutex;
use tracing::warn;

const NOTE_CHANNEL_CAPACITY: usize = 32;

/// A standard MIDI keyboard connected for note recording and live play
pub struct KeyboardController {
    id: String,
    // Mutex so the controller can be shared across threads; the connection
    // itself is only touched on close
    connection: Mutex<Option<MidiInputConnection<Sender<NoteEvent>>>>,
    note_rx: Receiver<NoteEvent>,
    pad_rx: Receiver<PadEvent>,
    // held so the pad channel stays connected (a disconnected receiver
    // would report ready in a select loop)
    _pad_tx: Sender<PadEvent>,
}

impl KeyboardController {
    /// Connect to the named input port. The midir callback runs on its own
    /// thread; events are pushed with try_send and dropped when the channel
    /// is full so the driver thread never blocks.
    pub fn connect(port_name: &str) -> Result<Self, MidiError> {
        let midi_in =
            MidiInput::new("gridseq keyboard").map_err(|e| MidiError::Init(e.to_string()))?;

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|name| name == port_name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port_name.to_string()))?;

        let (note_tx, note_rx) = bounded(NOTE_CHANNEL_CAPACITY);
        // Pads never fire on a keyboard; keep an open stream so the
        // controller interface stays uniform.
        let (pad_tx, pad_rx) = bounded::<PadEvent>(1);

        let connection = midi_in
            .connect(
                &port,
                "gridseq-keyboard-in",
                move |_timestamp, bytes, tx| {
                    if let Some(event) = parse_note(bytes) {
                        if tx.try_send(event).is_err() {
                            warn!("keyboard input channel full, note dropped");
                        }
                    }
                },
                note_tx,
            )
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        Ok(Self {
            id: port_name.to_string(),
            connection: Mutex::new(Some(connection)),
            note_rx,
            pad_rx,
            _pad_tx: pad_tx,
        })
    }
}

/// Translate a raw message into a NoteEvent (note off = velocity 0)
fn parse_note(bytes: &[u8]) -> Option<NoteEvent> {
    match EventKind::from_bytes(bytes)? {
        (EventKind::NoteOn { note, velocity }, channel) => Some(NoteEvent {
            note,
            velocity,
            channel,
        }),
        (EventKind::NoteOff { note }, channel) => Some(NoteEvent {
            note,
            velocity: 0,
            channel,
        }),
        _ => None,
    }
}

impl Controller for KeyboardController {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Keyboard
    }

    fn pad_events(&self) -> Receiver<PadEvent> {
        self.pad_rx.clone()
    }

    fn note_events(&self) -> Receiver<NoteEvent> {
        self.note_rx.clone()
    }

    fn set_led_batch(&self, _updates: &[LedUpdate]) {
        // keyboards have no LEDs
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.lock().unwrap().take() {
            conn.close();
        }
    }
}
