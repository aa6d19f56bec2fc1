// MIDI layer: event model, controller abstraction, keyboard input, output router

pub mod controller;
pub mod event;
pub mod keyboard;
pub mod router;

pub use controller::{Controller, ControllerKind, LedMode, LedUpdate, NoteEvent, PadEvent};
pub use event::{Event, EventKind};
pub use keyboard::KeyboardController;
pub use router::{scan_input_ports, scan_output_ports, MidiError, MidiRouter};
