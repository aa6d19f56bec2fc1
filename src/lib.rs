// gridseq - Library exports for the binary and the integration tests

pub mod midi;
pub mod project;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use midi::{Controller, Event, EventKind, KeyboardController, MidiError, MidiRouter};
pub use project::{ProjectError, ProjectState};
pub use sequencer::{Clock, DeviceType, Engine, Session, TrackDevice, PPQ};
