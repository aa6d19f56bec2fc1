// Controller abstraction - grid and keyboard hardware behind one interface
// The core consumes pad/note event streams and pushes LED batches back.

use crossbeam_channel::Receiver;

/// What kind of surface a controller is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// 8x8 pad grid with scene/top buttons (Launchpad family)
    Grid,
    /// Standard MIDI keyboard used for recording
    Keyboard,
}

/// Pad press from a grid controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadEvent {
    pub row: u8,
    pub col: u8,
    pub velocity: u8,
}

/// Note from a keyboard controller. Velocity 0 means note off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub note: u8,
    pub velocity: u8,
    pub channel: u8,
}

/// LED lighting behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Static,
    Flash,
    Pulse,
}

/// One LED update in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedUpdate {
    pub row: u8,
    pub col: u8,
    pub rgb: [u8; 3],
    pub mode: LedMode,
}

impl LedUpdate {
    pub fn off(row: u8, col: u8) -> Self {
        Self {
            row,
            col,
            rgb: [0, 0, 0],
            mode: LedMode::Static,
        }
    }
}

/// A connected hardware controller.
///
/// Event streams are bounded channels fed from the driver's callback thread;
/// when a consumer falls behind, events are dropped rather than blocking the
/// driver.
pub trait Controller: Send + Sync {
    /// Stable identifier (usually the port name)
    fn id(&self) -> &str;

    fn kind(&self) -> ControllerKind;

    /// Pad presses. Keyboards return a channel that never fires.
    fn pad_events(&self) -> Receiver<PadEvent>;

    /// Played notes. Grid controllers return a channel that never fires.
    fn note_events(&self) -> Receiver<NoteEvent>;

    /// Push a batch of LED changes. No-op for controllers without LEDs.
    fn set_led_batch(&self, updates: &[LedUpdate]);

    /// Release the underlying ports
    fn close(&mut self);
}
