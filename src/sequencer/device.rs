// Device contract - the queue/UI interface every sequencer device exposes,
// dispatched over a tagged union of the concrete device kinds

use crate::midi::controller::LedUpdate;
use crate::midi::event::Event;
use crate::sequencer::drum::DrumDevice;
use crate::sequencer::metropolix::MetropolixDevice;
use crate::sequencer::piano::PianoRollDevice;
use crate::sequencer::transport::Tick;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Patterns per device
pub const NUM_PATTERNS: usize = 128;

/// Callback installed by the engine, fired by edits to wake the queue manager
pub type OnQueueChange = Arc<dyn Fn() + Send + Sync>;

/// Persisted discriminant for a track's device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceType {
    #[default]
    None,
    Drum,
    Piano,
    Metropolix,
}

/// A track's device. The concrete devices are shared behind Arcs so the
/// session, the engine threads and the UI can all hold them.
#[derive(Clone, Default)]
pub enum TrackDevice {
    #[default]
    Empty,
    Drum(Arc<DrumDevice>),
    Piano(Arc<PianoRollDevice>),
    Metropolix(Arc<MetropolixDevice>),
}

impl TrackDevice {
    pub fn device_type(&self) -> DeviceType {
        match self {
            TrackDevice::Empty => DeviceType::None,
            TrackDevice::Drum(_) => DeviceType::Drum,
            TrackDevice::Piano(_) => DeviceType::Piano,
            TrackDevice::Metropolix(_) => DeviceType::Metropolix,
        }
    }

    pub fn as_drum(&self) -> Option<&Arc<DrumDevice>> {
        match self {
            TrackDevice::Drum(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_piano(&self) -> Option<&Arc<PianoRollDevice>> {
        match self {
            TrackDevice::Piano(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_metropolix(&self) -> Option<&Arc<MetropolixDevice>> {
        match self {
            TrackDevice::Metropolix(d) => Some(d),
            _ => None,
        }
    }

    // --- Queue producer / consumer contract ---

    /// Ensure every event with tick < target that this device will emit from
    /// now is in its queue
    pub fn fill_until(&self, target_tick: Tick) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.fill_until(target_tick),
            TrackDevice::Piano(d) => d.fill_until(target_tick),
            TrackDevice::Metropolix(d) => d.fill_until(target_tick),
        }
    }

    pub fn peek_next_event(&self) -> Option<Event> {
        match self {
            TrackDevice::Empty => None,
            TrackDevice::Drum(d) => d.peek_next_event(),
            TrackDevice::Piano(d) => d.peek_next_event(),
            TrackDevice::Metropolix(d) => d.peek_next_event(),
        }
    }

    pub fn pop_next_event(&self) -> Option<Event> {
        match self {
            TrackDevice::Empty => None,
            TrackDevice::Drum(d) => d.pop_next_event(),
            TrackDevice::Piano(d) => d.pop_next_event(),
            TrackDevice::Metropolix(d) => d.pop_next_event(),
        }
    }

    pub fn clear_queue(&self) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.clear_queue(),
            TrackDevice::Piano(d) => d.clear_queue(),
            TrackDevice::Metropolix(d) => d.clear_queue(),
        }
    }

    // --- Pattern control ---

    pub fn queue_pattern(&self, pattern: usize, at_tick: Tick) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.queue_pattern(pattern, at_tick),
            TrackDevice::Piano(d) => d.queue_pattern(pattern, at_tick),
            TrackDevice::Metropolix(d) => d.queue_pattern(pattern, at_tick),
        }
    }

    pub fn current_pattern(&self) -> usize {
        match self {
            TrackDevice::Empty => 0,
            TrackDevice::Drum(d) => d.current_pattern(),
            TrackDevice::Piano(d) => d.current_pattern(),
            TrackDevice::Metropolix(d) => d.current_pattern(),
        }
    }

    pub fn next_pattern(&self) -> Option<usize> {
        match self {
            TrackDevice::Empty => None,
            TrackDevice::Drum(d) => d.next_pattern(),
            TrackDevice::Piano(d) => d.next_pattern(),
            TrackDevice::Metropolix(d) => d.next_pattern(),
        }
    }

    pub fn content_mask(&self) -> Vec<bool> {
        match self {
            TrackDevice::Empty => vec![false; NUM_PATTERNS],
            TrackDevice::Drum(d) => d.content_mask(),
            TrackDevice::Piano(d) => d.content_mask(),
            TrackDevice::Metropolix(d) => d.content_mask(),
        }
    }

    // --- Input / recording ---

    pub fn handle_midi(&self, event: Event) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.handle_midi(event),
            TrackDevice::Piano(d) => d.handle_midi(event),
            TrackDevice::Metropolix(d) => d.handle_midi(event),
        }
    }

    pub fn toggle_recording(&self) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.toggle_recording(),
            TrackDevice::Piano(d) => d.toggle_recording(),
            TrackDevice::Metropolix(d) => d.toggle_recording(),
        }
    }

    pub fn toggle_preview(&self) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.toggle_preview(),
            TrackDevice::Piano(d) => d.toggle_preview(),
            TrackDevice::Metropolix(d) => d.toggle_preview(),
        }
    }

    pub fn is_recording(&self) -> bool {
        match self {
            TrackDevice::Empty => false,
            TrackDevice::Drum(d) => d.is_recording(),
            TrackDevice::Piano(d) => d.is_recording(),
            TrackDevice::Metropolix(d) => d.is_recording(),
        }
    }

    pub fn is_previewing(&self) -> bool {
        match self {
            TrackDevice::Empty => false,
            TrackDevice::Drum(d) => d.is_previewing(),
            TrackDevice::Piano(d) => d.is_previewing(),
            TrackDevice::Metropolix(d) => d.is_previewing(),
        }
    }

    // --- Rendering ---

    /// Pure snapshot for the LED thread
    pub fn render_leds(&self) -> Vec<LedUpdate> {
        match self {
            TrackDevice::Empty => Vec::new(),
            TrackDevice::Drum(d) => d.render_leds(),
            TrackDevice::Piano(d) => d.render_leds(),
            TrackDevice::Metropolix(d) => d.render_leds(),
        }
    }

    pub fn set_on_queue_change(&self, callback: OnQueueChange) {
        match self {
            TrackDevice::Empty => {}
            TrackDevice::Drum(d) => d.set_on_queue_change(callback),
            TrackDevice::Piano(d) => d.set_on_queue_change(callback),
            TrackDevice::Metropolix(d) => d.set_on_queue_change(callback),
        }
    }
}
