// MIDI event model - tick-stamped events flowing through the device queues

use crate::sequencer::transport::Tick;

/// Kind of MIDI event the sequencer can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    /// Drum hit: note-on followed immediately by note-off.
    /// `note` carries the drum slot index (0..16) until the dispatcher
    /// translates it through the track's kit.
    Trigger { note: u8, velocity: u8 },
    /// `bend` is a signed offset from center, -8192..=8191
    PitchBend { bend: i16 },
    ControlChange { controller: u8, value: u8 },
}

/// A scheduled MIDI event with an absolute tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub tick: Tick,
    pub kind: EventKind,
}

impl Event {
    pub fn new(tick: Tick, kind: EventKind) -> Self {
        Self { tick, kind }
    }

    pub fn note_on(tick: Tick, note: u8, velocity: u8) -> Self {
        Self::new(tick, EventKind::NoteOn { note, velocity })
    }

    pub fn note_off(tick: Tick, note: u8) -> Self {
        Self::new(tick, EventKind::NoteOff { note })
    }

    pub fn trigger(tick: Tick, note: u8, velocity: u8) -> Self {
        Self::new(tick, EventKind::Trigger { note, velocity })
    }

    pub fn pitch_bend(tick: Tick, bend: i16) -> Self {
        Self::new(tick, EventKind::PitchBend { bend })
    }
}

impl EventKind {
    /// Parse a raw MIDI message into an event kind plus its wire channel.
    ///
    /// Running status is not handled; controllers send complete messages.
    pub fn from_bytes(bytes: &[u8]) -> Option<(EventKind, u8)> {
        if bytes.is_empty() {
            return None;
        }

        let status = bytes[0];
        let channel = status & 0x0F;

        match status & 0xF0 {
            0x90 => {
                if bytes.len() >= 3 {
                    let note = bytes[1];
                    let velocity = bytes[2];
                    // Velocity 0 = note off by convention
                    if velocity == 0 {
                        Some((EventKind::NoteOff { note }, channel))
                    } else {
                        Some((EventKind::NoteOn { note, velocity }, channel))
                    }
                } else {
                    None
                }
            }
            0x80 => {
                if bytes.len() >= 3 {
                    Some((EventKind::NoteOff { note: bytes[1] }, channel))
                } else {
                    None
                }
            }
            0xB0 => {
                if bytes.len() >= 3 {
                    Some((
                        EventKind::ControlChange {
                            controller: bytes[1],
                            value: bytes[2],
                        },
                        channel,
                    ))
                } else {
                    None
                }
            }
            0xE0 => {
                if bytes.len() >= 3 {
                    let lsb = bytes[1] as i16;
                    let msb = bytes[2] as i16;
                    // 14-bit value centered on 8192
                    let bend = ((msb << 7) | lsb) - 8192;
                    Some((EventKind::PitchBend { bend }, channel))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let bytes = [0x90, 60, 100]; // Note On, note 60 (C4), velocity 100
        let (kind, channel) = EventKind::from_bytes(&bytes).unwrap();

        assert_eq!(channel, 0);
        match kind {
            EventKind::NoteOn { note, velocity } => {
                assert_eq!(note, 60);
                assert_eq!(velocity, 100);
            }
            _ => panic!("Expected NoteOn event"),
        }
    }

    #[test]
    fn test_note_off_explicit() {
        let bytes = [0x80, 60, 0];
        let (kind, _) = EventKind::from_bytes(&bytes).unwrap();
        assert_eq!(kind, EventKind::NoteOff { note: 60 });
    }

    #[test]
    fn test_note_off_velocity_zero() {
        // Note On with velocity 0 = Note Off
        let bytes = [0x90, 64, 0];
        let (kind, _) = EventKind::from_bytes(&bytes).unwrap();
        assert_eq!(kind, EventKind::NoteOff { note: 64 });
    }

    #[test]
    fn test_control_change() {
        let bytes = [0xB0, 7, 127]; // CC, controller 7 (volume), value 127
        let (kind, _) = EventKind::from_bytes(&bytes).unwrap();
        assert_eq!(
            kind,
            EventKind::ControlChange {
                controller: 7,
                value: 127
            }
        );
    }

    #[test]
    fn test_pitch_bend_center() {
        let bytes = [0xE0, 0x00, 0x40]; // 0x40 << 7 = 8192, center
        let (kind, _) = EventKind::from_bytes(&bytes).unwrap();
        assert_eq!(kind, EventKind::PitchBend { bend: 0 });
    }

    #[test]
    fn test_channel_extracted() {
        let bytes = [0x9F, 60, 100]; // channel 15
        let (_, channel) = EventKind::from_bytes(&bytes).unwrap();
        assert_eq!(channel, 15);
    }

    #[test]
    fn test_invalid_empty_message() {
        assert!(EventKind::from_bytes(&[]).is_none());
    }

    #[test]
    fn test_invalid_incomplete_message() {
        let bytes = [0x90, 60]; // Note On without velocity
        assert!(EventKind::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_invalid_unknown_status() {
        let bytes = [0xF0, 0x00, 0x00]; // SysEx, unsupported
        assert!(EventKind::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_event_constructors() {
        let e = Event::trigger(240, 3, 100);
        assert_eq!(e.tick, 240);
        assert_eq!(
            e.kind,
            EventKind::Trigger {
                note: 3,
                velocity: 100
            }
        );
    }
}
