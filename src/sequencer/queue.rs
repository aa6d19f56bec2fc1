// Device event queue - ordered buffer of future events plus fill watermarks
//
// Generators produce event batches OUTSIDE the lock; the write lock is held
// only to append, swap or truncate the vector. Never hold it across
// generation or I/O.

use crate::midi::event::Event;
use crate::sequencer::transport::Tick;
use std::sync::RwLock;

/// Fill watermarks kept alongside the event vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMarks {
    /// Every event with tick < filled_until is present in the queue
    pub filled_until: Tick,
    /// Tick at which the currently playing pattern started
    pub pattern_start: Tick,
    /// Tick at which a queued pattern switch takes effect
    pub next_pattern: Option<Tick>,
}

impl QueueMarks {
    fn reset() -> Self {
        Self {
            filled_until: 0,
            pattern_start: 0,
            next_pattern: None,
        }
    }
}

#[derive(Debug)]
struct QueueInner {
    events: Vec<Event>,
    marks: QueueMarks,
    /// Tick of the most recently popped event; rebuilds must not put
    /// events at or before this back in front of the dispatcher
    last_popped: Option<Tick>,
}

/// Per-device queue of scheduled events, sorted non-decreasing by tick
#[derive(Debug)]
pub struct EventQueue {
    inner: RwLock<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(QueueInner {
                events: Vec::new(),
                marks: QueueMarks::reset(),
                last_popped: None,
            }),
        }
    }

    /// Earliest event without removing it
    pub fn peek(&self) -> Option<Event> {
        let inner = self.inner.read().unwrap();
        inner.events.first().copied()
    }

    /// Remove and return the earliest event
    pub fn pop(&self) -> Option<Event> {
        let mut inner = self.inner.write().unwrap();
        if inner.events.is_empty() {
            None
        } else {
            let event = inner.events.remove(0);
            inner.last_popped = Some(event.tick);
            Some(event)
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().events.is_empty()
    }

    /// Current watermarks (brief read lock)
    pub fn marks(&self) -> QueueMarks {
        self.inner.read().unwrap().marks
    }

    /// Append a pre-generated batch and publish the new watermarks
    pub fn append(&self, batch: Vec<Event>, marks: QueueMarks) {
        let mut inner = self.inner.write().unwrap();
        inner.events.extend(batch);
        inner.marks = marks;
    }

    /// Replace the queue contents with a freshly generated vector (drum
    /// schedule resync, hot edits).
    ///
    /// Already-dispatched ticks are not resurrected: regenerated events at
    /// or before the last popped tick are dropped, while still-pending
    /// events at those ticks survive from the old queue. This keeps the
    /// dispatcher's popped-tick sequence non-decreasing across rebuilds.
    pub fn replace(&self, events: Vec<Event>, marks: QueueMarks) {
        let mut inner = self.inner.write().unwrap();
        match inner.last_popped {
            None => inner.events = events,
            Some(cut) => {
                let mut kept: Vec<Event> = inner
                    .events
                    .iter()
                    .copied()
                    .take_while(|e| e.tick <= cut)
                    .collect();
                kept.extend(events.into_iter().filter(|e| e.tick > cut));
                inner.events = kept;
            }
        }
        inner.marks = marks;
    }

    /// Drop every event with tick >= boundary and rewind `filled_until` to
    /// the boundary, recording it as the pending switch point.
    pub fn truncate_for_switch(&self, boundary: Tick) {
        let mut inner = self.inner.write().unwrap();
        inner.events.retain(|e| e.tick < boundary);
        inner.marks.filled_until = boundary;
        inner.marks.next_pattern = Some(boundary);
    }

    /// Record a pending switch without touching queued events
    pub fn set_next_pattern(&self, boundary: Tick) {
        let mut inner = self.inner.write().unwrap();
        inner.marks.next_pattern = Some(boundary);
    }

    /// Drop everything and reset the watermarks (Play, Stop)
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.events.clear();
        inner.marks = QueueMarks::reset();
        inner.last_popped = None;
    }

    /// Copy of the queued events, oldest first (hot-edit regeneration path)
    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.read().unwrap().events.clone()
    }

    /// Debug check: ticks must be non-decreasing
    #[cfg(test)]
    pub fn is_sorted(&self) -> bool {
        let inner = self.inner.read().unwrap();
        inner.events.windows(2).all(|w| w[0].tick <= w[1].tick)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks(filled_until: Tick) -> QueueMarks {
        QueueMarks {
            filled_until,
            pattern_start: 0,
            next_pattern: None,
        }
    }

    #[test]
    fn test_peek_pop_order() {
        let queue = EventQueue::new();
        queue.append(
            vec![
                Event::note_on(0, 60, 100),
                Event::note_off(480, 60),
                Event::note_on(960, 64, 90),
            ],
            marks(1920),
        );

        assert_eq!(queue.peek().unwrap().tick, 0);
        assert_eq!(queue.pop().unwrap().tick, 0);
        assert_eq!(queue.pop().unwrap().tick, 480);
        assert_eq!(queue.pop().unwrap().tick, 960);
        assert!(queue.pop().is_none());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_append_keeps_order() {
        let queue = EventQueue::new();
        queue.append(vec![Event::note_on(0, 60, 100)], marks(960));
        queue.append(vec![Event::note_on(960, 62, 100)], marks(1920));

        assert!(queue.is_sorted());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.marks().filled_until, 1920);
    }

    #[test]
    fn test_truncate_for_switch() {
        let queue = EventQueue::new();
        queue.append(
            vec![
                Event::note_on(0, 60, 100),
                Event::note_on(3840, 62, 100),
                Event::note_on(4800, 64, 100),
            ],
            marks(5000),
        );

        queue.truncate_for_switch(3840);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().tick, 0);
        let m = queue.marks();
        assert_eq!(m.filled_until, 3840);
        assert_eq!(m.next_pattern, Some(3840));
    }

    #[test]
    fn test_replace_does_not_resurrect_dispatched_events() {
        let queue = EventQueue::new();
        queue.append(
            vec![
                Event::note_on(0, 60, 100),
                Event::note_off(480, 60),
                Event::note_on(960, 64, 100),
            ],
            marks(1920),
        );

        // Dispatch the first two events
        assert_eq!(queue.pop().unwrap().tick, 0);
        assert_eq!(queue.pop().unwrap().tick, 480);

        // A rebuild regenerates the same span from scratch
        queue.replace(
            vec![
                Event::note_on(0, 60, 100),
                Event::note_off(480, 60),
                Event::note_on(960, 72, 100),
            ],
            marks(1920),
        );

        // Played ticks stay gone; only the future event is taken
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().tick, 960);
        assert_eq!(
            queue.peek().unwrap().kind,
            crate::midi::event::EventKind::NoteOn {
                note: 72,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_replace_keeps_pending_stragglers() {
        let queue = EventQueue::new();
        // Two events share tick 240 (a chord); one has been popped
        queue.append(
            vec![
                Event::note_on(240, 60, 100),
                Event::note_on(240, 64, 100),
                Event::note_on(480, 67, 100),
            ],
            marks(960),
        );
        assert_eq!(queue.pop().unwrap().tick, 240);

        queue.replace(
            vec![
                Event::note_on(240, 60, 100),
                Event::note_on(240, 64, 100),
                Event::note_on(480, 67, 100),
            ],
            marks(960),
        );

        // The unplayed half of the chord survives exactly once
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().tick, 240);
        assert_eq!(queue.pop().unwrap().tick, 480);
    }

    #[test]
    fn test_clear_resets_marks() {
        let queue = EventQueue::new();
        queue.append(vec![Event::note_on(100, 60, 100)], marks(960));
        queue.set_next_pattern(1920);

        queue.clear();

        assert!(queue.is_empty());
        let m = queue.marks();
        assert_eq!(m.filled_until, 0);
        assert_eq!(m.pattern_start, 0);
        assert_eq!(m.next_pattern, None);
    }
}
