// Piano-roll engine - free-form notes with beat-based start/duration
//
// Unlike the drum engine there is no schedule: the queue is filled one
// pattern length at a time, and a single queued switch (next pattern + its
// boundary tick) is honored by the fill loop.

use crate::midi::controller::{LedMode, LedUpdate};
use crate::midi::event::{Event, EventKind};
use crate::sequencer::device::{OnQueueChange, NUM_PATTERNS};
use crate::sequencer::queue::{EventQueue, QueueMarks};
use crate::sequencer::transport::{Clock, Tick, PPQ};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shortest representable note: one sixteenth
pub const MIN_DURATION: f64 = 0.25;

pub const MIN_LENGTH_BEATS: f64 = 1.0;
pub const MAX_LENGTH_BEATS: f64 = 64.0;

/// Beats per LED column at each zoom level
const VIEW_SCALES: [f64; 8] = [0.03125, 0.0625, 0.125, 0.25, 0.5, 1.0, 2.0, 4.0];

/// A single note, timed in beats from the pattern start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PianoNote {
    pub start: f64,
    pub duration: f64,
    pub pitch: u8,
    pub velocity: u8,
}

/// A piano pattern: sorted notes plus a loop length in beats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PianoPattern {
    pub notes: Vec<PianoNote>,
    pub length_beats: f64,
}

impl Default for PianoPattern {
    fn default() -> Self {
        Self {
            notes: Vec::new(),
            length_beats: 4.0,
        }
    }
}

/// Persistent piano device state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PianoState {
    pub patterns: Vec<PianoPattern>,
    pub playing: usize,
    pub next: usize,
    pub editing: usize,
    pub selected_note: Option<usize>,
    pub center_beat: f64,
    pub center_pitch: f64,
    pub view_scale: usize,
    #[serde(skip)]
    pub recording: bool,
    #[serde(skip)]
    pub preview: bool,
}

impl PianoState {
    pub fn new() -> Self {
        Self {
            patterns: vec![PianoPattern::default(); NUM_PATTERNS],
            playing: 0,
            next: 0,
            editing: 0,
            selected_note: None,
            center_beat: 2.0,
            center_pitch: 60.0,
            view_scale: 2,
            recording: false,
            preview: false,
        }
    }

    /// Clamp loaded values into their documented ranges
    pub fn clamp(&mut self) {
        self.patterns.resize(NUM_PATTERNS, PianoPattern::default());
        for pattern in &mut self.patterns {
            pattern.length_beats = pattern.length_beats.clamp(MIN_LENGTH_BEATS, MAX_LENGTH_BEATS);
            for note in &mut pattern.notes {
                note.start = note.start.max(0.0);
                note.duration = note.duration.max(MIN_DURATION);
                note.pitch = note.pitch.min(127);
                note.velocity = note.velocity.min(127);
            }
            pattern
                .notes
                .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
        }
        self.playing = self.playing.min(NUM_PATTERNS - 1);
        self.next = self.next.min(NUM_PATTERNS - 1);
        self.editing = self.editing.min(NUM_PATTERNS - 1);
        self.view_scale = self.view_scale.min(VIEW_SCALES.len() - 1);
    }
}

impl Default for PianoState {
    fn default() -> Self {
        Self::new()
    }
}

/// A note-on waiting for its note-off during recording
#[derive(Debug, Clone, Copy)]
struct PendingNote {
    start: f64,
    velocity: u8,
}

pub struct PianoRollDevice {
    state: Mutex<PianoState>,
    queue: EventQueue,
    clock: Arc<Clock>,
    pending: Mutex<HashMap<u8, PendingNote>>,
    on_queue_change: Mutex<Option<OnQueueChange>>,
}

impl PianoRollDevice {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self::from_state(PianoState::new(), clock)
    }

    pub fn from_state(state: PianoState, clock: Arc<Clock>) -> Self {
        Self {
            state: Mutex::new(state),
            queue: EventQueue::new(),
            clock,
            pending: Mutex::new(HashMap::new()),
            on_queue_change: Mutex::new(None),
        }
    }

    pub fn set_on_queue_change(&self, callback: OnQueueChange) {
        *self.on_queue_change.lock().unwrap() = Some(callback);
    }

    fn notify_queue_change(&self) {
        if let Some(cb) = self.on_queue_change.lock().unwrap().as_ref() {
            cb();
        }
    }

    pub fn snapshot(&self) -> PianoState {
        self.state.lock().unwrap().clone()
    }

    // --- Generation ---

    /// NoteOn/NoteOff pairs for one pass of a pattern, sorted by tick
    fn generate_pattern(state: &PianoState, pattern_idx: usize, start_tick: Tick) -> Vec<Event> {
        let pattern = &state.patterns[pattern_idx];

        let mut events = Vec::with_capacity(pattern.notes.len() * 2);
        for note in &pattern.notes {
            let on_tick = start_tick + (note.start * PPQ as f64) as Tick;
            let off_tick = start_tick + ((note.start + note.duration) * PPQ as f64) as Tick;
            events.push(Event::note_on(on_tick, note.pitch, note.velocity));
            events.push(Event::note_off(off_tick, note.pitch));
        }

        // Note ends interleave with later starts
        events.sort_by_key(|e| e.tick);
        events
    }

    fn pattern_ticks(state: &PianoState, pattern_idx: usize) -> Tick {
        (state.patterns[pattern_idx].length_beats * PPQ as f64) as Tick
    }

    // --- Queue producer / consumer contract ---

    pub fn fill_until(&self, target_tick: Tick) {
        let marks = self.queue.marks();
        if marks.filled_until >= target_tick {
            return;
        }

        let mut state = self.state.lock().unwrap();
        let mut queued_until = marks.filled_until;
        let mut pattern_start = marks.pattern_start;
        let mut next_pattern = marks.next_pattern;

        let mut batch = Vec::new();
        while queued_until < target_tick {
            // Honor the queued switch at its boundary
            if let Some(boundary) = next_pattern {
                if queued_until >= boundary {
                    state.playing = state.next;
                    pattern_start = boundary;
                    next_pattern = None;
                }
            }

            let ticks = Self::pattern_ticks(&state, state.playing);
            if ticks == 0 {
                break;
            }
            batch.extend(Self::generate_pattern(&state, state.playing, queued_until));
            queued_until += ticks;
        }

        self.queue.append(
            batch,
            QueueMarks {
                filled_until: queued_until,
                pattern_start,
                next_pattern,
            },
        );
    }

    pub fn peek_next_event(&self) -> Option<Event> {
        self.queue.peek()
    }

    pub fn pop_next_event(&self) -> Option<Event> {
        self.queue.pop()
    }

    pub fn clear_queue(&self) {
        self.queue.clear();
        self.pending.lock().unwrap().clear();
    }

    /// Queue a switch at the next pattern boundary at or after `at_tick`.
    /// Content already queued past the boundary is dropped.
    pub fn queue_pattern(&self, p: usize, at_tick: Tick) {
        if p >= NUM_PATTERNS {
            return;
        }

        let boundary = {
            let mut state = self.state.lock().unwrap();
            state.next = p;
            let pattern_ticks = Self::pattern_ticks(&state, state.playing);
            if pattern_ticks == 0 {
                return;
            }
            let marks = self.queue.marks();
            let since_start = at_tick.saturating_sub(marks.pattern_start);
            marks.pattern_start + since_start.div_ceil(pattern_ticks) * pattern_ticks
        };

        let marks = self.queue.marks();
        if marks.filled_until > boundary {
            self.queue.truncate_for_switch(boundary);
        } else {
            self.queue.set_next_pattern(boundary);
        }
        self.notify_queue_change();
    }

    pub fn current_pattern(&self) -> usize {
        self.state.lock().unwrap().playing
    }

    pub fn next_pattern(&self) -> Option<usize> {
        if self.queue.marks().next_pattern.is_some() {
            Some(self.state.lock().unwrap().next)
        } else {
            None
        }
    }

    pub fn content_mask(&self) -> Vec<bool> {
        let state = self.state.lock().unwrap();
        state.patterns.iter().map(|p| !p.notes.is_empty()).collect()
    }

    // --- Hot-edit regeneration ---

    /// Rebuild the queued span of the playing pattern from current note data.
    /// Keeps events before the pattern start, regenerates up to the previous
    /// fill watermark, and swaps the vector.
    pub fn regenerate_pattern(&self, pattern_idx: usize) {
        let state = self.state.lock().unwrap();
        if pattern_idx != state.playing {
            return;
        }
        let pattern_ticks = Self::pattern_ticks(&state, pattern_idx);
        if pattern_ticks == 0 {
            return;
        }

        let marks = self.queue.marks();
        let old_queue = self.queue.snapshot();

        let mut new_queue: Vec<Event> = old_queue
            .into_iter()
            .take_while(|e| e.tick < marks.pattern_start)
            .collect();

        let mut queued_until = marks.pattern_start;
        while queued_until < marks.filled_until {
            new_queue.extend(Self::generate_pattern(&state, pattern_idx, queued_until));
            queued_until += pattern_ticks;
        }

        self.queue.replace(
            new_queue,
            QueueMarks {
                filled_until: queued_until,
                pattern_start: marks.pattern_start,
                next_pattern: marks.next_pattern,
            },
        );
        drop(state);

        self.notify_queue_change();
    }

    // --- Editing (operates on the editing pattern) ---

    pub fn add_note(&self, note: PianoNote) {
        let editing = {
            let mut state = self.state.lock().unwrap();
            let editing = state.editing;
            let pattern = &mut state.patterns[editing];
            let mut note = note;
            note.duration = note.duration.max(MIN_DURATION);
            note.pitch = note.pitch.min(127);
            pattern.notes.push(note);
            pattern
                .notes
                .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
            editing
        };
        self.regenerate_pattern(editing);
    }

    pub fn remove_note(&self, index: usize) {
        let editing = {
            let mut state = self.state.lock().unwrap();
            let editing = state.editing;
            let pattern = &mut state.patterns[editing];
            if index >= pattern.notes.len() {
                return;
            }
            pattern.notes.remove(index);
            state.selected_note = None;
            editing
        };
        self.regenerate_pattern(editing);
    }

    pub fn clear_pattern(&self) {
        let editing = {
            let mut state = self.state.lock().unwrap();
            let editing = state.editing;
            state.patterns[editing].notes.clear();
            state.selected_note = None;
            editing
        };
        self.regenerate_pattern(editing);
    }

    pub fn set_pattern_length(&self, beats: f64) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        state.patterns[editing].length_beats = beats.clamp(MIN_LENGTH_BEATS, MAX_LENGTH_BEATS);
    }

    pub fn set_editing_pattern(&self, idx: usize) {
        if idx < NUM_PATTERNS {
            let mut state = self.state.lock().unwrap();
            state.editing = idx;
            state.selected_note = None;
        }
    }

    // --- Recording ---

    /// Record an incoming note pair, quantized to the nearest sixteenth
    pub fn handle_midi(&self, event: Event) {
        if !self.clock.is_playing() || !self.state.lock().unwrap().recording {
            return;
        }

        let beat = self.beat_at(event.tick);
        let quantized = (beat * 4.0).round() / 4.0;

        match event.kind {
            EventKind::NoteOn { note, velocity } if velocity > 0 => {
                self.pending.lock().unwrap().insert(
                    note,
                    PendingNote {
                        start: quantized,
                        velocity,
                    },
                );
            }
            EventKind::NoteOff { note } | EventKind::NoteOn { note, velocity: 0 } => {
                let Some(pending) = self.pending.lock().unwrap().remove(&note) else {
                    return;
                };
                let duration = (quantized - pending.start).max(MIN_DURATION);

                let mut state = self.state.lock().unwrap();
                let editing = state.editing;
                let pattern = &mut state.patterns[editing];
                pattern.notes.push(PianoNote {
                    start: pending.start,
                    duration,
                    pitch: note,
                    velocity: pending.velocity,
                });
                pattern
                    .notes
                    .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
            }
            _ => {}
        }
    }

    /// Beat position within the playing pattern for an absolute tick
    fn beat_at(&self, tick: Tick) -> f64 {
        let state = self.state.lock().unwrap();
        let marks = self.queue.marks();
        let pattern_ticks = Self::pattern_ticks(&state, state.playing);
        if pattern_ticks == 0 {
            return 0.0;
        }
        let since_start = tick.saturating_sub(marks.pattern_start);
        (since_start % pattern_ticks) as f64 / PPQ as f64
    }

    pub fn toggle_recording(&self) {
        let mut state = self.state.lock().unwrap();
        state.recording = !state.recording;
    }

    pub fn toggle_preview(&self) {
        let mut state = self.state.lock().unwrap();
        state.preview = !state.preview;
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().unwrap().recording
    }

    pub fn is_previewing(&self) -> bool {
        self.state.lock().unwrap().preview
    }

    // --- LED rendering ---

    /// 8x8 viewport centered on (center_beat, center_pitch)
    pub fn render_leds(&self) -> Vec<LedUpdate> {
        const NOTE: [u8; 3] = [80, 200, 255];
        const SELECTED: [u8; 3] = [255, 100, 200];
        const DIM: [u8; 3] = [20, 50, 70];
        const PLAYHEAD: [u8; 3] = [255, 255, 255];

        let state = self.state.lock().unwrap();
        let pattern = &state.patterns[state.editing];
        let beats_per_col = VIEW_SCALES[state.view_scale];
        let base_pitch = state.center_pitch as i32 - 4;
        let start_beat = state.center_beat - 4.0 * beats_per_col;

        let beat = {
            let marks = self.queue.marks();
            let pattern_ticks = Self::pattern_ticks(&state, state.playing);
            if pattern_ticks == 0 {
                0.0
            } else {
                let since = self.clock.cached_tick().saturating_sub(marks.pattern_start);
                (since % pattern_ticks) as f64 / PPQ as f64
            }
        };
        let playhead_col = if state.editing == state.playing && beat >= start_beat {
            ((beat - start_beat) / beats_per_col) as i32
        } else {
            -1
        };

        let mut leds = Vec::with_capacity(64);
        for row in 0..8u8 {
            let pitch = base_pitch + row as i32;
            if !(0..=127).contains(&pitch) {
                continue;
            }

            for col in 0..8u8 {
                let col_beat = start_beat + col as f64 * beats_per_col;
                let col_end = col_beat + beats_per_col;

                let mut led = if col_beat < 0.0 || col_beat >= pattern.length_beats {
                    LedUpdate::off(row, col)
                } else {
                    LedUpdate {
                        row,
                        col,
                        rgb: DIM,
                        mode: LedMode::Static,
                    }
                };

                for (i, n) in pattern.notes.iter().enumerate() {
                    if n.pitch as i32 == pitch && n.start < col_end && n.start + n.duration > col_beat
                    {
                        led.rgb = if state.selected_note == Some(i) {
                            SELECTED
                        } else {
                            NOTE
                        };
                        break;
                    }
                }

                if col as i32 == playhead_col && col_beat < pattern.length_beats {
                    led.rgb = PLAYHEAD;
                    led.mode = LedMode::Pulse;
                }

                leds.push(led);
            }
        }

        leds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> PianoRollDevice {
        PianoRollDevice::new(Arc::new(Clock::new()))
    }

    fn note(start: f64, duration: f64, pitch: u8) -> PianoNote {
        PianoNote {
            start,
            duration,
            pitch,
            velocity: 100,
        }
    }

    #[test]
    fn test_single_note_repeats_per_cycle() {
        let dev = device();
        // 4-beat pattern, one note at beat 1.0 for half a beat
        dev.add_note(note(1.0, 0.5, 60));

        dev.fill_until(2 * 4 * PPQ);

        let mut events = Vec::new();
        while let Some(e) = dev.pop_next_event() {
            events.push(e);
        }

        // First cycle: on at 960, off at 1440; second: +3840
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], Event::note_on(PPQ, 60, 100));
        assert_eq!(events[1], Event::note_off(PPQ + PPQ / 2, 60));
        assert_eq!(events[2], Event::note_on(5 * PPQ, 60, 100));
        assert_eq!(events[3], Event::note_off(5 * PPQ + PPQ / 2, 60));
    }

    #[test]
    fn test_events_sorted_with_overlapping_notes() {
        let dev = device();
        dev.add_note(note(0.0, 2.0, 60)); // off at beat 2
        dev.add_note(note(1.0, 0.25, 64)); // on at beat 1, before the C off

        dev.fill_until(4 * PPQ);
        assert!(dev.queue.is_sorted());
    }

    #[test]
    fn test_queue_pattern_boundary_quantization() {
        let dev = device();
        dev.add_note(note(0.0, 0.5, 60));
        dev.fill_until(5000);

        // Boundary after tick 100 in a 4-beat (3840 tick) pattern is 3840;
        // the already-queued span past it is wiped
        dev.queue_pattern(2, 100);

        let marks = dev.queue.marks();
        assert_eq!(marks.next_pattern, Some(3840));
        assert_eq!(marks.filled_until, 3840);
        // No queued events at or past the boundary
        assert!(dev.queue.snapshot().iter().all(|e| e.tick < 3840));
    }

    #[test]
    fn test_queue_pattern_on_exact_boundary() {
        let dev = device();
        dev.add_note(note(0.0, 0.5, 60));

        // at_tick exactly on a boundary switches at that boundary
        dev.queue_pattern(1, 3840);
        assert_eq!(dev.queue.marks().next_pattern, Some(3840));
    }

    #[test]
    fn test_switch_takes_effect_in_fill() {
        let dev = device();
        dev.add_note(note(0.0, 0.5, 60));
        // Pattern 2 gets a distinguishable pitch
        dev.set_editing_pattern(2);
        dev.add_note(note(0.0, 0.5, 72));
        dev.set_editing_pattern(0);

        dev.queue_pattern(2, 100);
        dev.fill_until(2 * 3840);

        let events = dev.queue.snapshot();
        for e in events {
            match e.kind {
                EventKind::NoteOn { note, .. } | EventKind::NoteOff { note } => {
                    if e.tick < 3840 {
                        assert_eq!(note, 60);
                    } else {
                        assert_eq!(note, 72);
                    }
                }
                _ => {}
            }
        }
        assert_eq!(dev.current_pattern(), 2);
        assert_eq!(dev.next_pattern(), None);
    }

    #[test]
    fn test_regenerate_rebuilds_current_span() {
        let dev = device();
        dev.add_note(note(0.0, 0.5, 60));
        dev.fill_until(3840);
        assert_eq!(dev.queue.len(), 2);

        // Adding a note regenerates the queued span immediately
        dev.add_note(note(2.0, 0.5, 64));
        let events = dev.queue.snapshot();
        assert_eq!(events.len(), 4);
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::NoteOn { note: 64, velocity: 100 }
                && e.tick == 2 * PPQ));
    }

    #[test]
    fn test_recording_quantizes_to_sixteenth() {
        let dev = device();
        dev.clock.play();
        dev.toggle_recording();

        // On slightly after beat 1 (tick 970 -> 1.0104 beats -> quantized 1.0)
        dev.handle_midi(Event::note_on(970, 60, 90));
        // Off near beat 1.5 (tick 1430 -> 1.4896 -> quantized 1.5)
        dev.handle_midi(Event::note_off(1430, 60));

        let state = dev.state.lock().unwrap();
        let notes = &state.patterns[0].notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].start, 1.0);
        assert_eq!(notes[0].duration, 0.5);
        assert_eq!(notes[0].pitch, 60);
        assert_eq!(notes[0].velocity, 90);
    }

    #[test]
    fn test_recording_minimum_duration() {
        let dev = device();
        dev.clock.play();
        dev.toggle_recording();

        // On and off at the same quantized beat: clamp to one sixteenth
        dev.handle_midi(Event::note_on(0, 62, 80));
        dev.handle_midi(Event::note_off(10, 62));

        let state = dev.state.lock().unwrap();
        assert_eq!(state.patterns[0].notes[0].duration, MIN_DURATION);
    }

    #[test]
    fn test_recording_disabled_when_stopped() {
        let dev = device();
        dev.toggle_recording();
        dev.handle_midi(Event::note_on(0, 60, 100));
        dev.handle_midi(Event::note_off(240, 60));

        assert!(dev.state.lock().unwrap().patterns[0].notes.is_empty());
    }

    #[test]
    fn test_clear_queue_drops_pending_recordings() {
        let dev = device();
        dev.clock.play();
        dev.toggle_recording();
        dev.handle_midi(Event::note_on(0, 60, 100));

        dev.clear_queue();
        // The off arriving after the clear finds no pending note
        dev.handle_midi(Event::note_off(240, 60));

        assert!(dev.state.lock().unwrap().patterns[0].notes.is_empty());
    }

    #[test]
    fn test_content_mask() {
        let dev = device();
        dev.set_editing_pattern(7);
        dev.add_note(note(0.0, 1.0, 60));

        let mask = dev.content_mask();
        assert!(mask[7]);
        assert!(!mask[0]);
    }

    #[test]
    fn test_state_clamp() {
        let mut state = PianoState::new();
        state.patterns[0].length_beats = 1000.0;
        state.patterns[0].notes.push(note(0.0, 0.01, 200));
        state.clamp();
        assert_eq!(state.patterns[0].length_beats, MAX_LENGTH_BEATS);
        assert_eq!(state.patterns[0].notes[0].duration, MIN_DURATION);
        assert_eq!(state.patterns[0].notes[0].pitch, 127);
    }
}
