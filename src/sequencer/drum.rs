// Drum engine - 16-lane polymetric step sequencer
//
// Playback is schedule-driven: a DrumSchedule lists which patterns play from
// which tick, and the event queue is re-derived from it whenever a scheduled
// pattern is dirty. Lanes loop at their own length (polymeter); the pattern's
// master length (longest lane) only paces the schedule bookkeeping.

use crate::midi::controller::{LedMode, LedUpdate};
use crate::midi::event::{Event, EventKind};
use crate::sequencer::device::{OnQueueChange, NUM_PATTERNS};
use crate::sequencer::queue::{EventQueue, QueueMarks};
use crate::sequencer::transport::{Clock, Tick, TICKS_PER_STEP};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const NUM_LANES: usize = 16;
pub const MAX_STEPS: usize = 32;

/// One step in a drum lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumStep {
    pub active: bool,
    pub velocity: u8,
    /// Timing offset in 1/64ths of a step, -64..=63. Stored for the editor;
    /// generation plays steps on the grid.
    pub nudge: i8,
}

impl Default for DrumStep {
    fn default() -> Self {
        Self {
            active: false,
            velocity: 100,
            nudge: 0,
        }
    }
}

/// One of the 16 note lanes, looping at its own length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumLane {
    pub steps: [DrumStep; MAX_STEPS],
    pub length: usize,
}

impl Default for DrumLane {
    fn default() -> Self {
        Self {
            steps: [DrumStep::default(); MAX_STEPS],
            length: 16,
        }
    }
}

/// A drum pattern: 16 lanes x up to 32 steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumPattern {
    pub lanes: [DrumLane; NUM_LANES],
}

impl DrumPattern {
    /// Longest lane length. Used for schedule bookkeeping, not step wrap.
    pub fn master_length(&self) -> usize {
        self.lanes.iter().map(|l| l.length).max().unwrap_or(1).max(1)
    }

    pub fn has_content(&self) -> bool {
        self.lanes
            .iter()
            .any(|lane| lane.steps[..lane.length].iter().any(|s| s.active))
    }
}

/// Persistent drum device state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrumState {
    pub patterns: Vec<DrumPattern>,
    /// Pattern currently feeding the schedule
    pub playing: usize,
    /// Pattern queued by the session (mirrors the schedule tail)
    pub next: usize,
    /// Pattern open in the editor
    pub editing: usize,
    pub selected_lane: usize,
    pub cursor: usize,
    #[serde(skip)]
    pub recording: bool,
    #[serde(skip)]
    pub preview: bool,
}

impl DrumState {
    pub fn new() -> Self {
        Self {
            patterns: vec![DrumPattern::default(); NUM_PATTERNS],
            playing: 0,
            next: 0,
            editing: 0,
            selected_lane: 0,
            cursor: 0,
            recording: false,
            preview: false,
        }
    }

    /// Clamp loaded values into their documented ranges
    pub fn clamp(&mut self) {
        self.patterns.resize(NUM_PATTERNS, DrumPattern::default());
        for pattern in &mut self.patterns {
            for lane in &mut pattern.lanes {
                lane.length = lane.length.clamp(1, MAX_STEPS);
                for step in &mut lane.steps {
                    step.velocity = step.velocity.min(127);
                    step.nudge = step.nudge.clamp(-64, 63);
                }
            }
        }
        self.playing = self.playing.min(NUM_PATTERNS - 1);
        self.next = self.next.min(NUM_PATTERNS - 1);
        self.editing = self.editing.min(NUM_PATTERNS - 1);
        self.selected_lane = self.selected_lane.min(NUM_LANES - 1);
        self.cursor = self.cursor.min(MAX_STEPS - 1);
    }
}

impl Default for DrumState {
    fn default() -> Self {
        Self::new()
    }
}

/// Which patterns play from which tick - the source of truth for playback
#[derive(Debug, Clone)]
pub struct DrumSchedule {
    /// Tick where patterns[0] starts
    pub start_tick: Tick,
    /// Pattern indices in play order
    pub patterns: Vec<usize>,
}

#[derive(Debug)]
struct ScheduleState {
    schedule: DrumSchedule,
    dirty: [bool; NUM_PATTERNS],
}

/// The drum device: pattern data + schedule + derived event queue
pub struct DrumDevice {
    state: Mutex<DrumState>,
    sched: Mutex<ScheduleState>,
    queue: EventQueue,
    clock: Arc<Clock>,
    preview_tx: Sender<usize>,
    preview_rx: Receiver<usize>,
    on_queue_change: Mutex<Option<OnQueueChange>>,
}

impl DrumDevice {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self::from_state(DrumState::new(), clock)
    }

    pub fn from_state(state: DrumState, clock: Arc<Clock>) -> Self {
        let playing = state.playing;
        let (preview_tx, preview_rx) = bounded(16);
        Self {
            state: Mutex::new(state),
            sched: Mutex::new(ScheduleState {
                schedule: DrumSchedule {
                    start_tick: 0,
                    patterns: vec![playing],
                },
                dirty: [false; NUM_PATTERNS],
            }),
            queue: EventQueue::new(),
            clock,
            preview_tx,
            preview_rx,
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

    /// Snapshot of the persistent state for saving
    pub fn snapshot(&self) -> DrumState {
        self.state.lock().unwrap().clone()
    }

    /// Slot indices pushed by preview taps, drained by the engine
    pub fn preview_events(&self) -> Receiver<usize> {
        self.preview_rx.clone()
    }

    // --- Generation ---

    /// All trigger events for one pass of a pattern starting at `start_tick`.
    /// This is the only place pattern data becomes events.
    fn generate_pattern(state: &DrumState, pattern_idx: usize, start_tick: Tick) -> Vec<Event> {
        let pattern = &state.patterns[pattern_idx];
        let master_len = pattern.master_length();

        let mut events = Vec::new();
        for step in 0..master_len {
            let step_tick = start_tick + step as Tick * TICKS_PER_STEP;
            for (lane_idx, lane) in pattern.lanes.iter().enumerate() {
                // Each lane wraps at its own length
                let lane_step = step % lane.length;
                let s = &lane.steps[lane_step];
                if s.active {
                    events.push(Event::trigger(step_tick, lane_idx as u8, s.velocity));
                }
            }
        }

        events.sort_by_key(|e| e.tick);
        events
    }

    fn pattern_ticks(state: &DrumState, pattern_idx: usize) -> Tick {
        state.patterns[pattern_idx].master_length() as Tick * TICKS_PER_STEP
    }

    // --- Schedule maintenance ---

    fn schedule_end_tick(state: &DrumState, ss: &ScheduleState) -> Tick {
        let mut tick = ss.schedule.start_tick;
        for &idx in &ss.schedule.patterns {
            tick += Self::pattern_ticks(state, idx);
        }
        tick
    }

    /// Drop leading patterns whose whole span is behind the playhead
    fn trim_schedule(state: &DrumState, ss: &mut ScheduleState, current_tick: Tick) {
        while ss.schedule.patterns.len() > 1 {
            let first_len = Self::pattern_ticks(state, ss.schedule.patterns[0]);
            if ss.schedule.start_tick + first_len <= current_tick {
                ss.schedule.start_tick += first_len;
                ss.schedule.patterns.remove(0);
            } else {
                break;
            }
        }
    }

    /// Repeat the tail pattern until the schedule covers `target_tick`
    fn extend_schedule(state: &DrumState, ss: &mut ScheduleState, target_tick: Tick) {
        while Self::schedule_end_tick(state, ss) < target_tick {
            let last = ss.schedule.patterns.last().copied().unwrap_or(0);
            ss.schedule.patterns.push(last);
        }
    }

    /// Rebuild the queue from the schedule if any scheduled pattern is
    /// dirty. Callers on the edit path follow up with a notify; the fill
    /// path stays quiet so refills don't wake themselves.
    fn sync_queue_to_schedule(&self, state: &mut DrumState, ss: &mut ScheduleState) {
        if !ss.schedule.patterns.iter().any(|&idx| ss.dirty[idx]) {
            return;
        }

        let mut new_queue = Vec::new();
        let mut tick = ss.schedule.start_tick;
        for &idx in &ss.schedule.patterns {
            new_queue.extend(Self::generate_pattern(state, idx, tick));
            tick += Self::pattern_ticks(state, idx);
        }

        // The head of the schedule is what is playing now
        if let Some(&head) = ss.schedule.patterns.first() {
            state.playing = head;
        }

        self.queue.replace(
            new_queue,
            QueueMarks {
                filled_until: tick,
                pattern_start: ss.schedule.start_tick,
                next_pattern: None,
            },
        );

        ss.dirty = [false; NUM_PATTERNS];
    }

    // --- Queue producer / consumer contract ---

    pub fn fill_until(&self, target_tick: Tick) {
        let mut state = self.state.lock().unwrap();
        let mut ss = self.sched.lock().unwrap();

        Self::trim_schedule(&state, &mut ss, self.clock.cached_tick());
        Self::extend_schedule(&state, &mut ss, target_tick);

        // Mark everything scheduled dirty so edits (and an empty queue)
        // force a rebuild
        let scheduled: Vec<usize> = ss.schedule.patterns.clone();
        for idx in scheduled {
            ss.dirty[idx] = true;
        }

        self.sync_queue_to_schedule(&mut state, &mut ss);
    }

    pub fn peek_next_event(&self) -> Option<Event> {
        self.queue.peek()
    }

    pub fn pop_next_event(&self) -> Option<Event> {
        self.queue.pop()
    }

    pub fn clear_queue(&self) {
        self.queue.clear();

        let state = self.state.lock().unwrap();
        let mut ss = self.sched.lock().unwrap();
        ss.schedule.start_tick = 0;
        ss.schedule.patterns = vec![state.playing];
        ss.dirty = [false; NUM_PATTERNS];
    }

    /// Switch to pattern `p` at the boundary after the slot containing
    /// `at_tick`: every scheduled slot after that one is replaced.
    pub fn queue_pattern(&self, p: usize, at_tick: Tick) {
        if p >= NUM_PATTERNS {
            return;
        }

        let mut state = self.state.lock().unwrap();
        let mut ss = self.sched.lock().unwrap();
        state.next = p;

        Self::extend_schedule(&state, &mut ss, at_tick);

        let mut tick = ss.schedule.start_tick;
        let mut replaced = false;
        for i in 0..ss.schedule.patterns.len() {
            let len = Self::pattern_ticks(&state, ss.schedule.patterns[i]);
            if tick + len > at_tick {
                // at_tick falls inside slot i: replace from the next slot on
                if i + 1 < ss.schedule.patterns.len() {
                    for slot in ss.schedule.patterns[i + 1..].iter_mut() {
                        *slot = p;
                    }
                } else {
                    ss.schedule.patterns.push(p);
                }
                replaced = true;
                break;
            }
            tick += len;
        }
        if !replaced {
            ss.schedule.patterns.push(p);
        }

        ss.dirty[p] = true;
        self.sync_queue_to_schedule(&mut state, &mut ss);
        drop(ss);
        drop(state);
        self.notify_queue_change();
    }

    pub fn current_pattern(&self) -> usize {
        self.state.lock().unwrap().playing
    }

    /// Queued pattern, or None when the schedule just repeats
    pub fn next_pattern(&self) -> Option<usize> {
        let ss = self.sched.lock().unwrap();
        match ss.schedule.patterns.as_slice() {
            [head, second, ..] if second != head => Some(*second),
            _ => None,
        }
    }

    pub fn content_mask(&self) -> Vec<bool> {
        let state = self.state.lock().unwrap();
        state.patterns.iter().map(|p| p.has_content()).collect()
    }

    // --- Editing (operates on the editing pattern) ---

    pub fn toggle_step(&self, lane: usize, step: usize) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        let Some(l) = state.patterns[editing].lanes.get_mut(lane) else {
            return;
        };
        if step >= l.length {
            return;
        }
        l.steps[step].active = !l.steps[step].active;

        let mut ss = self.sched.lock().unwrap();
        ss.dirty[editing] = true;
        self.sync_queue_to_schedule(&mut state, &mut ss);
        drop(ss);
        drop(state);
        self.notify_queue_change();
    }

    /// Activate a step with an explicit velocity (MIDI recording path)
    pub fn set_step(&self, lane: usize, step: usize, velocity: u8) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        let Some(l) = state.patterns[editing].lanes.get_mut(lane) else {
            return;
        };
        if step >= l.length {
            return;
        }
        l.steps[step].active = true;
        l.steps[step].velocity = velocity.min(127);

        let mut ss = self.sched.lock().unwrap();
        ss.dirty[editing] = true;
        self.sync_queue_to_schedule(&mut state, &mut ss);
        drop(ss);
        drop(state);
        self.notify_queue_change();
    }

    pub fn set_lane_length(&self, lane: usize, length: usize) {
        if !(1..=MAX_STEPS).contains(&length) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        let Some(l) = state.patterns[editing].lanes.get_mut(lane) else {
            return;
        };
        l.length = length;

        let mut ss = self.sched.lock().unwrap();
        ss.dirty[editing] = true;
        self.sync_queue_to_schedule(&mut state, &mut ss);
        drop(ss);
        drop(state);
        self.notify_queue_change();
    }

    pub fn clear_lane(&self, lane: usize) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        let Some(l) = state.patterns[editing].lanes.get_mut(lane) else {
            return;
        };
        for step in &mut l.steps {
            step.active = false;
        }

        let mut ss = self.sched.lock().unwrap();
        ss.dirty[editing] = true;
        self.sync_queue_to_schedule(&mut state, &mut ss);
        drop(ss);
        drop(state);
        self.notify_queue_change();
    }

    pub fn clear_pattern(&self) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        for lane in &mut state.patterns[editing].lanes {
            for step in &mut lane.steps {
                step.active = false;
            }
        }

        let mut ss = self.sched.lock().unwrap();
        ss.dirty[editing] = true;
        self.sync_queue_to_schedule(&mut state, &mut ss);
        drop(ss);
        drop(state);
        self.notify_queue_change();
    }

    pub fn set_editing_pattern(&self, idx: usize) {
        if idx < NUM_PATTERNS {
            self.state.lock().unwrap().editing = idx;
        }
    }

    pub fn select_lane(&self, lane: usize) {
        if lane < NUM_LANES {
            let mut state = self.state.lock().unwrap();
            state.selected_lane = lane;
            if state.preview {
                // drop the tap if the preview channel is full
                let _ = self.preview_tx.try_send(lane);
            }
        }
    }

    // --- Recording / preview ---

    /// Record an incoming note as a step at the event's tick position.
    /// The note number is used as the lane index (0..16).
    pub fn handle_midi(&self, event: Event) {
        let (recording, editing) = {
            let state = self.state.lock().unwrap();
            (state.recording, state.editing)
        };
        if !recording || !self.clock.is_playing() {
            return;
        }

        let EventKind::NoteOn { note, velocity } = event.kind else {
            return;
        };
        let lane = note as usize;
        if lane >= NUM_LANES {
            return;
        }

        let start_tick = self.sched.lock().unwrap().schedule.start_tick;
        let lane_length = {
            let state = self.state.lock().unwrap();
            state.patterns[editing].lanes[lane].length
        };
        let ticks_since_start = event.tick.saturating_sub(start_tick);
        let step = (ticks_since_start / TICKS_PER_STEP) as usize % lane_length;

        self.set_step(lane, step, velocity);
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

    /// Current step of the selected lane's playhead
    fn current_step(&self, ss: &ScheduleState) -> usize {
        let ticks = self
            .clock
            .cached_tick()
            .saturating_sub(ss.schedule.start_tick);
        (ticks / TICKS_PER_STEP) as usize
    }

    pub fn render_leds(&self) -> Vec<LedUpdate> {
        const STEP_ON: [u8; 3] = [234, 73, 116];
        const STEP_OFF: [u8; 3] = [80, 30, 50];
        const LANE_CONTENT: [u8; 3] = [148, 18, 126];
        const LANE_EMPTY: [u8; 3] = [40, 10, 30];
        const SELECTED: [u8; 3] = [255, 255, 255];
        const COMMANDS: [u8; 3] = [253, 157, 110];
        const PLAYHEAD: [u8; 3] = [255, 255, 255];
        const RECORD_ON: [u8; 3] = [255, 0, 0];
        const PREVIEW_ON: [u8; 3] = [0, 255, 0];

        let state = self.state.lock().unwrap();
        let ss = self.sched.lock().unwrap();
        let pattern = &state.patterns[state.editing];
        let lane = &pattern.lanes[state.selected_lane];
        let playhead = self.current_step(&ss) % lane.length;

        let mut leds = Vec::with_capacity(64);

        // Rows 4-7: the selected lane's 32 steps, 8 per row, top-down
        for step in 0..MAX_STEPS {
            let row = 7 - (step / 8) as u8;
            let col = (step % 8) as u8;
            let led = if step >= lane.length {
                LedUpdate::off(row, col)
            } else if step == playhead {
                LedUpdate {
                    row,
                    col,
                    rgb: PLAYHEAD,
                    mode: LedMode::Pulse,
                }
            } else if lane.steps[step].active {
                LedUpdate {
                    row,
                    col,
                    rgb: STEP_ON,
                    mode: LedMode::Static,
                }
            } else {
                LedUpdate {
                    row,
                    col,
                    rgb: STEP_OFF,
                    mode: LedMode::Static,
                }
            };
            leds.push(led);
        }

        // Bottom-left 4x4: lane select, lit by content
        for lane_idx in 0..NUM_LANES {
            let row = (lane_idx / 4) as u8;
            let col = (lane_idx % 4) as u8;
            let l = &pattern.lanes[lane_idx];
            let has_content = l.steps[..l.length].iter().any(|s| s.active);
            let rgb = if lane_idx == state.selected_lane {
                SELECTED
            } else if has_content {
                LANE_CONTENT
            } else {
                LANE_EMPTY
            };
            leds.push(LedUpdate {
                row,
                col,
                rgb,
                mode: LedMode::Static,
            });
        }

        // Bottom-right 4x4: command pads, with preview/record status
        for row in 0..4u8 {
            for col in 4..8u8 {
                let rgb = match (row, col) {
                    (3, 4) if state.preview => PREVIEW_ON,
                    (3, 5) if state.recording => RECORD_ON,
                    _ => COMMANDS,
                };
                leds.push(LedUpdate {
                    row,
                    col,
                    rgb,
                    mode: LedMode::Static,
                });
            }
        }

        leds
    }
}
