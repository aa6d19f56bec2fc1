// Metropolix engine - 8-stage melodic sequencer with ratchets, probability,
// gate lengths, slides and per-stage pitch accumulators
//
// Each stage occupies pulse_count sixteenth-steps; within a stage the
// ratchets subdivide evenly and each subdivision rolls its own probability
// die. The "faux pattern length" (sum of pulse counts over active stages) is
// the quantization unit for pattern switches.

use crate::midi::controller::{LedMode, LedUpdate};
use crate::midi::event::Event;
use crate::sequencer::device::{OnQueueChange, NUM_PATTERNS};
use crate::sequencer::queue::{EventQueue, QueueMarks};
use crate::sequencer::transport::{Tick, TICKS_PER_STEP};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub const NUM_STAGES: usize = 8;

/// Gate length in sixteenth-steps, indexed by `Stage::gate_length`.
/// Index 0 is "trigger": note-off lands on the note-on tick.
pub const GATE_LENGTH_STEPS: [Tick; 6] = [0, 1, 2, 4, 8, 16];

/// Pitch-bend units per semitone for slide ramps
const BEND_PER_SEMITONE: f64 = 4096.0;

/// The 22 scale modes, stored as ascending semitone intervals from the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    Chromatic,
    Major,
    Minor,
    Pentatonic,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    Blues,
    WholeTone,
    DimHalfWhole,
    DimWholeHalf,
    HungarianMinor,
    DoubleHarmonic,
    PhrygianDominant,
    Hirajoshi,
    InSen,
    Yo,
    Bhairavi,
}

impl Scale {
    pub const ALL: [Scale; 22] = [
        Scale::Chromatic,
        Scale::Major,
        Scale::Minor,
        Scale::Pentatonic,
        Scale::Dorian,
        Scale::Phrygian,
        Scale::Lydian,
        Scale::Mixolydian,
        Scale::Locrian,
        Scale::HarmonicMinor,
        Scale::MelodicMinor,
        Scale::Blues,
        Scale::WholeTone,
        Scale::DimHalfWhole,
        Scale::DimWholeHalf,
        Scale::HungarianMinor,
        Scale::DoubleHarmonic,
        Scale::PhrygianDominant,
        Scale::Hirajoshi,
        Scale::InSen,
        Scale::Yo,
        Scale::Bhairavi,
    ];

    pub fn intervals(&self) -> &'static [i32] {
        match self {
            Scale::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11, 12],
            Scale::Minor => &[0, 2, 3, 5, 7, 8, 10, 12],
            Scale::Pentatonic => &[0, 2, 4, 7, 9, 12, 14, 16],
            Scale::Dorian => &[0, 2, 3, 5, 7, 9, 10, 12],
            Scale::Phrygian => &[0, 1, 3, 5, 7, 8, 10, 12],
            Scale::Lydian => &[0, 2, 4, 6, 7, 9, 11, 12],
            Scale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10, 12],
            Scale::Locrian => &[0, 1, 3, 5, 6, 8, 10, 12],
            Scale::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11, 12],
            Scale::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11, 12],
            Scale::Blues => &[0, 3, 5, 6, 7, 10, 12, 15],
            Scale::WholeTone => &[0, 2, 4, 6, 8, 10, 12],
            Scale::DimHalfWhole => &[0, 1, 3, 4, 6, 7, 9, 10],
            Scale::DimWholeHalf => &[0, 2, 3, 5, 6, 8, 9, 11],
            Scale::HungarianMinor => &[0, 2, 3, 6, 7, 8, 11, 12],
            Scale::DoubleHarmonic => &[0, 1, 4, 5, 7, 8, 11, 12],
            Scale::PhrygianDominant => &[0, 1, 4, 5, 7, 8, 10, 12],
            Scale::Hirajoshi => &[0, 2, 3, 7, 8, 12, 14, 15],
            Scale::InSen => &[0, 1, 5, 7, 10, 12, 13, 17],
            Scale::Yo => &[0, 2, 4, 7, 9, 12, 14, 16],
            Scale::Bhairavi => &[0, 1, 3, 5, 7, 8, 10, 12],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scale::Chromatic => "Chromatic",
            Scale::Major => "Major",
            Scale::Minor => "Minor",
            Scale::Pentatonic => "Pentatonic",
            Scale::Dorian => "Dorian",
            Scale::Phrygian => "Phrygian",
            Scale::Lydian => "Lydian",
            Scale::Mixolydian => "Mixolydian",
            Scale::Locrian => "Locrian",
            Scale::HarmonicMinor => "Harm Min",
            Scale::MelodicMinor => "Mel Min",
            Scale::Blues => "Blues",
            Scale::WholeTone => "Whole Tone",
            Scale::DimHalfWhole => "Dim H-W",
            Scale::DimWholeHalf => "Dim W-H",
            Scale::HungarianMinor => "Hungarian",
            Scale::DoubleHarmonic => "Dbl Harm",
            Scale::PhrygianDominant => "Phryg Dom",
            Scale::Hirajoshi => "Hirajoshi",
            Scale::InSen => "In Sen",
            Scale::Yo => "Yo",
            Scale::Bhairavi => "Bhairavi",
        }
    }
}

/// Stage play order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMode {
    Forward,
    Reverse,
    Pendulum,
    Random,
}

/// What happens when an accumulator's trigger count reaches its reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumMode {
    /// Offset and count return to zero, direction to +1
    Reset,
    /// Direction flips, count restarts
    PingPong,
    /// Offset freezes at its current value
    Hold,
}

/// One of the eight stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub octave: u8,      // 0..=7, 4 = middle
    pub note: u8,        // scale degree 0..=7
    pub gate: bool,
    pub pulse_count: u8, // 1..=8 sixteenth-steps
    pub ratchets: u8,    // 1..=8 subdivisions
    pub probability: u8, // 0..=100 per ratchet
    pub slide: bool,
    pub gate_length: u8, // index into GATE_LENGTH_STEPS
    pub accumulator: i8, // -4..=3 semitones per trigger
    pub accum_reset: u8, // 0 = never, else reset after N
    pub accum_mode: AccumMode,
}

impl Default for Stage {
    fn default() -> Self {
        Self {
            octave: 4,
            note: 0,
            gate: true,
            pulse_count: 1,
            ratchets: 1,
            probability: 100,
            slide: false,
            gate_length: 1,
            accumulator: 0,
            accum_reset: 0,
            accum_mode: AccumMode::Reset,
        }
    }
}

/// One metropolix pattern: the stages plus pattern-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetropolixPattern {
    pub stages: [Stage; NUM_STAGES],
    pub length: usize, // number of active stages, 1..=8
    pub mode: PlayMode,
    pub scale: Scale,
    pub root_note: u8,
    pub slide_time: u8, // ramp length in ticks-per-step units, 1..=8
}

impl Default for MetropolixPattern {
    fn default() -> Self {
        let mut stages = [Stage::default(); NUM_STAGES];
        // Walk up the scale by default
        for (i, stage) in stages.iter_mut().enumerate() {
            stage.note = i as u8;
        }
        Self {
            stages,
            length: NUM_STAGES,
            mode: PlayMode::Forward,
            scale: Scale::Major,
            root_note: 60,
            slide_time: 3,
        }
    }
}

impl MetropolixPattern {
    /// One pass through the active stages, in sixteenth-steps
    pub fn faux_length_steps(&self) -> u64 {
        self.stages[..self.length]
            .iter()
            .map(|s| s.pulse_count as u64)
            .sum()
    }

    pub fn faux_length_ticks(&self) -> Tick {
        self.faux_length_steps() * TICKS_PER_STEP
    }
}

/// Per-stage accumulator runtime plus playhead bookkeeping.
/// Reset on Stop and on pattern change; never persisted.
#[derive(Debug, Clone)]
pub struct MetropolixRuntime {
    pub stage: usize,
    pub pendulum_dir: i32,
    pub accum_offset: [i32; NUM_STAGES],
    pub accum_count: [u8; NUM_STAGES],
    pub accum_dir: [i32; NUM_STAGES],
}

impl Default for MetropolixRuntime {
    fn default() -> Self {
        Self {
            stage: 0,
            pendulum_dir: 1,
            accum_offset: [0; NUM_STAGES],
            accum_count: [0; NUM_STAGES],
            accum_dir: [1; NUM_STAGES],
        }
    }
}

/// Persistent metropolix device state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetropolixState {
    pub patterns: Vec<MetropolixPattern>,
    pub playing: usize,
    pub next: usize,
    pub editing: usize,
    pub selected_stage: usize,
    #[serde(skip)]
    pub runtime: MetropolixRuntime,
}

impl MetropolixState {
    pub fn new() -> Self {
        Self {
            patterns: vec![MetropolixPattern::default(); NUM_PATTERNS],
            playing: 0,
            next: 0,
            editing: 0,
            selected_stage: 0,
            runtime: MetropolixRuntime::default(),
        }
    }

    /// Clamp loaded values into their documented ranges
    pub fn clamp(&mut self) {
        self.patterns
            .resize(NUM_PATTERNS, MetropolixPattern::default());
        for pattern in &mut self.patterns {
            pattern.length = pattern.length.clamp(1, NUM_STAGES);
            pattern.root_note = pattern.root_note.min(127);
            pattern.slide_time = pattern.slide_time.clamp(1, 8);
            for stage in &mut pattern.stages {
                stage.octave = stage.octave.min(7);
                stage.note = stage.note.min(7);
                stage.pulse_count = stage.pulse_count.clamp(1, 8);
                stage.ratchets = stage.ratchets.clamp(1, 8);
                stage.probability = stage.probability.min(100);
                stage.gate_length = stage.gate_length.min(5);
                stage.accumulator = stage.accumulator.clamp(-4, 3);
                stage.accum_reset = stage.accum_reset.min(8);
            }
        }
        self.playing = self.playing.min(NUM_PATTERNS - 1);
        self.next = self.next.min(NUM_PATTERNS - 1);
        self.editing = self.editing.min(NUM_PATTERNS - 1);
        self.selected_stage = self.selected_stage.min(NUM_STAGES - 1);
        self.runtime = MetropolixRuntime::default();
    }
}

impl Default for MetropolixState {
    fn default() -> Self {
        Self::new()
    }
}

/// Pitch of a stage under the pattern's scale, octave, root and the live
/// accumulator offset, clamped to MIDI range
fn stage_pitch(pattern: &MetropolixPattern, runtime: &MetropolixRuntime, stage_idx: usize) -> i32 {
    let stage = &pattern.stages[stage_idx];
    let scale = pattern.scale.intervals();
    let degree = stage.note as usize;

    let interval = scale[degree % scale.len()];
    let octave_shift = (degree / scale.len()) as i32;

    let pitch = pattern.root_note as i32
        + interval
        + 12 * octave_shift
        + 12 * (stage.octave as i32 - 4)
        + runtime.accum_offset[stage_idx];

    pitch.clamp(0, 127)
}

/// End-of-stage accumulator update. Runs whether or not the stage fired.
///
/// The offset is advanced first, then the count checked against the reset,
/// so a PingPong accumulator peaks at reset * accumulator before walking
/// back down and a Reset accumulator returns to exactly 0 after `reset`
/// firings.
fn apply_accumulator(
    pattern: &MetropolixPattern,
    runtime: &mut MetropolixRuntime,
    stage_idx: usize,
) {
    let stage = &pattern.stages[stage_idx];
    if stage.accumulator == 0 {
        return;
    }
    if runtime.accum_dir[stage_idx] == 0 {
        runtime.accum_dir[stage_idx] = 1;
    }

    // Held: the count has latched at the reset limit
    if stage.accum_reset > 0
        && runtime.accum_count[stage_idx] >= stage.accum_reset
        && stage.accum_mode == AccumMode::Hold
    {
        runtime.accum_count[stage_idx] = stage.accum_reset;
        return;
    }

    runtime.accum_offset[stage_idx] += stage.accumulator as i32 * runtime.accum_dir[stage_idx];
    runtime.accum_count[stage_idx] += 1;

    if stage.accum_reset > 0 && runtime.accum_count[stage_idx] >= stage.accum_reset {
        match stage.accum_mode {
            AccumMode::Reset => {
                runtime.accum_offset[stage_idx] = 0;
                runtime.accum_count[stage_idx] = 0;
                runtime.accum_dir[stage_idx] = 1;
            }
            AccumMode::PingPong => {
                runtime.accum_dir[stage_idx] = -runtime.accum_dir[stage_idx];
                runtime.accum_count[stage_idx] = 0;
            }
            AccumMode::Hold => {
                runtime.accum_count[stage_idx] = stage.accum_reset;
            }
        }
    }
}

/// Stage that plays after `runtime.stage` under the pattern's mode
fn next_stage<R: Rng>(
    pattern: &MetropolixPattern,
    runtime: &mut MetropolixRuntime,
    rng: &mut R,
) -> usize {
    let len = pattern.length as i32;
    let current = runtime.stage as i32;
    if len <= 1 {
        runtime.pendulum_dir = 1;
        return 0;
    }

    match pattern.mode {
        PlayMode::Forward => ((current + 1) % len) as usize,
        PlayMode::Reverse => ((current - 1 + len) % len) as usize,
        PlayMode::Pendulum => {
            let mut dir = runtime.pendulum_dir;
            let mut next = current + dir;
            if next < 0 || next >= len {
                dir = -dir;
                next = current + dir;
            }
            runtime.pendulum_dir = dir;
            next.clamp(0, len - 1) as usize
        }
        PlayMode::Random => rng.gen_range(0..len) as usize,
    }
}

pub struct MetropolixDevice {
    state: Mutex<MetropolixState>,
    queue: EventQueue,
    on_queue_change: Mutex<Option<OnQueueChange>>,
}

impl MetropolixDevice {
    pub fn new() -> Self {
        Self::from_state(MetropolixState::new())
    }

    pub fn from_state(state: MetropolixState) -> Self {
        Self {
            state: Mutex::new(state),
            queue: EventQueue::new(),
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

    pub fn snapshot(&self) -> MetropolixState {
        self.state.lock().unwrap().clone()
    }

    // --- Generation ---

    /// All events for one faux cycle starting at `start_tick`. Advances the
    /// stage playhead and the accumulators as a side effect.
    fn generate_cycle<R: Rng>(
        state: &mut MetropolixState,
        pattern_idx: usize,
        start_tick: Tick,
        rng: &mut R,
    ) -> Vec<Event> {
        // A cycle is one pass over the active stage slots, restarting at 0
        state.runtime.stage = 0;
        let pattern = state.patterns[pattern_idx].clone();

        let mut events = Vec::new();
        let mut current_tick = start_tick;

        for _ in 0..pattern.length {
            let stage_idx = state.runtime.stage;
            let stage = pattern.stages[stage_idx];
            let stage_ticks = stage.pulse_count as Tick * TICKS_PER_STEP;

            if stage.gate && stage.ratchets > 0 {
                let interval = (stage_ticks / stage.ratchets as Tick).max(1);

                for r in 0..stage.ratchets {
                    // One die roll per ratchet
                    if rng.gen_range(0..100u8) >= stage.probability {
                        continue;
                    }

                    let ratchet_tick = current_tick + r as Tick * interval;
                    let pitch = stage_pitch(&pattern, &state.runtime, stage_idx) as u8;
                    events.push(Event::note_on(ratchet_tick, pitch, 100));

                    let gate_ticks = GATE_LENGTH_STEPS[stage.gate_length as usize] * TICKS_PER_STEP;
                    if gate_ticks == 0 {
                        // Trigger: off lands on the on tick
                        events.push(Event::note_off(ratchet_tick, pitch));
                    } else {
                        // The gate may not cross the next ratchet, nor the
                        // stage end on the last ratchet
                        let max_gate = if r == stage.ratchets - 1 {
                            stage_ticks - r as Tick * interval
                        } else {
                            interval
                        };
                        events.push(Event::note_off(ratchet_tick + gate_ticks.min(max_gate), pitch));
                    }
                }
            }

            // The accumulator advances whether or not anything fired
            apply_accumulator(&pattern, &mut state.runtime, stage_idx);

            let next = next_stage(&pattern, &mut state.runtime, rng);

            // Slide: pitch-bend ramp across the stage boundary
            if stage.slide && next != stage_idx && pattern.slide_time > 0 {
                let slide_start = current_tick + stage_ticks;
                let from = stage_pitch(&pattern, &state.runtime, stage_idx);
                let to = stage_pitch(&pattern, &state.runtime, next);
                let steps = pattern.slide_time as u64;

                for i in 0..steps {
                    let progress = i as f64 / steps as f64;
                    let bend = ((to - from) as f64 * progress * BEND_PER_SEMITONE) as i32;
                    events.push(Event::pitch_bend(
                        slide_start + i,
                        bend.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
                    ));
                }
                events.push(Event::pitch_bend(slide_start + steps, 0));
            }

            current_tick += stage_ticks;
            state.runtime.stage = next;
        }

        // Slide ramps spill past their stage; restore queue order
        events.sort_by_key(|e| e.tick);
        events
    }

    // --- Queue producer / consumer contract ---

    pub fn fill_until(&self, target_tick: Tick) {
        let marks = self.queue.marks();
        if marks.filled_until >= target_tick {
            return;
        }

        let mut state = self.state.lock().unwrap();
        let mut rng = rand::thread_rng();
        let mut queued_until = marks.filled_until;
        let mut pattern_start = marks.pattern_start;
        let mut next_pattern = marks.next_pattern;

        let mut batch = Vec::new();
        while queued_until < target_tick {
            if let Some(boundary) = next_pattern {
                if queued_until >= boundary {
                    state.playing = state.next;
                    state.runtime = MetropolixRuntime::default();
                    pattern_start = boundary;
                    next_pattern = None;
                }
            }

            let playing = state.playing;
            let cycle_ticks = state.patterns[playing].faux_length_ticks();
            if cycle_ticks == 0 {
                break;
            }
            batch.extend(Self::generate_cycle(&mut state, playing, queued_until, &mut rng));
            queued_until += cycle_ticks;
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
        self.state.lock().unwrap().runtime = MetropolixRuntime::default();
    }

    /// Queue a switch at the next faux-pattern boundary at or after `at_tick`
    pub fn queue_pattern(&self, p: usize, at_tick: Tick) {
        if p >= NUM_PATTERNS {
            return;
        }

        let boundary = {
            let mut state = self.state.lock().unwrap();
            state.next = p;
            let cycle_ticks = state.patterns[state.playing].faux_length_ticks();
            if cycle_ticks == 0 {
                return;
            }
            let marks = self.queue.marks();
            let since_start = at_tick.saturating_sub(marks.pattern_start);
            marks.pattern_start + since_start.div_ceil(cycle_ticks) * cycle_ticks
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

    /// A pattern "has content" when any active stage departs from defaults
    pub fn content_mask(&self) -> Vec<bool> {
        let state = self.state.lock().unwrap();
        state
            .patterns
            .iter()
            .map(|p| {
                p.stages[..p.length].iter().any(|s| {
                    !s.gate
                        || s.ratchets != 1
                        || s.pulse_count != 1
                        || s.slide
                        || s.accumulator != 0
                        || s.probability != 100
                })
            })
            .collect()
    }

    // --- Hot-edit regeneration (scale / root changes) ---

    /// Rebuild the queued span of the playing pattern from current data.
    /// Accumulators re-advance during the rebuild, as they would have live.
    pub fn regenerate_pattern(&self, pattern_idx: usize) {
        let mut state = self.state.lock().unwrap();
        if pattern_idx != state.playing {
            return;
        }
        let cycle_ticks = state.patterns[pattern_idx].faux_length_ticks();
        if cycle_ticks == 0 {
            return;
        }

        let marks = self.queue.marks();
        let old_queue = self.queue.snapshot();
        let mut rng = rand::thread_rng();

        let mut new_queue: Vec<Event> = old_queue
            .into_iter()
            .take_while(|e| e.tick < marks.pattern_start)
            .collect();

        let mut queued_until = marks.pattern_start;
        while queued_until < marks.filled_until {
            new_queue.extend(Self::generate_cycle(
                &mut state,
                pattern_idx,
                queued_until,
                &mut rng,
            ));
            queued_until += cycle_ticks;
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

    fn with_stage(&self, stage_idx: usize, f: impl FnOnce(&mut Stage)) {
        if stage_idx >= NUM_STAGES {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        f(&mut state.patterns[editing].stages[stage_idx]);
    }

    pub fn set_stage_octave(&self, stage: usize, octave: u8) {
        self.with_stage(stage, |s| s.octave = octave.min(7));
    }

    pub fn set_stage_note(&self, stage: usize, note: u8) {
        self.with_stage(stage, |s| s.note = note.min(7));
    }

    pub fn set_stage_gate(&self, stage: usize, gate: bool) {
        self.with_stage(stage, |s| s.gate = gate);
    }

    pub fn set_stage_pulse_count(&self, stage: usize, pulses: u8) {
        self.with_stage(stage, |s| s.pulse_count = pulses.clamp(1, 8));
    }

    pub fn set_stage_ratchets(&self, stage: usize, ratchets: u8) {
        self.with_stage(stage, |s| s.ratchets = ratchets.clamp(1, 8));
    }

    pub fn set_stage_probability(&self, stage: usize, probability: u8) {
        self.with_stage(stage, |s| s.probability = probability.min(100));
    }

    pub fn set_stage_slide(&self, stage: usize, slide: bool) {
        self.with_stage(stage, |s| s.slide = slide);
    }

    pub fn set_stage_gate_length(&self, stage: usize, index: u8) {
        self.with_stage(stage, |s| s.gate_length = index.min(5));
    }

    pub fn set_stage_accumulator(&self, stage: usize, accumulator: i8) {
        self.with_stage(stage, |s| s.accumulator = accumulator.clamp(-4, 3));
    }

    pub fn set_stage_accum_reset(&self, stage: usize, reset: u8) {
        self.with_stage(stage, |s| s.accum_reset = reset.min(8));
    }

    pub fn set_stage_accum_mode(&self, stage: usize, mode: AccumMode) {
        self.with_stage(stage, |s| s.accum_mode = mode);
    }

    pub fn set_length(&self, length: usize) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        state.patterns[editing].length = length.clamp(1, NUM_STAGES);
        if state.selected_stage >= state.patterns[editing].length {
            state.selected_stage = state.patterns[editing].length - 1;
        }
    }

    pub fn set_mode(&self, mode: PlayMode) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        state.patterns[editing].mode = mode;
    }

    /// Changing the scale reshapes pitches already in the queue
    pub fn set_scale(&self, scale: Scale) {
        let editing = {
            let mut state = self.state.lock().unwrap();
            let editing = state.editing;
            state.patterns[editing].scale = scale;
            editing
        };
        self.regenerate_pattern(editing);
    }

    pub fn set_root_note(&self, root: u8) {
        let editing = {
            let mut state = self.state.lock().unwrap();
            let editing = state.editing;
            state.patterns[editing].root_note = root.min(127);
            editing
        };
        self.regenerate_pattern(editing);
    }

    pub fn set_slide_time(&self, slide_time: u8) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        state.patterns[editing].slide_time = slide_time.clamp(1, 8);
    }

    pub fn clear_pattern(&self) {
        let mut state = self.state.lock().unwrap();
        let editing = state.editing;
        state.patterns[editing] = MetropolixPattern::default();
    }

    pub fn set_editing_pattern(&self, idx: usize) {
        if idx < NUM_PATTERNS {
            self.state.lock().unwrap().editing = idx;
        }
    }

    pub fn select_stage(&self, stage: usize) {
        if stage < NUM_STAGES {
            self.state.lock().unwrap().selected_stage = stage;
        }
    }

    // --- Device contract stubs ---

    /// Incoming notes are not recorded into stages
    pub fn handle_midi(&self, _event: Event) {}

    pub fn toggle_recording(&self) {}

    pub fn toggle_preview(&self) {}

    pub fn is_recording(&self) -> bool {
        false
    }

    pub fn is_previewing(&self) -> bool {
        false
    }

    // --- LED rendering ---

    /// One column per stage, value shown as a lit row; the playhead column
    /// pulses
    pub fn render_leds(&self) -> Vec<LedUpdate> {
        const ACTIVE: [u8; 3] = [255, 100, 50];
        const DIM: [u8; 3] = [50, 30, 20];
        const PLAYHEAD: [u8; 3] = [255, 255, 255];

        let state = self.state.lock().unwrap();
        let pattern = &state.patterns[state.editing];

        let mut leds = Vec::with_capacity(64);
        for col in 0..NUM_STAGES {
            if col >= pattern.length {
                for row in 0..8u8 {
                    leds.push(LedUpdate::off(row, col as u8));
                }
                continue;
            }

            let stage = &pattern.stages[col];
            // Scale-degree view: lit row = note value
            for row in 0..8u8 {
                let rgb = if row == stage.note { ACTIVE } else { DIM };
                leds.push(LedUpdate {
                    row,
                    col: col as u8,
                    rgb,
                    mode: LedMode::Static,
                });
            }
        }

        // Pulse the playhead column
        let playhead = state.runtime.stage;
        if playhead < pattern.length {
            for led in leds.iter_mut().filter(|l| l.col as usize == playhead) {
                led.mode = LedMode::Pulse;
                if led.rgb == DIM {
                    led.rgb = PLAYHEAD;
                }
            }
        }

        leds
    }
}

impl Default for MetropolixDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::EventKind;

    /// A one-stage pattern playing C4 every step
    fn one_stage_state() -> MetropolixState {
        let mut state = MetropolixState::new();
        let pattern = &mut state.patterns[0];
        pattern.length = 1;
        pattern.root_note = 60;
        pattern.stages[0].note = 0;
        state
    }

    fn note_ons(events: &[Event]) -> Vec<&Event> {
        events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .collect()
    }

    #[test]
    fn test_gate_off_produces_nothing() {
        let mut state = one_stage_state();
        state.patterns[0].stages[0].gate = false;
        state.patterns[0].stages[0].ratchets = 8;

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);
        assert!(events.is_empty());
    }

    #[test]
    fn test_probability_zero_produces_nothing() {
        let mut state = one_stage_state();
        state.patterns[0].stages[0].probability = 0;

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);
        assert!(events.is_empty());
    }

    #[test]
    fn test_probability_hundred_fires_every_ratchet() {
        let mut state = one_stage_state();
        state.patterns[0].stages[0].pulse_count = 4;
        state.patterns[0].stages[0].ratchets = 4;

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);

        // 4 ratchets across 4 steps (960 ticks): ons at 0, 240, 480, 720
        let ons = note_ons(&events);
        assert_eq!(ons.len(), 4);
        let ticks: Vec<Tick> = ons.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 240, 480, 720]);
    }

    #[test]
    fn test_gate_length_zero_is_trigger() {
        let mut state = one_stage_state();
        state.patterns[0].stages[0].gate_length = 0;

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);

        // NoteOn and NoteOff on the same tick
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tick, events[1].tick);
        assert!(matches!(events[0].kind, EventKind::NoteOn { .. }));
        assert!(matches!(events[1].kind, EventKind::NoteOff { .. }));
    }

    #[test]
    fn test_gate_clamped_to_ratchet_window() {
        let mut state = one_stage_state();
        // Full-step gate (index 5 = 16 steps) but 2 ratchets over 1 step:
        // each gate is clamped to the 120-tick ratchet interval
        state.patterns[0].stages[0].gate_length = 5;
        state.patterns[0].stages[0].ratchets = 2;

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].tick, 0); // on
        assert_eq!(events[1].tick, 120); // off, clamped to next ratchet
        assert_eq!(events[2].tick, 120); // on
        assert_eq!(events[3].tick, 240); // off, clamped to stage end
    }

    #[test]
    fn test_pitch_formula() {
        let pattern = MetropolixPattern {
            root_note: 60,
            scale: Scale::Major,
            ..Default::default()
        };
        let runtime = MetropolixRuntime::default();

        // Degree 0 at middle octave: the root itself
        assert_eq!(stage_pitch(&pattern, &runtime, 0), 60);
        // Degree 2 of major: +4 semitones
        assert_eq!(stage_pitch(&pattern, &runtime, 2), 64);
        // Degree 4 of major: +7
        assert_eq!(stage_pitch(&pattern, &runtime, 4), 67);
    }

    #[test]
    fn test_pitch_octave_and_accumulator() {
        let mut pattern = MetropolixPattern {
            root_note: 60,
            scale: Scale::Major,
            ..Default::default()
        };
        pattern.stages[0].octave = 5; // one octave up
        let mut runtime = MetropolixRuntime::default();
        runtime.accum_offset[0] = 3;

        assert_eq!(stage_pitch(&pattern, &runtime, 0), 60 + 12 + 3);
    }

    #[test]
    fn test_pitch_clamped_to_midi_range() {
        let mut pattern = MetropolixPattern {
            root_note: 120,
            scale: Scale::Major,
            ..Default::default()
        };
        pattern.stages[0].octave = 7;
        let runtime = MetropolixRuntime::default();
        assert_eq!(stage_pitch(&pattern, &runtime, 0), 127);

        pattern.root_note = 0;
        pattern.stages[0].octave = 0;
        assert_eq!(stage_pitch(&pattern, &runtime, 0), 0);
    }

    #[test]
    fn test_accumulator_reset_mode() {
        let mut pattern = MetropolixPattern::default();
        pattern.stages[0].accumulator = 2;
        pattern.stages[0].accum_reset = 3;
        pattern.stages[0].accum_mode = AccumMode::Reset;
        let mut runtime = MetropolixRuntime::default();

        // Offsets after each firing: 2, 4, then back to 0 at the third
        apply_accumulator(&pattern, &mut runtime, 0);
        assert_eq!(runtime.accum_offset[0], 2);
        apply_accumulator(&pattern, &mut runtime, 0);
        assert_eq!(runtime.accum_offset[0], 4);
        apply_accumulator(&pattern, &mut runtime, 0);
        assert_eq!(runtime.accum_offset[0], 0);
        assert_eq!(runtime.accum_count[0], 0);
        assert_eq!(runtime.accum_dir[0], 1);
    }

    #[test]
    fn test_accumulator_ping_pong_mode() {
        let mut pattern = MetropolixPattern::default();
        pattern.stages[0].accumulator = 1;
        pattern.stages[0].accum_reset = 3;
        pattern.stages[0].accum_mode = AccumMode::PingPong;
        let mut runtime = MetropolixRuntime::default();

        // Rises to reset * accumulator, then walks back down
        let mut offsets = Vec::new();
        for _ in 0..9 {
            apply_accumulator(&pattern, &mut runtime, 0);
            offsets.push(runtime.accum_offset[0]);
        }
        assert_eq!(offsets, vec![1, 2, 3, 2, 1, 0, 1, 2, 3]);
    }

    #[test]
    fn test_accumulator_hold_mode() {
        let mut pattern = MetropolixPattern::default();
        pattern.stages[0].accumulator = 2;
        pattern.stages[0].accum_reset = 2;
        pattern.stages[0].accum_mode = AccumMode::Hold;
        let mut runtime = MetropolixRuntime::default();

        for _ in 0..6 {
            apply_accumulator(&pattern, &mut runtime, 0);
        }
        // Frozen once the count latches
        assert_eq!(runtime.accum_offset[0], 4);
        assert_eq!(runtime.accum_count[0], 2);
    }

    #[test]
    fn test_accumulator_zero_is_inert() {
        let pattern = MetropolixPattern::default();
        let mut runtime = MetropolixRuntime::default();
        apply_accumulator(&pattern, &mut runtime, 0);
        assert_eq!(runtime.accum_offset[0], 0);
        assert_eq!(runtime.accum_count[0], 0);
    }

    #[test]
    fn test_next_stage_forward_and_reverse() {
        let mut pattern = MetropolixPattern::default();
        pattern.length = 4;
        let mut runtime = MetropolixRuntime::default();
        let mut rng = rand::thread_rng();

        pattern.mode = PlayMode::Forward;
        runtime.stage = 3;
        assert_eq!(next_stage(&pattern, &mut runtime, &mut rng), 0);

        pattern.mode = PlayMode::Reverse;
        runtime.stage = 0;
        assert_eq!(next_stage(&pattern, &mut runtime, &mut rng), 3);
    }

    #[test]
    fn test_next_stage_pendulum_bounces() {
        let mut pattern = MetropolixPattern::default();
        pattern.length = 3;
        pattern.mode = PlayMode::Pendulum;
        let mut runtime = MetropolixRuntime::default();
        let mut rng = rand::thread_rng();

        let mut visits = vec![0usize];
        for _ in 0..6 {
            let next = next_stage(&pattern, &mut runtime, &mut rng);
            runtime.stage = next;
            visits.push(next);
        }
        assert_eq!(visits, vec![0, 1, 2, 1, 0, 1, 2]);
    }

    #[test]
    fn test_next_stage_random_in_range() {
        let mut pattern = MetropolixPattern::default();
        pattern.length = 5;
        pattern.mode = PlayMode::Random;
        let mut runtime = MetropolixRuntime::default();
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let next = next_stage(&pattern, &mut runtime, &mut rng);
            assert!(next < 5);
        }
    }

    #[test]
    fn test_slide_ramp_values() {
        let mut state = MetropolixState::new();
        {
            let pattern = &mut state.patterns[0];
            pattern.length = 2;
            pattern.root_note = 60;
            pattern.scale = Scale::Major;
            pattern.slide_time = 4;
            pattern.stages[0].note = 0; // pitch 60
            pattern.stages[0].slide = true;
            pattern.stages[1].note = 2; // pitch 64
        }

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);

        // Stage 0 ends at tick 240; ramp at 240..244, reset at 244
        let bends: Vec<(Tick, i16)> = events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::PitchBend { bend } => Some((e.tick, bend)),
                _ => None,
            })
            .collect();
        assert_eq!(
            bends,
            vec![
                (240, 0),
                (241, 4096),
                (242, 8192),
                (243, 12288),
                (244, 0)
            ]
        );
    }

    #[test]
    fn test_no_slide_without_flag() {
        let mut state = MetropolixState::new();
        state.patterns[0].length = 2;

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);
        assert!(!events
            .iter()
            .any(|e| matches!(e.kind, EventKind::PitchBend { .. })));
    }

    #[test]
    fn test_cycle_events_sorted() {
        let mut state = MetropolixState::new();
        {
            let pattern = &mut state.patterns[0];
            pattern.length = 4;
            pattern.slide_time = 8;
            for stage in pattern.stages.iter_mut() {
                stage.slide = true;
                stage.ratchets = 3;
                stage.pulse_count = 2;
            }
        }

        let mut rng = rand::thread_rng();
        let events = MetropolixDevice::generate_cycle(&mut state, 0, 0, &mut rng);
        assert!(events.windows(2).all(|w| w[0].tick <= w[1].tick));
    }

    #[test]
    fn test_faux_length() {
        let mut pattern = MetropolixPattern::default();
        pattern.length = 3;
        pattern.stages[0].pulse_count = 1;
        pattern.stages[1].pulse_count = 4;
        pattern.stages[2].pulse_count = 2;
        // Stages past the length don't count
        pattern.stages[3].pulse_count = 8;

        assert_eq!(pattern.faux_length_steps(), 7);
        assert_eq!(pattern.faux_length_ticks(), 7 * 240);
    }

    #[test]
    fn test_fill_until_covers_target() {
        let dev = MetropolixDevice::new();
        {
            let mut state = dev.state.lock().unwrap();
            state.patterns[0].length = 2;
        }
        // Cycle = 2 steps = 480 ticks; target forces multiple cycles
        dev.fill_until(2000);

        let marks = dev.queue.marks();
        assert!(marks.filled_until >= 2000);
        assert!(dev.queue.is_sorted());
    }

    #[test]
    fn test_queue_pattern_switch_resets_accumulators() {
        let dev = MetropolixDevice::new();
        {
            let mut state = dev.state.lock().unwrap();
            state.patterns[0].length = 1;
            state.patterns[0].stages[0].accumulator = 2;
            state.patterns[1].length = 1;
        }

        dev.fill_until(960); // four cycles, accumulator has advanced
        assert_ne!(dev.state.lock().unwrap().runtime.accum_offset[0], 0);

        dev.queue_pattern(1, 0);
        // Boundary is at tick 0 span end; queued content past it was wiped
        dev.fill_until(960);

        let state = dev.state.lock().unwrap();
        assert_eq!(state.playing, 1);
        assert_eq!(state.runtime.accum_offset[0], 0);
    }

    #[test]
    fn test_queue_pattern_boundary_on_faux_length() {
        let dev = MetropolixDevice::new();
        {
            let mut state = dev.state.lock().unwrap();
            // Faux length 3 steps = 720 ticks
            state.patterns[0].length = 3;
        }
        dev.fill_until(5000);
        dev.queue_pattern(2, 100);

        let marks = dev.queue.marks();
        assert_eq!(marks.next_pattern, Some(720));
        assert!(dev.queue.snapshot().iter().all(|e| e.tick < 720));
    }

    #[test]
    fn test_state_clamp() {
        let mut state = MetropolixState::new();
        state.patterns[0].length = 99;
        state.patterns[0].stages[0].probability = 200;
        state.patterns[0].stages[0].accumulator = -100;
        state.clamp();
        assert_eq!(state.patterns[0].length, NUM_STAGES);
        assert_eq!(state.patterns[0].stages[0].probability, 100);
        assert_eq!(state.patterns[0].stages[0].accumulator, -4);
    }

    #[test]
    fn test_scale_tables() {
        assert_eq!(Scale::ALL.len(), 22);
        assert_eq!(Scale::Chromatic.intervals().len(), 12);
        assert_eq!(Scale::Major.intervals(), &[0, 2, 4, 5, 7, 9, 11, 12]);
        assert_eq!(Scale::WholeTone.intervals(), &[0, 2, 4, 6, 8, 10, 12]);
    }
}
