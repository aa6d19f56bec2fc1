// Engine - owns the tracks and runs the scheduler: a queue-manager thread
// that fills device queues ahead of the playhead, a dispatcher thread that
// sleeps until the globally-earliest event is due and sends it through the
// router, and an input loop that echoes and records live MIDI.

use crate::midi::controller::NoteEvent;
use crate::midi::event::{Event, EventKind};
use crate::midi::router::MidiRouter;
use crate::sequencer::device::{DeviceType, OnQueueChange, TrackDevice};
use crate::sequencer::drum::{DrumDevice, NUM_LANES};
use crate::sequencer::kit::get_kit;
use crate::sequencer::metropolix::MetropolixDevice;
use crate::sequencer::piano::PianoRollDevice;
use crate::sequencer::session::Session;
use crate::sequencer::track::{Track, TrackSettings, NUM_TRACKS};
use crate::sequencer::transport::{Clock, Tick, PPQ};
use crossbeam_channel::{bounded, tick, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How far ahead of the playhead queues are filled (~100ms at 120 BPM)
pub const LOOKAHEAD_TICKS: Tick = PPQ / 2;

/// Queue-manager fill cadence
const FILL_INTERVAL: Duration = Duration::from_millis(50);

/// UI/LED refresh cadence (30 Hz)
const UI_INTERVAL: Duration = Duration::from_millis(33);

/// How long a drum preview note rings before its note-off
const PREVIEW_NOTE_MS: u64 = 100;

/// State shared between the engine handle and its threads
struct Core {
    clock: Arc<Clock>,
    tracks: Arc<Vec<Track>>,
    router: Arc<MidiRouter>,
    /// Single-slot coalescing wake signals; senders try-send and drop on full
    fill_tx: Sender<()>,
    dispatch_tx: Sender<()>,
    update_tx: Sender<()>,
    /// Track receiving UI/keyboard input, None = session focus
    focused: Mutex<Option<usize>>,
}

impl Core {
    /// Wake both loops: the queue manager to refill, the dispatcher to
    /// re-peek because the earliest event may have changed
    fn interrupt(&self) {
        let _ = self.fill_tx.try_send(());
        let _ = self.dispatch_tx.try_send(());
    }

    fn notify_update(&self) {
        let _ = self.update_tx.try_send(());
    }

    /// Fill every device queue up to now + lookahead
    fn fill_queues(&self) {
        let target = self.clock.now_tick() + LOOKAHEAD_TICKS;
        for track in self.tracks.iter() {
            track.device().fill_until(target);
        }
    }

    /// Drain pending drum preview taps and play them through the router
    fn drain_previews(&self) {
        for track in self.tracks.iter() {
            let device = track.device();
            let Some(drum) = device.as_drum() else {
                continue;
            };
            for slot in drum.preview_events().try_iter() {
                if slot >= NUM_LANES {
                    continue;
                }
                let settings = track.settings();
                let note = get_kit(&settings.kit).notes[slot];
                self.router.send(
                    &settings.port_name,
                    settings.channel,
                    EventKind::NoteOn {
                        note,
                        velocity: 100,
                    },
                );

                // Deferred note-off, off the hot path
                let router = self.router.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(PREVIEW_NOTE_MS));
                    router.send(
                        &settings.port_name,
                        settings.channel,
                        EventKind::NoteOff { note },
                    );
                });
            }
        }
    }

    /// Live MIDI input: echo immediately on the focused track's output,
    /// then forward to the focused device for recording
    fn handle_note(&self, note: u8, velocity: u8) {
        let kind = if velocity == 0 {
            EventKind::NoteOff { note }
        } else {
            EventKind::NoteOn { note, velocity }
        };
        let tick = if self.clock.is_playing() {
            self.clock.now_tick()
        } else {
            0
        };

        let Some(idx) = *self.focused.lock().unwrap() else {
            return;
        };
        let Some(track) = self.tracks.get(idx) else {
            return;
        };

        // Echo bypasses the queue for latency
        let settings = track.settings();
        self.router.send(&settings.port_name, settings.channel, kind);

        track.device().handle_midi(Event::new(tick, kind));
        self.notify_update();
    }
}

/// Pick the earliest event across all audible devices.
/// Ties resolve to the lowest track index. Muted tracks are skipped, and
/// when any track is soloed the non-solo tracks are skipped too.
fn next_event_across(tracks: &[Track]) -> Option<(usize, Event)> {
    let any_solo = tracks.iter().any(|t| t.is_solo());

    let mut best: Option<(usize, Event)> = None;
    for (idx, track) in tracks.iter().enumerate() {
        let settings = track.settings();
        if settings.muted || (any_solo && !settings.solo) {
            continue;
        }
        if let Some(event) = track.device().peek_next_event() {
            if best.map_or(true, |(_, b)| event.tick < b.tick) {
                best = Some((idx, event));
            }
        }
    }
    best
}

pub struct Engine {
    core: Arc<Core>,
    fill_rx: Receiver<()>,
    dispatch_rx: Receiver<()>,
    update_rx: Receiver<()>,
    stop_tx: Option<Sender<()>>,
    stop_rx: Receiver<()>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Engine {
    pub fn new(clock: Arc<Clock>, router: Arc<MidiRouter>) -> Self {
        let tracks: Arc<Vec<Track>> = Arc::new((0..NUM_TRACKS).map(Track::new).collect());
        let (fill_tx, fill_rx) = bounded(1);
        let (dispatch_tx, dispatch_rx) = bounded(1);
        let (update_tx, update_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        Self {
            core: Arc::new(Core {
                clock,
                tracks,
                router,
                fill_tx,
                dispatch_tx,
                update_tx,
                focused: Mutex::new(None),
            }),
            fill_rx,
            dispatch_rx,
            update_rx,
            stop_tx: Some(stop_tx),
            stop_rx,
            handles: Vec::new(),
        }
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.core.clock
    }

    pub fn router(&self) -> &Arc<MidiRouter> {
        &self.core.router
    }

    pub fn tracks(&self) -> &Arc<Vec<Track>> {
        &self.core.tracks
    }

    pub fn track(&self, idx: usize) -> Option<&Track> {
        self.core.tracks.get(idx)
    }

    pub fn session(&self) -> Session {
        Session::new(self.core.tracks.clone(), self.core.clock.clone())
    }

    /// UI notification stream (30 Hz ticks and edit events, coalesced)
    pub fn updates(&self) -> Receiver<()> {
        self.update_rx.clone()
    }

    // --- Transport ---

    /// Start playback: reset the clock, wipe every queue, force a fill
    pub fn play(&self) {
        if !self.core.clock.play() {
            return;
        }
        for track in self.core.tracks.iter() {
            track.device().clear_queue();
        }
        info!("transport: play");
        self.core.interrupt();
    }

    /// Stop playback: queues are wiped, the long-running threads keep going
    pub fn stop(&self) {
        if !self.core.clock.stop() {
            return;
        }
        for track in self.core.tracks.iter() {
            track.device().clear_queue();
        }
        info!("transport: stop");
        self.core.interrupt();
    }

    pub fn toggle_play(&self) {
        if self.core.clock.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    pub fn set_tempo(&self, bpm: u16) {
        self.core.clock.set_tempo(bpm);
    }

    // --- Focus & input ---

    pub fn focus_track(&self, idx: usize) {
        if idx < NUM_TRACKS {
            *self.core.focused.lock().unwrap() = Some(idx);
        }
    }

    pub fn focus_session(&self) {
        *self.core.focused.lock().unwrap() = None;
    }

    pub fn focused_track(&self) -> Option<usize> {
        *self.core.focused.lock().unwrap()
    }

    pub fn handle_note(&self, note: u8, velocity: u8) {
        self.core.handle_note(note, velocity);
    }

    // --- Device management (only while idle) ---

    /// Put a fresh device of the given kind on a track
    pub fn set_device_type(&self, track_idx: usize, device_type: DeviceType) {
        let Some(track) = self.core.tracks.get(track_idx) else {
            return;
        };

        let device = match device_type {
            DeviceType::None => TrackDevice::Empty,
            DeviceType::Drum => {
                TrackDevice::Drum(Arc::new(DrumDevice::new(self.core.clock.clone())))
            }
            DeviceType::Piano => {
                TrackDevice::Piano(Arc::new(PianoRollDevice::new(self.core.clock.clone())))
            }
            DeviceType::Metropolix => TrackDevice::Metropolix(Arc::new(MetropolixDevice::new())),
        };
        device.set_on_queue_change(self.queue_change_callback());
        track.set_device(device);
    }

    /// Install an already-built device (project load path)
    pub fn install_device(&self, track_idx: usize, device: TrackDevice) {
        let Some(track) = self.core.tracks.get(track_idx) else {
            return;
        };
        device.set_on_queue_change(self.queue_change_callback());
        track.set_device(device);
    }

    /// Callback that edits fire to wake the scheduler
    pub fn queue_change_callback(&self) -> OnQueueChange {
        let core = self.core.clone();
        Arc::new(move || core.interrupt())
    }

    pub fn set_track_settings(&self, track_idx: usize, settings: TrackSettings) {
        if let Some(track) = self.core.tracks.get(track_idx) {
            track.set_settings(settings);
        }
    }

    // --- Runtime threads ---

    /// Spawn the queue manager and dispatcher. Called once at startup;
    /// the threads run for the process life and idle while stopped.
    pub fn start_runtime(&mut self) {
        let core = self.core.clone();
        let fill_rx = self.fill_rx.clone();
        let stop_rx = self.stop_rx.clone();
        self.handles.push(
            thread::Builder::new()
                .name("queue-manager".into())
                .spawn(move || queue_manager_loop(core, fill_rx, stop_rx))
                .expect("spawn queue manager"),
        );

        let core = self.core.clone();
        let dispatch_rx = self.dispatch_rx.clone();
        let stop_rx = self.stop_rx.clone();
        self.handles.push(
            thread::Builder::new()
                .name("dispatcher".into())
                .spawn(move || dispatcher_loop(core, dispatch_rx, stop_rx))
                .expect("spawn dispatcher"),
        );
    }

    /// Consume a keyboard controller's note stream on its own thread
    pub fn attach_note_input(&mut self, notes: Receiver<NoteEvent>) {
        let core = self.core.clone();
        let stop_rx = self.stop_rx.clone();
        self.handles.push(
            thread::Builder::new()
                .name("midi-input".into())
                .spawn(move || input_loop(core, notes, stop_rx))
                .expect("spawn midi input"),
        );
    }

    /// Stop all runtime threads and wait for them
    pub fn shutdown(&mut self) {
        // Dropping the sender disconnects every stop receiver
        self.stop_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Producer loop: keeps queues filled ahead of the playhead and publishes
/// the cached tick for the UI at 30 Hz. Produces no I/O of its own (drum
/// previews excepted, which are user gestures, not scheduled events).
fn queue_manager_loop(core: Arc<Core>, interrupt_rx: Receiver<()>, stop_rx: Receiver<()>) {
    let fill_tick = tick(FILL_INTERVAL);
    let ui_tick = tick(UI_INTERVAL);

    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => return,
            recv(interrupt_rx) -> msg => {
                if msg.is_err() {
                    return;
                }
                // A queue changed: refill immediately
                core.fill_queues();
            }
            recv(fill_tick) -> _ => {
                core.fill_queues();
                core.drain_previews();
            }
            recv(ui_tick) -> _ => {
                let now = core.clock.now_tick();
                core.clock.set_cached_tick(now);
                core.notify_update();
            }
        }
    }
}

/// Consumer loop: repeatedly picks the earliest queued event, sleeps until
/// its wall time, then pops and sends it. Late events are still emitted.
fn dispatcher_loop(core: Arc<Core>, interrupt_rx: Receiver<()>, stop_rx: Receiver<()>) {
    loop {
        let Some((track_idx, event)) = next_event_across(&core.tracks) else {
            if idle_wait(&stop_rx) {
                return;
            }
            continue;
        };

        if !core.clock.is_playing() {
            if idle_wait(&stop_rx) {
                return;
            }
            continue;
        }

        // Sleep until the event is due, interruptible by stop and by a
        // queue change (the earliest event may have moved)
        let due = core.clock.tick_to_time(event.tick);
        let now = Instant::now();
        if due > now {
            let mut repeek = false;
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => return,
                recv(interrupt_rx) -> msg => {
                    if msg.is_err() {
                        return;
                    }
                    repeek = true;
                }
                default(due - now) => {}
            }
            if repeek {
                continue;
            }
        }

        let track = &core.tracks[track_idx];
        let Some(mut event) = track.device().pop_next_event() else {
            continue;
        };
        let settings = track.settings();

        // Drum events carry slot indices; translate through the kit
        if track.device().device_type() == DeviceType::Drum {
            let kit = get_kit(&settings.kit);
            event.kind = match event.kind {
                EventKind::Trigger { note, velocity } if (note as usize) < NUM_LANES => {
                    EventKind::Trigger {
                        note: kit.notes[note as usize],
                        velocity,
                    }
                }
                other => other,
            };
        }

        debug!(
            track = track_idx,
            tick = event.tick,
            channel = settings.channel,
            "dispatch {:?}",
            event.kind
        );
        core.router
            .send(&settings.port_name, settings.channel, event.kind);
    }
}

/// 1ms idle sleep that doubles as the stop check. True = shut down.
fn idle_wait(stop_rx: &Receiver<()>) -> bool {
    !matches!(
        stop_rx.recv_timeout(Duration::from_millis(1)),
        Err(crossbeam_channel::RecvTimeoutError::Timeout)
    )
}

/// Fan-in loop for keyboard input
fn input_loop(core: Arc<Core>, notes: Receiver<NoteEvent>, stop_rx: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => return,
            recv(notes) -> msg => {
                let Ok(event) = msg else {
                    // Controller disconnected
                    return;
                };
                core.handle_note(event.note, event.velocity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(Arc::new(Clock::new()), Arc::new(MidiRouter::new()))
    }

    #[test]
    fn test_earliest_event_selection_and_ties() {
        let eng = engine();
        eng.set_device_type(0, DeviceType::Drum);
        eng.set_device_type(1, DeviceType::Drum);

        // Track 1 has an earlier event than track 0
        let d0 = eng.track(0).unwrap().device();
        let d1 = eng.track(1).unwrap().device();
        d0.as_drum().unwrap().toggle_step(0, 4); // tick 960
        d1.as_drum().unwrap().toggle_step(0, 1); // tick 240
        d0.fill_until(3840);
        d1.fill_until(3840);

        let (idx, event) = next_event_across(&eng.core.tracks).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(event.tick, 240);

        // Equal ticks: the lower track index wins
        d0.as_drum().unwrap().toggle_step(0, 1);
        d0.fill_until(3840);
        let (idx, event) = next_event_across(&eng.core.tracks).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(event.tick, 240);
    }

    #[test]
    fn test_mute_hides_queue_from_dispatcher() {
        let eng = engine();
        eng.set_device_type(0, DeviceType::Drum);
        let dev = eng.track(0).unwrap().device();
        dev.as_drum().unwrap().toggle_step(0, 0);
        dev.fill_until(3840);

        assert!(next_event_across(&eng.core.tracks).is_some());
        eng.track(0).unwrap().toggle_mute();
        assert!(next_event_across(&eng.core.tracks).is_none());

        // Un-mute: the events were never dropped
        eng.track(0).unwrap().toggle_mute();
        assert!(next_event_across(&eng.core.tracks).is_some());
    }

    #[test]
    fn test_solo_sidelines_other_tracks() {
        let eng = engine();
        eng.set_device_type(0, DeviceType::Drum);
        eng.set_device_type(1, DeviceType::Drum);
        let d0 = eng.track(0).unwrap().device();
        let d1 = eng.track(1).unwrap().device();
        d0.as_drum().unwrap().toggle_step(0, 0);
        d1.as_drum().unwrap().toggle_step(0, 1);
        d0.fill_until(3840);
        d1.fill_until(3840);

        eng.track(1).unwrap().toggle_solo();
        let (idx, _) = next_event_across(&eng.core.tracks).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_play_wipes_queues() {
        let eng = engine();
        eng.set_device_type(0, DeviceType::Drum);
        let dev = eng.track(0).unwrap().device();
        dev.as_drum().unwrap().toggle_step(0, 0);
        dev.fill_until(3840);
        assert!(dev.peek_next_event().is_some());

        eng.play();
        assert!(eng.clock().is_playing());
        assert!(dev.peek_next_event().is_none());

        eng.stop();
        assert!(!eng.clock().is_playing());
    }

    #[test]
    fn test_edit_wakes_scheduler() {
        let eng = engine();
        eng.set_device_type(0, DeviceType::Drum);
        // Drain any pending signal
        while eng.fill_rx.try_recv().is_ok() {}

        let dev = eng.track(0).unwrap().device();
        dev.fill_until(3840); // establishes the schedule
        dev.as_drum().unwrap().toggle_step(0, 0);

        // The edit resynced the queue and signalled the interrupt channel
        assert!(eng.fill_rx.try_recv().is_ok());
    }

    #[test]
    fn test_handle_note_records_to_focused_device() {
        let eng = engine();
        eng.set_device_type(2, DeviceType::Piano);
        eng.focus_track(2);
        eng.clock().play();
        eng.track(2).unwrap().device().toggle_recording();

        eng.handle_note(64, 90);
        eng.handle_note(64, 0);

        let piano = eng.track(2).unwrap().device();
        let piano = piano.as_piano().unwrap();
        let state = piano.snapshot();
        assert_eq!(state.patterns[0].notes.len(), 1);
        assert_eq!(state.patterns[0].notes[0].pitch, 64);
    }

    #[test]
    fn test_dispatch_order_across_devices() {
        let eng = engine();
        eng.set_device_type(0, DeviceType::Drum);
        eng.set_device_type(1, DeviceType::Drum);
        let d0 = eng.track(0).unwrap().device();
        let d1 = eng.track(1).unwrap().device();
        // Interleaved hits: track 0 at steps 0 and 2, track 1 at 1 and 3
        d0.as_drum().unwrap().toggle_step(0, 0);
        d0.as_drum().unwrap().toggle_step(0, 2);
        d1.as_drum().unwrap().toggle_step(0, 1);
        d1.as_drum().unwrap().toggle_step(0, 3);
        d0.fill_until(960);
        d1.fill_until(960);

        // Simulate the dispatcher scan-pop cycle
        let mut popped = Vec::new();
        while let Some((idx, _)) = next_event_across(&eng.core.tracks) {
            let event = eng.track(idx).unwrap().device().pop_next_event().unwrap();
            popped.push((idx, event.tick));
            if popped.len() >= 8 {
                break;
            }
        }

        // Global tick order across both queues
        assert!(popped.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(popped[0], (0, 0));
        assert_eq!(popped[1], (1, 240));
    }

    #[test]
    fn test_runtime_threads_start_and_shutdown() {
        let mut eng = engine();
        eng.start_runtime();
        thread::sleep(Duration::from_millis(5));
        eng.shutdown();
        // A second shutdown is a no-op
        eng.shutdown();
    }
}
