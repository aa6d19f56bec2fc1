// Transport - Playback control and the global tick/time model
// Wall-clock time is the authority: ticks are derived from (now - t0)

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Pulses (ticks) per quarter note
pub const PPQ: u64 = 960;

/// Ticks per sixteenth-note step
pub const TICKS_PER_STEP: u64 = PPQ / 4;

/// Absolute tick position, 0 at play-start
pub type Tick = u64;

pub const MIN_TEMPO: u16 = 20;
pub const MAX_TEMPO: u16 = 300;

/// Inner transport state, guarded by a single mutex
#[derive(Debug, Clone, Copy)]
struct TransportState {
    playing: bool,
    tempo: u16,
    /// Wall-clock anchor recorded at Play
    t0: Instant,
    /// Cached tick, refreshed by the queue manager's UI ticker
    tick: Tick,
}

/// Shared clock: play/stop state, tempo, and tick <-> wall-time conversion.
///
/// A tempo change is stored immediately but only affects timing from the
/// next Play, because `t0` is re-anchored there.
#[derive(Debug)]
pub struct Clock {
    state: Mutex<TransportState>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState {
                playing: false,
                tempo: 120,
                t0: Instant::now(),
                tick: 0,
            }),
        }
    }

    /// Start playback: re-anchor t0 and reset the tick to 0.
    /// Returns false if already playing (no-op).
    pub fn play(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.playing {
            return false;
        }
        s.playing = true;
        s.t0 = Instant::now();
        s.tick = 0;
        true
    }

    /// Stop playback. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        if !s.playing {
            return false;
        }
        s.playing = false;
        true
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// Set tempo, clamped to [20, 300] BPM. Takes effect at the next Play.
    pub fn set_tempo(&self, bpm: u16) {
        let mut s = self.state.lock().unwrap();
        s.tempo = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
    }

    pub fn tempo(&self) -> u16 {
        self.state.lock().unwrap().tempo
    }

    /// Duration of one tick at the current tempo
    pub fn tick_duration(&self) -> Duration {
        let tempo = self.state.lock().unwrap().tempo;
        Self::tick_duration_at(tempo)
    }

    fn tick_duration_at(tempo: u16) -> Duration {
        // 60s / tempo / PPQ, computed in nanoseconds to keep precision
        Duration::from_nanos(60_000_000_000 / (tempo as u64 * PPQ))
    }

    /// Tick corresponding to a wall-clock instant (0 when stopped or before t0)
    pub fn time_to_tick(&self, when: Instant) -> Tick {
        let s = self.state.lock().unwrap();
        if !s.playing || when < s.t0 {
            return 0;
        }
        let elapsed = when - s.t0;
        (elapsed.as_nanos() / Self::tick_duration_at(s.tempo).as_nanos()) as Tick
    }

    /// Current tick derived from the wall clock
    pub fn now_tick(&self) -> Tick {
        self.time_to_tick(Instant::now())
    }

    /// Wall-clock instant at which a tick is due
    pub fn tick_to_time(&self, tick: Tick) -> Instant {
        let s = self.state.lock().unwrap();
        s.t0 + Duration::from_nanos(Self::tick_duration_at(s.tempo).as_nanos() as u64 * tick)
    }

    /// Cached tick last published by the queue manager (cheap read for UI/LEDs)
    pub fn cached_tick(&self) -> Tick {
        self.state.lock().unwrap().tick
    }

    pub fn set_cached_tick(&self, tick: Tick) {
        self.state.lock().unwrap().tick = tick;
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_stop() {
        let clock = Clock::new();
        assert!(!clock.is_playing());

        assert!(clock.play());
        assert!(clock.is_playing());
        assert!(!clock.play()); // already playing: no-op

        assert!(clock.stop());
        assert!(!clock.is_playing());
        assert!(!clock.stop());
    }

    #[test]
    fn test_tempo_clamping() {
        let clock = Clock::new();
        assert_eq!(clock.tempo(), 120);

        clock.set_tempo(10);
        assert_eq!(clock.tempo(), 20);

        clock.set_tempo(999);
        assert_eq!(clock.tempo(), 300);

        clock.set_tempo(140);
        assert_eq!(clock.tempo(), 140);
    }

    #[test]
    fn test_tick_duration() {
        let clock = Clock::new();
        // At 120 BPM: 60s / 120 / 960 = 520833ns per tick
        clock.set_tempo(120);
        assert_eq!(clock.tick_duration().as_nanos(), 520_833);
    }

    #[test]
    fn test_time_to_tick_while_stopped() {
        let clock = Clock::new();
        assert_eq!(clock.time_to_tick(Instant::now()), 0);
    }

    #[test]
    fn test_time_tick_round_trip() {
        let clock = Clock::new();
        clock.set_tempo(120);
        clock.play();

        // One beat (960 ticks) at 120 BPM is 0.5s after t0
        let beat_time = clock.tick_to_time(PPQ);
        let tick = clock.time_to_tick(beat_time);
        assert_eq!(tick, PPQ);

        // Four beats = one bar
        let bar_time = clock.tick_to_time(4 * PPQ);
        assert_eq!(clock.time_to_tick(bar_time), 4 * PPQ);
    }

    #[test]
    fn test_play_resets_tick() {
        let clock = Clock::new();
        clock.set_cached_tick(5000);
        clock.play();
        assert_eq!(clock.cached_tick(), 0);
    }

    #[test]
    fn test_step_constant() {
        // Sixteenth-note step at PPQ 960
        assert_eq!(TICKS_PER_STEP, 240);
    }
}
