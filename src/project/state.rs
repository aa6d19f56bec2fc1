// Project state tree - the serialized form of everything worth keeping,
// plus capture/apply against a live engine

use crate::sequencer::device::{DeviceType, TrackDevice};
use crate::sequencer::drum::DrumDevice;
use crate::sequencer::engine::Engine;
use crate::sequencer::metropolix::MetropolixDevice;
use crate::sequencer::piano::PianoRollDevice;
use crate::sequencer::track::{TrackSettings, TrackState, NUM_TRACKS};
use crate::sequencer::transport::{MAX_TEMPO, MIN_TEMPO};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The whole persisted state: tempo plus the eight tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub tempo: u16,
    pub tracks: Vec<TrackState>,
}

impl ProjectState {
    /// Clamp every loaded value into its documented range. Runs on load,
    /// before anything touches the live engine.
    pub fn clamp(&mut self) {
        self.tempo = self.tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.tracks.resize_with(NUM_TRACKS, TrackState::default);
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.clamp(i);
        }
    }
}

impl Default for ProjectState {
    fn default() -> Self {
        let mut state = Self {
            tempo: 120,
            tracks: Vec::new(),
        };
        state.clamp();
        state
    }
}

/// Capture the engine's current state for saving
pub fn capture(engine: &Engine) -> ProjectState {
    let tracks = engine
        .tracks()
        .iter()
        .map(|track| {
            let settings = track.settings();
            let device = track.device();
            let mut state = TrackState {
                name: settings.name,
                channel: settings.channel,
                port_name: settings.port_name,
                muted: settings.muted,
                solo: settings.solo,
                kit: settings.kit,
                device_type: device.device_type(),
                drum: None,
                piano: None,
                metropolix: None,
            };
            match &device {
                TrackDevice::Empty => {}
                TrackDevice::Drum(d) => state.drum = Some(d.snapshot()),
                TrackDevice::Piano(d) => state.piano = Some(d.snapshot()),
                TrackDevice::Metropolix(d) => state.metropolix = Some(d.snapshot()),
            }
            state
        })
        .collect();

    ProjectState {
        tempo: engine.clock().tempo(),
        tracks,
    }
}

/// Replace the engine's whole state. The transport is stopped first;
/// queues, pending recordings and accumulator runtime start from defaults.
pub fn apply(engine: &Engine, mut state: ProjectState) {
    engine.stop();
    state.clamp();
    engine.set_tempo(state.tempo);

    for (i, track_state) in state.tracks.into_iter().enumerate() {
        engine.set_track_settings(
            i,
            TrackSettings {
                name: track_state.name.clone(),
                channel: track_state.channel,
                port_name: track_state.port_name.clone(),
                muted: track_state.muted,
                solo: track_state.solo,
                kit: track_state.kit.clone(),
            },
        );

        let device = match track_state.device_type {
            DeviceType::None => TrackDevice::Empty,
            DeviceType::Drum => TrackDevice::Drum(Arc::new(DrumDevice::from_state(
                track_state.drum.unwrap_or_default(),
                engine.clock().clone(),
            ))),
            DeviceType::Piano => TrackDevice::Piano(Arc::new(PianoRollDevice::from_state(
                track_state.piano.unwrap_or_default(),
                engine.clock().clone(),
            ))),
            DeviceType::Metropolix => TrackDevice::Metropolix(Arc::new(
                MetropolixDevice::from_state(track_state.metropolix.unwrap_or_default()),
            )),
        };
        engine.install_device(i, device);
    }
}
