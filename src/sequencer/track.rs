// Track - one of the eight output slots: routing settings plus a device

use crate::sequencer::device::{DeviceType, TrackDevice};
use crate::sequencer::drum::DrumState;
use crate::sequencer::kit::DEFAULT_KIT;
use crate::sequencer::metropolix::MetropolixState;
use crate::sequencer::piano::PianoState;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

pub const NUM_TRACKS: usize = 8;

/// Routing and mix settings for a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSettings {
    pub name: String,
    /// MIDI output channel, 1..=16
    pub channel: u8,
    /// Output port; empty means the router's default port
    pub port_name: String,
    pub muted: bool,
    pub solo: bool,
    /// Drum kit used to translate slot indices to notes
    pub kit: String,
}

impl TrackSettings {
    pub fn new(index: usize) -> Self {
        Self {
            name: String::new(),
            channel: (index as u8 + 1).min(16),
            port_name: String::new(),
            muted: false,
            solo: false,
            kit: DEFAULT_KIT.to_string(),
        }
    }
}

/// A live track: settings and device each behind their own lock so the
/// dispatcher can read settings while the UI swaps devices.
pub struct Track {
    settings: RwLock<TrackSettings>,
    device: RwLock<TrackDevice>,
}

impl Track {
    pub fn new(index: usize) -> Self {
        Self {
            settings: RwLock::new(TrackSettings::new(index)),
            device: RwLock::new(TrackDevice::Empty),
        }
    }

    pub fn settings(&self) -> TrackSettings {
        self.settings.read().unwrap().clone()
    }

    pub fn set_settings(&self, settings: TrackSettings) {
        let mut s = self.settings.write().unwrap();
        *s = settings;
        s.channel = s.channel.clamp(1, 16);
    }

    /// Cheap clone of the device handle (Arc inside)
    pub fn device(&self) -> TrackDevice {
        self.device.read().unwrap().clone()
    }

    /// Swap the device. Only done while the transport is idle.
    pub fn set_device(&self, device: TrackDevice) {
        *self.device.write().unwrap() = device;
    }

    pub fn set_channel(&self, channel: u8) {
        self.settings.write().unwrap().channel = channel.clamp(1, 16);
    }

    pub fn set_port_name(&self, port_name: &str) {
        self.settings.write().unwrap().port_name = port_name.to_string();
    }

    pub fn set_kit(&self, kit: &str) {
        self.settings.write().unwrap().kit = kit.to_string();
    }

    pub fn toggle_mute(&self) {
        let mut s = self.settings.write().unwrap();
        s.muted = !s.muted;
    }

    pub fn toggle_solo(&self) {
        let mut s = self.settings.write().unwrap();
        s.solo = !s.solo;
    }

    pub fn is_muted(&self) -> bool {
        self.settings.read().unwrap().muted
    }

    pub fn is_solo(&self) -> bool {
        self.settings.read().unwrap().solo
    }
}

/// Serialized form of one track: settings plus the state of whichever
/// device kind it carries
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackState {
    pub name: String,
    pub channel: u8,
    #[serde(default)]
    pub port_name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub kit: String,
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drum: Option<DrumState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piano: Option<PianoState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metropolix: Option<MetropolixState>,
}

impl TrackState {
    /// Clamp loaded values, matching the runtime invariants
    pub fn clamp(&mut self, index: usize) {
        if self.channel == 0 || self.channel > 16 {
            self.channel = (index as u8 + 1).min(16);
        }
        if self.kit.is_empty() {
            self.kit = DEFAULT_KIT.to_string();
        }

        // Only the state matching the device type survives a load
        match self.device_type {
            DeviceType::None => {
                self.drum = None;
                self.piano = None;
                self.metropolix = None;
            }
            DeviceType::Drum => {
                let mut drum = self.drum.take().unwrap_or_default();
                drum.clamp();
                self.drum = Some(drum);
                self.piano = None;
                self.metropolix = None;
            }
            DeviceType::Piano => {
                let mut piano = self.piano.take().unwrap_or_default();
                piano.clamp();
                self.piano = Some(piano);
                self.drum = None;
                self.metropolix = None;
            }
            DeviceType::Metropolix => {
                let mut metropolix = self.metropolix.take().unwrap_or_default();
                metropolix.clamp();
                self.metropolix = Some(metropolix);
                self.drum = None;
                self.piano = None;
            }
        }
    }
}
