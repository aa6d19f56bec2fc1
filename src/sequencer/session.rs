// Session - the clip launcher. A pure controller: it never owns events,
// it only asks devices to switch patterns and reads their state for display.

use crate::sequencer::device::NUM_PATTERNS;
use crate::sequencer::track::Track;
use crate::sequencer::transport::Clock;
use std::sync::Arc;

/// Display state of one track's clip column
#[derive(Debug, Clone)]
pub struct ClipColumn {
    pub current_pattern: usize,
    pub next_pattern: Option<usize>,
    pub content_mask: Vec<bool>,
}

pub struct Session {
    tracks: Arc<Vec<Track>>,
    clock: Arc<Clock>,
}

impl Session {
    pub fn new(tracks: Arc<Vec<Track>>, clock: Arc<Clock>) -> Self {
        Self { tracks, clock }
    }

    /// Current tick to quantize a launch against (0 while stopped, so the
    /// switch lands on the first boundary)
    fn launch_tick(&self) -> u64 {
        self.clock.now_tick()
    }

    /// Launch one clip: ask the track's device to switch at the next boundary
    pub fn launch_clip(&self, track_idx: usize, pattern: usize) {
        if pattern >= NUM_PATTERNS {
            return;
        }
        let Some(track) = self.tracks.get(track_idx) else {
            return;
        };
        track.device().queue_pattern(pattern, self.launch_tick());
    }

    /// Launch a scene: the same pattern row on every track
    pub fn launch_scene(&self, row: usize) {
        if row >= NUM_PATTERNS {
            return;
        }
        let at_tick = self.launch_tick();
        for track in self.tracks.iter() {
            track.device().queue_pattern(row, at_tick);
        }
    }

    /// Per-track display snapshot for the session grid
    pub fn columns(&self) -> Vec<ClipColumn> {
        self.tracks
            .iter()
            .map(|track| {
                let device = track.device();
                ClipColumn {
                    current_pattern: device.current_pattern(),
                    next_pattern: device.next_pattern(),
                    content_mask: device.content_mask(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::device::TrackDevice;
    use crate::sequencer::drum::DrumDevice;
    use crate::sequencer::track::NUM_TRACKS;

    fn session() -> Session {
        let clock = Arc::new(Clock::new());
        let tracks: Vec<Track> = (0..NUM_TRACKS).map(Track::new).collect();
        tracks[0].set_device(TrackDevice::Drum(Arc::new(DrumDevice::new(clock.clone()))));
        tracks[1].set_device(TrackDevice::Drum(Arc::new(DrumDevice::new(clock.clone()))));
        Session::new(Arc::new(tracks), clock)
    }

    #[test]
    fn test_launch_clip_queues_pattern() {
        let s = session();
        s.launch_clip(0, 5);

        let columns = s.columns();
        assert_eq!(columns[0].next_pattern, Some(5));
        assert_eq!(columns[1].next_pattern, None);
    }

    #[test]
    fn test_launch_scene_hits_every_track() {
        let s = session();
        s.launch_scene(3);

        let columns = s.columns();
        assert_eq!(columns[0].next_pattern, Some(3));
        assert_eq!(columns[1].next_pattern, Some(3));
        // Empty tracks stay inert
        assert_eq!(columns[2].next_pattern, None);
    }

    #[test]
    fn test_out_of_range_launch_ignored() {
        let s = session();
        s.launch_clip(0, NUM_PATTERNS);
        s.launch_clip(99, 0);
        assert_eq!(s.columns()[0].next_pattern, None);
    }

    #[test]
    fn test_columns_shape() {
        let s = session();
        let columns = s.columns();
        assert_eq!(columns.len(), NUM_TRACKS);
        assert_eq!(columns[0].content_mask.len(), NUM_PATTERNS);
    }
}
