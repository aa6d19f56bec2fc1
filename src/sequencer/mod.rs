// Sequencer core: transport, device queues, the three engine devices,
// tracks, the session launcher and the runtime engine

pub mod device;
pub mod drum;
pub mod engine;
pub mod kit;
pub mod metropolix;
pub mod piano;
pub mod queue;
pub mod session;
pub mod track;
pub mod transport;

pub use device::{DeviceType, TrackDevice, NUM_PATTERNS};
pub use drum::{DrumDevice, DrumState};
pub use engine::{Engine, LOOKAHEAD_TICKS};
pub use kit::{get_kit, kit_names, DrumKit};
pub use metropolix::{MetropolixDevice, MetropolixState, Scale};
pub use piano::{PianoRollDevice, PianoState};
pub use queue::EventQueue;
pub use session::Session;
pub use track::{Track, TrackSettings, NUM_TRACKS};
pub use transport::{Clock, Tick, PPQ, TICKS_PER_STEP};
