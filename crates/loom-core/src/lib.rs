pub mod bank;
pub mod config;
pub mod decode;
pub mod diagnostics;
pub mod events;
pub mod fixtures;
pub mod library;
pub mod mixdown;
pub mod model;
pub mod playback;
pub mod studio;

pub use bank::{
    BankSnapshot, OccupiedSlot, SlotError, SlotSnapshot, SlotStatus, TrackBank, TrackSlot,
};
pub use config::{BounceConfig, DiagnosticsConfig, LibraryConfig, LoomConfig};
pub use decode::{DecodedTake, decode_take};
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use events::{EventBus, LoomEvent};
pub use library::{LibraryError, RecordingLibrary};
pub use mixdown::{BounceError, MixSession, MixdownEngine, OutputRequest, PreparedBounce};
pub use model::{AudioSource, Recording, TRACK_COUNT};
pub use playback::{HeadlessBackend, PlaybackBackend, PlaybackHandle, PlaybackState};
pub use studio::{Studio, StudioStatus};
