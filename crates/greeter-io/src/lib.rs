//! greeter-io: adapters for the greeter's external collaborators.
//!
//! Every call here is fallible; the daemon turns errors into degraded
//! behavior (no detections, silent lines, unrecorded stats) and logs them.

pub mod audio;
pub mod detector;
pub mod stats;

pub use audio::{AudioError, AudioOutput, CommandAudio, Playback};
pub use detector::{CommandDetector, Detector, DetectorError};
pub use stats::{SqliteStats, StatsError, StatsStore};
