//! greeter-core: decision logic for a presence-triggered greeter.
//!
//! Filters face detections, votes on stable presence, picks a greeting line
//! and drives the interaction state machine. No I/O happens here; callers
//! feed detection batches in and carry out the returned effects.

pub mod animation;
pub mod content;
pub mod filter;
pub mod machine;
pub mod picker;
pub mod scene;
pub mod stability;
pub mod types;

pub use content::{ContentError, ContentPools};
pub use machine::{
    AfterTalk, Effect, Gesture, InteractionStateMachine, MachineConfig, Snapshot, StateKind,
    TalkEnd, Tick, TouchRejected,
};
pub use picker::ContentPicker;
pub use scene::Scene;
pub use types::{Compliment, Detection, DetectionBatch, Surface};
