//! # cue-types
//!
//! Wire format types for the cuesync timer synchronization protocol.
//!
//! This crate provides the foundational types used across all cuesync crates:
//! - [`Envelope`] - One complete, self-describing snapshot of timer state
//! - [`Request`] - Upstream messages from a child to the parent
//! - [`Phase`], [`StopEvent`], [`CueEvent`], [`RestartEvent`] - Timer vocabulary
//! - [`FrameDecoder`] - Delimiter framing for the stream channel
//! - [`WireError`] - Error types
//!
//! Every message is a full snapshot, never a diff. Decoding is permissive:
//! unknown keys are ignored, missing keys take documented defaults, and
//! unknown enum values map to an explicit `Unknown` variant.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod frame;
mod ids;
mod messages;

pub use envelope::{
    CueEvent, Envelope, FlashStyle, LinkKind, Phase, RestartEvent, Rgb, Role, StopEvent,
    DEFAULT_FLASH_DURATION_MS, PROTOCOL_VERSION,
};
pub use error::WireError;
pub use frame::{encode_frame, FrameDecoder, FRAME_DELIMITER, MAX_FRAME_SIZE};
pub use ids::SessionId;
pub use messages::Request;
