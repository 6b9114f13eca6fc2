//! # yggdrasil-audio
//!
//! The outbound audio side of the show: the DAW bridge (OSC-shaped
//! datagrams over UDP, plus a null implementation for tests and
//! DAW-less rehearsal) and the audio router that translates abstract
//! cues into track mutes and clip fires.

pub mod bridge;
pub mod router;

pub use bridge::{beat_events, DawBridge, NullBridge, OscBridge};
pub use router::AudioRouter;
