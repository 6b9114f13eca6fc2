//! # yggdrasil-net
//!
//! Transport fabric for show clients: length-prefixed JSON framing, the
//! client/server wire protocol, and the role-aware TCP server with
//! heartbeat and identity binding.

pub mod framing;
pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ConnId, Role, ServerMessage, ViewPayload};
pub use server::{HeartbeatConfig, ServerInput, ShowServer};
