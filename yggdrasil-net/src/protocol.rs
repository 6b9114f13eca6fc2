//! Wire protocol for show clients.
//!
//! JSON over length-prefixed frames. Every server->client payload is
//! role-filtered; the `ViewPayload` tag is the type guard that lets a
//! controller distinguish a full serialised state from a pre-filtered
//! projection.

use serde::{Deserialize, Serialize};

use yggdrasil_types::projection::{AudienceView, ControllerView, ProjectorView};
use yggdrasil_types::{FactionId, OptionId, SeatId, UserId};

/// Unique identifier for a connection (not a user; a user may reconnect on
/// a new connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl ConnId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// What a connection is for. One logical channel per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Controller,
    Projector,
    Audience,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on every connection.
    Join {
        mode: Role,
        /// Present when rejoining with a previously assigned identity.
        user_id: Option<UserId>,
        seat_id: Option<SeatId>,
        /// Faction carried over from a previous session, if known.
        faction: Option<FactionId>,
    },
    ReconnectUser {
        user_id: UserId,
        last_version: u64,
    },
    Vote {
        faction_vote: OptionId,
        personal_vote: OptionId,
    },
    CoupVote,
    FigTreeResponse {
        text: String,
    },
    /// Controller-only. The payload stays raw JSON so an unrecognised
    /// command can be reported as such instead of killing the whole frame.
    Command { command: serde_json::Value },
    Pong,
}

/// Role-filtered state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ViewPayload {
    Controller(ControllerView),
    Projector(ProjectorView),
    Audience(AudienceView),
}

/// Messages sent from server to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join response: the identity bound to this connection.
    Identity { user_id: UserId },
    /// Full filtered projection; sent after every accepted command.
    StateSync { view: ViewPayload },
    Error {
        message: String,
        command: Option<String>,
    },
    Ping,
    ForceReconnect,
}
