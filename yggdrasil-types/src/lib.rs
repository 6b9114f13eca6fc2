//! # yggdrasil-types
//!
//! Shared type definitions for the Yggdrasil show coordinator.
//! This crate contains the data model, commands, events, configuration,
//! and role projections used across yggdrasil-core, yggdrasil-net, and
//! yggdrasil-audio.

pub mod command;
pub mod config;
pub mod event;
pub mod projection;
pub mod state;
pub mod wire;

pub use command::*;
pub use config::*;
pub use event::*;
pub use state::*;

/// Unique identifier for an audience member. Opaque, stable across reconnects.
pub type UserId = String;

/// Unique identifier for one of a row's four options.
pub type OptionId = String;

/// Unique identifier for a show.
pub type ShowId = String;

/// Physical seat label (e.g. "B4"), used by faction assignment.
pub type SeatId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Number of factions in every show.
pub const FACTION_COUNT: usize = 4;

/// Number of options in every row.
pub const OPTIONS_PER_ROW: usize = 4;

/// Newtype for faction identifiers. Always in 0..4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct FactionId(u8);

impl FactionId {
    /// Create a FactionId. Panics if id >= 4.
    pub fn new(id: u8) -> Self {
        assert!((id as usize) < FACTION_COUNT, "FactionId out of range");
        Self(id)
    }

    /// Extract the raw u8 value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// The faction's position in the show's faction array.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// All four faction ids in order.
    pub fn all() -> [FactionId; FACTION_COUNT] {
        [Self(0), Self(1), Self(2), Self(3)]
    }
}

impl TryFrom<u8> for FactionId {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        if (id as usize) < FACTION_COUNT {
            Ok(Self(id))
        } else {
            Err(id)
        }
    }
}

/// Wire values are untrusted (a faction id arrives in client `join`
/// messages), so deserialization bound-checks instead of trusting the raw
/// byte. Out-of-range ids fail the frame rather than panicking later in
/// `ShowState::faction`.
impl<'de> serde::Deserialize<'de> for FactionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = u8::deserialize(deserializer)?;
        FactionId::try_from(id).map_err(|id| {
            serde::de::Error::custom(format!(
                "faction id {id} out of range (expected 0..{FACTION_COUNT})"
            ))
        })
    }
}

impl std::fmt::Display for FactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
