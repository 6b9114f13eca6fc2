//! Events emitted by the Conductor.
//!
//! One accepted command produces a causally ordered list of events: phase
//! changes precede the audio cues they imply, path updates precede the
//! reveal broadcast. Rejected commands produce a single `Error` event and
//! no state change.

use serde::{Deserialize, Serialize};

use crate::{FactionId, OptionId, RowPhase, SeatId, ShowPhase, UserId};

/// Why a command was rejected or a packet dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownCommand,
    InvalidPhase,
    MissingUser,
    UserNoFaction,
    Persistence,
    Transport,
    Codec,
}

/// Per-faction slice of a reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionRevealResult {
    pub faction: FactionId,
    /// largest bloc / faction vote count, 0 if no votes.
    pub raw_coherence: f64,
    /// raw x coup multiplier; may exceed 1.
    pub weighted_coherence: f64,
    /// Option with the largest bloc, lexicographic tie-break. None if no votes.
    pub bloc_option: Option<OptionId>,
    pub vote_count: usize,
}

/// Popular-vote summary attached to a reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularSummary {
    pub winner: OptionId,
    /// (option, count), descending by count then option id.
    pub counts: Vec<(OptionId, usize)>,
    /// True when the popular winner differs from the faction winner.
    pub diverged_from_faction: bool,
}

/// The compound reveal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealPayload {
    pub row_index: usize,
    pub attempt: u32,
    pub faction_results: Vec<FactionRevealResult>,
    /// Factions that shared the maximum weighted coherence, when more than one.
    pub tied: Vec<FactionId>,
    pub winning_faction: FactionId,
    pub winning_option: OptionId,
    pub popular: PopularSummary,
}

/// Abstract audio instructions; the audio router is the only consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum AudioCue {
    PlayOption { row: usize, option: usize },
    StopOption { row: usize, option: usize },
    CommitLayer { row: usize, option: usize },
    UncommitLayer { row: usize },
    PlayTimeline {
        /// (row, option) pairs in row order.
        path: Vec<(usize, usize)>,
        /// Present for an individual finale timeline; absent for the
        /// popular-path playback.
        user_id: Option<UserId>,
    },
    TransportStop,
    TransportContinue,
    ResetAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ShowEvent {
    UserJoined {
        user_id: UserId,
        seat_id: Option<SeatId>,
    },
    UserLeft {
        user_id: UserId,
    },
    UserReconnected {
        user_id: UserId,
        last_version: u64,
    },
    /// Ask the transport to resync a specific user (None = everyone).
    StateSync {
        user_id: Option<UserId>,
    },
    FactionAssigned {
        user_id: UserId,
        faction: FactionId,
    },
    FactionsAssigned {
        assignments: Vec<(UserId, FactionId)>,
    },
    ShowPhaseChanged {
        phase: ShowPhase,
    },
    RowPhaseChanged {
        row_index: usize,
        phase: RowPhase,
        attempt: u32,
    },
    AuditionOptionChanged {
        row_index: usize,
        option_index: usize,
        option_id: OptionId,
        /// Monotonic audition step within the row.
        step: u32,
    },
    VoteReceived {
        user_id: UserId,
        row_index: usize,
        attempt: u32,
    },
    CoupMeterUpdate {
        faction: FactionId,
        progress: f64,
        votes: usize,
        members: usize,
    },
    CoupTriggered {
        faction: FactionId,
        row_index: usize,
        multiplier: f64,
    },
    TieDetected {
        factions: Vec<FactionId>,
    },
    TieResolved {
        winner: FactionId,
    },
    Reveal(RevealPayload),
    PathsUpdated {
        faction_path: Vec<OptionId>,
        popular_path: Vec<OptionId>,
    },
    FinalePopularSong {
        path: Vec<OptionId>,
    },
    ShowReset {
        preserved_users: bool,
    },
    ForceReconnect,
    Audio(AudioCue),
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ShowEvent {
    /// True for events the controller should see in its error channel.
    pub fn is_error(&self) -> bool {
        matches!(self, ShowEvent::Error { .. })
    }
}
