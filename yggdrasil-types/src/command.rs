//! Commands accepted by the Conductor.
//!
//! Commands are the only way state changes. They arrive from client sockets,
//! the timing engine, and heartbeat expiry, and are linearised by the server
//! loop before dispatch.

use serde::{Deserialize, Serialize};

use crate::{FactionId, OptionId, SeatId, ShowState, TimingOverride, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShowCommand {
    UserConnect {
        user_id: UserId,
        seat_id: Option<SeatId>,
        /// Faction carried over from a previous session, if any.
        faction: Option<FactionId>,
    },
    UserDisconnect {
        user_id: UserId,
    },
    UserReconnect {
        user_id: UserId,
        /// Last state version the client saw; informational only.
        last_version: u64,
    },
    SubmitFigTreeResponse {
        user_id: UserId,
        text: String,
    },
    AssignFactions,
    StartShow,
    AdvancePhase,
    SubmitVote {
        user_id: UserId,
        faction_vote: OptionId,
        personal_vote: OptionId,
    },
    SubmitCoupVote {
        user_id: UserId,
    },
    Pause,
    Resume,
    SkipRow,
    RestartRow,
    TriggerCoup {
        faction: FactionId,
    },
    SetTiming(TimingOverride),
    ForceFinale,
    ResetToLobby {
        preserve_users: bool,
    },
    ImportState(Box<ShowState>),
    ForceReconnectAll,
}

impl ShowCommand {
    /// Short name for logs and error payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ShowCommand::UserConnect { .. } => "user_connect",
            ShowCommand::UserDisconnect { .. } => "user_disconnect",
            ShowCommand::UserReconnect { .. } => "user_reconnect",
            ShowCommand::SubmitFigTreeResponse { .. } => "submit_fig_tree_response",
            ShowCommand::AssignFactions => "assign_factions",
            ShowCommand::StartShow => "start_show",
            ShowCommand::AdvancePhase => "advance_phase",
            ShowCommand::SubmitVote { .. } => "submit_vote",
            ShowCommand::SubmitCoupVote { .. } => "submit_coup_vote",
            ShowCommand::Pause => "pause",
            ShowCommand::Resume => "resume",
            ShowCommand::SkipRow => "skip_row",
            ShowCommand::RestartRow => "restart_row",
            ShowCommand::TriggerCoup { .. } => "trigger_coup",
            ShowCommand::SetTiming(_) => "set_timing",
            ShowCommand::ForceFinale => "force_finale",
            ShowCommand::ResetToLobby { .. } => "reset_to_lobby",
            ShowCommand::ImportState(_) => "import_state",
            ShowCommand::ForceReconnectAll => "force_reconnect_all",
        }
    }

    /// The user id this command acts on behalf of, if it carries one.
    /// The transport rewrites this field from the socket-bound identity.
    pub fn user_id_mut(&mut self) -> Option<&mut UserId> {
        match self {
            ShowCommand::UserConnect { user_id, .. }
            | ShowCommand::UserDisconnect { user_id }
            | ShowCommand::UserReconnect { user_id, .. }
            | ShowCommand::SubmitFigTreeResponse { user_id, .. }
            | ShowCommand::SubmitVote { user_id, .. }
            | ShowCommand::SubmitCoupVote { user_id } => Some(user_id),
            _ => None,
        }
    }
}
