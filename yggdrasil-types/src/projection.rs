//! Role projections of `ShowState`.
//!
//! Each projection is a pure function of the state (plus the user id for
//! audience views): one snapshot produces all three views deterministically,
//! and the transport serialises whichever one a socket's role calls for.
//! Containers are `BTreeMap`/`BTreeSet` throughout, so the serialised form
//! is ordering-stable.

use serde::{Deserialize, Serialize};

use crate::{
    DualPaths, FactionId, OptionId, RowPhase, SeatId, ShowPhase, ShowState, UserId,
};

/// The controller sees everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerView {
    pub state: ShowState,
}

/// Public option info; no clip references leave the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionInfo {
    pub id: OptionId,
    pub index: u8,
    pub harmonic_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorRow {
    pub index: usize,
    pub label: String,
    pub kind: String,
    pub phase: RowPhase,
    pub committed_option: Option<OptionId>,
    /// Option currently sounding during audition.
    pub audition_option_index: Option<usize>,
    pub options: Vec<OptionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionInfo {
    pub id: FactionId,
    pub name: String,
    pub color: String,
}

/// Public info for the projector: no coup meters, no vote log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorView {
    pub phase: ShowPhase,
    pub current_row_index: usize,
    pub rows: Vec<ProjectorRow>,
    pub paths: DualPaths,
    pub factions: Vec<FactionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MyVote {
    pub faction_vote: OptionId,
    pub personal_vote: OptionId,
}

/// One audience member's view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceView {
    pub user_id: UserId,
    pub seat_id: Option<SeatId>,
    /// None until assignment.
    pub faction: Option<FactionInfo>,
    pub show_phase: ShowPhase,
    pub row_index: usize,
    pub row_phase: Option<RowPhase>,
    pub options: Vec<OptionInfo>,
    pub audition_option_index: Option<usize>,
    /// This user's own vote for the current (row, attempt).
    pub my_vote: Option<MyVote>,
    pub fig_tree_submitted: bool,
    /// Own faction's coup progress; present only during the coup window.
    pub coup_meter: Option<f64>,
    /// True when this user's faction can still coup and the window is open.
    pub can_coup: bool,
}

fn option_info(state: &ShowState, row_index: usize) -> Vec<OptionInfo> {
    state
        .rows
        .get(row_index)
        .map(|row| {
            row.options
                .iter()
                .map(|o| OptionInfo {
                    id: o.id.clone(),
                    index: o.index,
                    harmonic_group: o.harmonic_group.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn audition_option_index(state: &ShowState, row_index: usize) -> Option<usize> {
    state
        .rows
        .get(row_index)
        .and_then(|row| row.audition_index)
        .map(|i| i as usize % crate::OPTIONS_PER_ROW)
}

/// Full state for the performer's console.
pub fn controller_view(state: &ShowState) -> ControllerView {
    ControllerView {
        state: state.clone(),
    }
}

/// Public projection for the projector display.
pub fn projector_view(state: &ShowState) -> ProjectorView {
    ProjectorView {
        phase: state.phase,
        current_row_index: state.current_row_index,
        rows: state
            .rows
            .iter()
            .map(|row| ProjectorRow {
                index: row.index,
                label: row.label.clone(),
                kind: row.kind.clone(),
                phase: row.phase,
                committed_option: row.committed_option.clone(),
                audition_option_index: row
                    .audition_index
                    .map(|i| i as usize % crate::OPTIONS_PER_ROW),
                options: option_info(state, row.index),
            })
            .collect(),
        paths: state.paths.clone(),
        factions: state
            .factions
            .iter()
            .map(|f| FactionInfo {
                id: f.id,
                name: f.name.clone(),
                color: f.color.clone(),
            })
            .collect(),
    }
}

/// Per-user projection for an audience device.
pub fn audience_view(state: &ShowState, user_id: &UserId) -> AudienceView {
    let user = state.users.get(user_id);
    let row_index = state.current_row_index;
    let row = state.rows.get(row_index);
    let row_phase = row.map(|r| r.phase);
    let attempt = row.map(|r| r.attempts).unwrap_or(0);

    let faction = user
        .and_then(|u| u.faction)
        .map(|fid| {
            let f = state.faction(fid);
            FactionInfo {
                id: f.id,
                name: f.name.clone(),
                color: f.color.clone(),
            }
        });

    let my_vote = state.vote_for(user_id, row_index, attempt).map(|v| MyVote {
        faction_vote: v.faction_vote.clone(),
        personal_vote: v.personal_vote.clone(),
    });

    let in_coup_window = row_phase == Some(RowPhase::CoupWindow);
    let own_faction = user.and_then(|u| u.faction);
    let coup_meter = match (in_coup_window, own_faction) {
        (true, Some(fid)) => {
            let members = state.connected_faction_members(fid);
            if members == 0 {
                Some(0.0)
            } else {
                Some(state.faction(fid).coup_votes.len() as f64 / members as f64)
            }
        }
        _ => None,
    };
    let can_coup = in_coup_window
        && own_faction
            .map(|fid| !state.faction(fid).coup_used)
            .unwrap_or(false);

    AudienceView {
        user_id: user_id.clone(),
        seat_id: user.and_then(|u| u.seat.clone()),
        faction,
        show_phase: state.phase,
        row_index,
        row_phase,
        options: option_info(state, row_index),
        audition_option_index: audition_option_index(state, row_index),
        my_vote,
        fig_tree_submitted: state
            .personal_trees
            .get(user_id)
            .map(|t| t.fig_tree_response.is_some())
            .unwrap_or(false),
        coup_meter,
        can_coup,
    }
}
