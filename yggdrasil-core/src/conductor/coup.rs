//! Coup voting and the one-shot faction coup.

use yggdrasil_types::{
    AudioCue, ErrorKind, FactionId, RowPhase, ShowEvent, ShowPhase, ShowState, UserId,
};

use super::{clear_path_entry, Outcome};

pub(super) fn submit_coup_vote(state: &mut ShowState, user_id: &UserId) -> Outcome {
    let Some(user) = state.users.get(user_id) else {
        return Outcome::rejected(
            ErrorKind::MissingUser,
            format!("coup vote from unknown user {user_id}"),
        );
    };
    let Some(fid) = user.faction else {
        return Outcome::rejected(
            ErrorKind::UserNoFaction,
            format!("coup vote from unassigned user {user_id}"),
        );
    };
    if state.faction(fid).coup_used {
        return Outcome::Ignored("faction already used its coup");
    }
    if state.current_row().map(|r| r.phase) != Some(RowPhase::CoupWindow) {
        return Outcome::Ignored("row not in coup window");
    }

    // Idempotent: a set insert, so repeat submissions count once.
    state.faction_mut(fid).coup_votes.insert(user_id.clone());
    let members = state.connected_faction_members(fid);
    let votes = state.faction(fid).coup_votes.len();
    let progress = if members == 0 {
        0.0
    } else {
        votes as f64 / members as f64
    };

    if progress >= state.config.coup.threshold {
        let mut events = Vec::new();
        fire(state, fid, &mut events);
        Outcome::Accepted(events)
    } else {
        Outcome::Accepted(vec![ShowEvent::CoupMeterUpdate {
            faction: fid,
            progress,
            votes,
            members,
        }])
    }
}

/// Console override: fire a faction's coup, bypassing the vote threshold
/// and the coup-window check.
pub(super) fn trigger_coup(state: &mut ShowState, fid: FactionId) -> Outcome {
    if state.faction(fid).coup_used {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("faction {fid} already used its coup"),
        );
    }
    if state.phase != ShowPhase::Running || state.current_row().is_none() {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("trigger_coup requires a running row, show is {:?}", state.phase),
        );
    }
    let mut events = Vec::new();
    fire(state, fid, &mut events);
    Outcome::Accepted(events)
}

/// Common coup effects: burn the coup, boost the multiplier, and restart
/// the current row on a fresh attempt.
fn fire(state: &mut ShowState, fid: FactionId, events: &mut Vec<ShowEvent>) {
    let multiplier = 1.0 + state.config.coup.multiplier_bonus;
    {
        let faction = state.faction_mut(fid);
        faction.coup_used = true;
        faction.coup_multiplier = multiplier;
    }
    // The row restarts, so every faction's coup-window votes are stale.
    for faction in &mut state.factions {
        faction.coup_votes.clear();
    }

    let row_index = state.current_row_index;
    clear_path_entry(state, row_index);
    let Some(row) = state.rows.get_mut(row_index) else {
        return;
    };
    row.attempts += 1;
    row.committed_option = None;
    row.phase = RowPhase::Auditioning;
    row.audition_index = Some(0);
    let attempt = row.attempts;
    let first_option = row.options[0].id.clone();

    events.push(ShowEvent::CoupTriggered {
        faction: fid,
        row_index,
        multiplier,
    });
    events.push(ShowEvent::RowPhaseChanged {
        row_index,
        phase: RowPhase::Auditioning,
        attempt,
    });
    events.push(ShowEvent::Audio(AudioCue::UncommitLayer { row: row_index }));
    events.push(ShowEvent::AuditionOptionChanged {
        row_index,
        option_index: 0,
        option_id: first_option,
        step: 0,
    });
    events.push(ShowEvent::Audio(AudioCue::PlayOption {
        row: row_index,
        option: 0,
    }));
}
