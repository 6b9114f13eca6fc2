//! Show and row phase transitions.

use yggdrasil_types::{
    AudioCue, ErrorKind, RowPhase, ShowEvent, ShowPhase, ShowState, OPTIONS_PER_ROW,
};

use super::{clear_path_entry, path_pairs, reveal, set_path_entry, tie::TieBreak, Outcome};

/// Put a row into auditioning at step 0 and cue the first option.
pub(super) fn enter_audition(state: &mut ShowState, row_index: usize, events: &mut Vec<ShowEvent>) {
    let Some(row) = state.rows.get_mut(row_index) else {
        return;
    };
    row.phase = RowPhase::Auditioning;
    row.audition_index = Some(0);
    let first_option = row.options[0].id.clone();
    let attempt = row.attempts;
    events.push(ShowEvent::RowPhaseChanged {
        row_index,
        phase: RowPhase::Auditioning,
        attempt,
    });
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

pub(super) fn start_show(state: &mut ShowState) -> Outcome {
    if state.phase != ShowPhase::Assigning {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("start_show requires assigning, show is {:?}", state.phase),
        );
    }
    if state.rows.is_empty() {
        return Outcome::rejected(ErrorKind::InvalidPhase, "show has no rows");
    }
    state.phase = ShowPhase::Running;
    state.current_row_index = 0;
    let mut events = vec![ShowEvent::ShowPhaseChanged {
        phase: ShowPhase::Running,
    }];
    enter_audition(state, 0, &mut events);
    Outcome::Accepted(events)
}

pub(super) fn advance_phase(state: &mut ShowState, tie: &mut dyn TieBreak) -> Outcome {
    if state.phase != ShowPhase::Running {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("advance_phase requires running, show is {:?}", state.phase),
        );
    }
    let row_index = state.current_row_index;
    let Some(row) = state.rows.get(row_index) else {
        return Outcome::rejected(ErrorKind::InvalidPhase, "no current row");
    };

    let mut events = Vec::new();
    match row.phase {
        RowPhase::Pending => enter_audition(state, row_index, &mut events),
        RowPhase::Auditioning => {
            let steps_total =
                (OPTIONS_PER_ROW as u32) * state.config.timing.audition_loops_per_row.max(1);
            let step = row.audition_index.unwrap_or(0) + 1;
            let Some(row) = state.rows.get_mut(row_index) else {
                return Outcome::Ignored("row disappeared");
            };
            if step >= steps_total {
                row.phase = RowPhase::Voting;
                row.audition_index = None;
                let attempt = row.attempts;
                events.push(ShowEvent::RowPhaseChanged {
                    row_index,
                    phase: RowPhase::Voting,
                    attempt,
                });
            } else {
                row.audition_index = Some(step);
                let option_index = step as usize % OPTIONS_PER_ROW;
                events.push(ShowEvent::AuditionOptionChanged {
                    row_index,
                    option_index,
                    option_id: row.options[option_index].id.clone(),
                    step,
                });
                events.push(ShowEvent::Audio(AudioCue::PlayOption {
                    row: row_index,
                    option: option_index,
                }));
            }
        }
        RowPhase::Voting => {
            let attempt = row.attempts;
            if let Some(row) = state.rows.get_mut(row_index) {
                row.phase = RowPhase::Revealing;
            }
            events.push(ShowEvent::RowPhaseChanged {
                row_index,
                phase: RowPhase::Revealing,
                attempt,
            });
            reveal::run(state, tie, &mut events);
        }
        RowPhase::Revealing => {
            let attempt = row.attempts;
            if let Some(row) = state.rows.get_mut(row_index) {
                row.phase = RowPhase::CoupWindow;
            }
            events.push(ShowEvent::RowPhaseChanged {
                row_index,
                phase: RowPhase::CoupWindow,
                attempt,
            });
        }
        RowPhase::CoupWindow => {
            let attempt = row.attempts;
            if let Some(row) = state.rows.get_mut(row_index) {
                row.phase = RowPhase::Committed;
            }
            events.push(ShowEvent::RowPhaseChanged {
                row_index,
                phase: RowPhase::Committed,
                attempt,
            });
        }
        RowPhase::Committed => {
            if row_index + 1 >= state.rows.len() {
                return enter_finale(state);
            }
            state.current_row_index = row_index + 1;
            reset_row_scoped_coup(state);
            enter_audition(state, row_index + 1, &mut events);
        }
    }
    Outcome::Accepted(events)
}

/// The coup boost is row-scoped: multipliers and coup-vote sets reset on
/// entry to a new row.
fn reset_row_scoped_coup(state: &mut ShowState) {
    for faction in &mut state.factions {
        faction.coup_multiplier = 1.0;
        faction.coup_votes.clear();
    }
}

fn enter_finale(state: &mut ShowState) -> Outcome {
    state.phase = ShowPhase::Finale;
    state.paused_phase = None;
    let popular = state.paths.popular_path.clone();
    let pairs = path_pairs(state, &popular);
    Outcome::Accepted(vec![
        ShowEvent::ShowPhaseChanged {
            phase: ShowPhase::Finale,
        },
        ShowEvent::FinalePopularSong {
            path: popular,
        },
        ShowEvent::Audio(AudioCue::PlayTimeline {
            path: pairs,
            user_id: None,
        }),
    ])
}

pub(super) fn pause(state: &mut ShowState) -> Outcome {
    if state.phase == ShowPhase::Paused {
        return Outcome::Ignored("already paused");
    }
    state.paused_phase = Some(state.phase);
    state.phase = ShowPhase::Paused;
    Outcome::Accepted(vec![
        ShowEvent::ShowPhaseChanged {
            phase: ShowPhase::Paused,
        },
        ShowEvent::Audio(AudioCue::TransportStop),
    ])
}

pub(super) fn resume(state: &mut ShowState) -> Outcome {
    if state.phase != ShowPhase::Paused {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("resume requires paused, show is {:?}", state.phase),
        );
    }
    let restored = state.paused_phase.take().unwrap_or(ShowPhase::Lobby);
    state.phase = restored;
    Outcome::Accepted(vec![
        ShowEvent::ShowPhaseChanged { phase: restored },
        ShowEvent::Audio(AudioCue::TransportContinue),
    ])
}

/// Force the current row to committed with its first option.
pub(super) fn skip_row(state: &mut ShowState) -> Outcome {
    if state.phase != ShowPhase::Running {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("skip_row requires running, show is {:?}", state.phase),
        );
    }
    let row_index = state.current_row_index;
    let Some(row) = state.rows.get_mut(row_index) else {
        return Outcome::rejected(ErrorKind::InvalidPhase, "no current row");
    };
    let first_option = row.options[0].id.clone();
    row.phase = RowPhase::Committed;
    row.committed_option = Some(first_option.clone());
    row.audition_index = None;
    let attempt = row.attempts;
    set_path_entry(state, row_index, first_option.clone(), first_option);
    Outcome::Accepted(vec![
        ShowEvent::RowPhaseChanged {
            row_index,
            phase: RowPhase::Committed,
            attempt,
        },
        ShowEvent::PathsUpdated {
            faction_path: state.paths.faction_path.clone(),
            popular_path: state.paths.popular_path.clone(),
        },
        ShowEvent::Audio(AudioCue::CommitLayer {
            row: row_index,
            option: 0,
        }),
    ])
}

/// Restart the current row's audition on a fresh attempt.
pub(super) fn restart_row(state: &mut ShowState) -> Outcome {
    if state.phase != ShowPhase::Running {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("restart_row requires running, show is {:?}", state.phase),
        );
    }
    let row_index = state.current_row_index;
    let Some(row) = state.rows.get_mut(row_index) else {
        return Outcome::rejected(ErrorKind::InvalidPhase, "no current row");
    };
    row.attempts += 1;
    row.committed_option = None;
    row.phase = RowPhase::Auditioning;
    row.audition_index = Some(0);
    let attempt = row.attempts;
    let first_option = row.options[0].id.clone();
    clear_path_entry(state, row_index);
    // A restarted attempt begins with a clean slate even if votes somehow
    // exist under the new attempt number.
    state
        .votes
        .retain(|v| !(v.row_index == row_index && v.attempt == attempt));
    for faction in &mut state.factions {
        faction.coup_votes.clear();
    }
    Outcome::Accepted(vec![
        ShowEvent::RowPhaseChanged {
            row_index,
            phase: RowPhase::Auditioning,
            attempt,
        },
        ShowEvent::Audio(AudioCue::UncommitLayer { row: row_index }),
        ShowEvent::AuditionOptionChanged {
            row_index,
            option_index: 0,
            option_id: first_option,
            step: 0,
        },
        ShowEvent::Audio(AudioCue::PlayOption {
            row: row_index,
            option: 0,
        }),
    ])
}

pub(super) fn force_finale(state: &mut ShowState) -> Outcome {
    enter_finale(state)
}

pub(super) fn reset_to_lobby(state: &mut ShowState, preserve_users: bool) -> Outcome {
    state.votes.clear();
    state.paths = Default::default();
    for row in &mut state.rows {
        row.phase = RowPhase::Pending;
        row.committed_option = None;
        row.attempts = 0;
        row.audition_index = None;
    }
    for faction in &mut state.factions {
        faction.coup_used = false;
        faction.coup_multiplier = 1.0;
        faction.coup_votes.clear();
    }
    state.current_row_index = 0;
    state.phase = ShowPhase::Lobby;
    state.paused_phase = None;
    if preserve_users {
        for user in state.users.values_mut() {
            user.faction = None;
        }
        for tree in state.personal_trees.values_mut() {
            tree.path.clear();
        }
    } else {
        state.users.clear();
        state.personal_trees.clear();
    }
    Outcome::Accepted(vec![
        ShowEvent::ShowReset {
            preserved_users: preserve_users,
        },
        ShowEvent::ShowPhaseChanged {
            phase: ShowPhase::Lobby,
        },
        ShowEvent::Audio(AudioCue::ResetAll),
    ])
}

/// Overwrite the whole state with a supplied snapshot (backup restore).
pub(super) fn import_state(state: &mut ShowState, snapshot: &ShowState) -> Outcome {
    *state = snapshot.clone();
    Outcome::Accepted(vec![
        ShowEvent::ShowPhaseChanged { phase: state.phase },
        ShowEvent::StateSync { user_id: None },
    ])
}
