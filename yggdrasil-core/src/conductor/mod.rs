//! The Conductor: `(state, command) -> events`.
//!
//! `Conductor::process` is the single entry point for state mutation. A
//! command is either accepted (state mutated, version bumped exactly once),
//! ignored (stale or harmless input, no change), or rejected (an `Error`
//! event, no change). The Conductor never panics and never returns `Err`;
//! persistence and broadcast are the caller's job.
//!
//! Everything here is deterministic except tie resolution, which goes
//! through the injected [`tie::TieBreak`].

mod assignment;
mod coup;
mod phases;
mod reveal;
pub mod tie;
mod users;
mod votes;

#[cfg(test)]
mod tests;

use log::{debug, warn};

use yggdrasil_types::{ErrorKind, ShowCommand, ShowEvent, ShowState, Timestamp};

use tie::{ClockSeededXorShift, TieBreak};

/// Handler verdict. Only `Accepted` advances the version.
enum Outcome {
    Accepted(Vec<ShowEvent>),
    /// No state change and no error surfaced (e.g. a vote that arrived
    /// after the window closed; stale clients are not punished).
    Ignored(&'static str),
    Rejected { kind: ErrorKind, message: String },
}

impl Outcome {
    fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Rejected {
            kind,
            message: message.into(),
        }
    }
}

pub struct Conductor {
    tie: Box<dyn TieBreak>,
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

impl Conductor {
    pub fn new() -> Self {
        Self {
            tie: Box::new(ClockSeededXorShift::new()),
        }
    }

    /// Build a conductor with an injected tie-breaker (reproducible reveals).
    pub fn with_tie_break(tie: Box<dyn TieBreak>) -> Self {
        Self { tie }
    }

    /// Process one command. Mutates `state` in place iff the command is
    /// accepted, in which case `state.version` has advanced by exactly one
    /// when this returns.
    pub fn process(
        &mut self,
        state: &mut ShowState,
        cmd: &ShowCommand,
        now: Timestamp,
    ) -> Vec<ShowEvent> {
        let outcome = match cmd {
            ShowCommand::UserConnect {
                user_id,
                seat_id,
                faction,
            } => users::connect(state, user_id, seat_id.clone(), *faction, now),
            ShowCommand::UserDisconnect { user_id } => users::disconnect(state, user_id),
            ShowCommand::UserReconnect {
                user_id,
                last_version,
            } => users::reconnect(state, user_id, *last_version),
            ShowCommand::SubmitFigTreeResponse { user_id, text } => {
                users::fig_tree_response(state, user_id, text)
            }
            ShowCommand::AssignFactions => assignment::assign_factions(state),
            ShowCommand::StartShow => phases::start_show(state),
            ShowCommand::AdvancePhase => phases::advance_phase(state, self.tie.as_mut()),
            ShowCommand::SubmitVote {
                user_id,
                faction_vote,
                personal_vote,
            } => votes::submit_vote(state, user_id, faction_vote, personal_vote, now),
            ShowCommand::SubmitCoupVote { user_id } => coup::submit_coup_vote(state, user_id),
            ShowCommand::Pause => phases::pause(state),
            ShowCommand::Resume => phases::resume(state),
            ShowCommand::SkipRow => phases::skip_row(state),
            ShowCommand::RestartRow => phases::restart_row(state),
            ShowCommand::TriggerCoup { faction } => coup::trigger_coup(state, *faction),
            ShowCommand::SetTiming(overrides) => {
                state.config.timing.apply(overrides);
                Outcome::Accepted(Vec::new())
            }
            ShowCommand::ForceFinale => phases::force_finale(state),
            ShowCommand::ResetToLobby { preserve_users } => {
                phases::reset_to_lobby(state, *preserve_users)
            }
            ShowCommand::ImportState(snapshot) => phases::import_state(state, snapshot),
            ShowCommand::ForceReconnectAll => {
                Outcome::Accepted(vec![ShowEvent::ForceReconnect])
            }
        };

        match outcome {
            Outcome::Accepted(events) => {
                state.touch(now);
                debug!(
                    "accepted {} -> v{} ({} events)",
                    cmd.name(),
                    state.version,
                    events.len()
                );
                events
            }
            Outcome::Ignored(reason) => {
                debug!("ignored {}: {}", cmd.name(), reason);
                Vec::new()
            }
            Outcome::Rejected { kind, message } => {
                warn!("rejected {}: {:?} {}", cmd.name(), kind, message);
                vec![ShowEvent::Error { kind, message }]
            }
        }
    }
}

/// Record the committed (faction, popular) winners for a row on both paths.
/// Rows commit in order, so this is normally a push; a re-commit after
/// skip overwrites in place.
fn set_path_entry(
    state: &mut ShowState,
    row_index: usize,
    faction_option: yggdrasil_types::OptionId,
    popular_option: yggdrasil_types::OptionId,
) {
    if state.paths.faction_path.len() > row_index {
        state.paths.faction_path[row_index] = faction_option;
    } else {
        state.paths.faction_path.push(faction_option);
    }
    if state.paths.popular_path.len() > row_index {
        state.paths.popular_path[row_index] = popular_option;
    } else {
        state.paths.popular_path.push(popular_option);
    }
}

/// Drop a row's path entries (coup or restart after a reveal already ran).
fn clear_path_entry(state: &mut ShowState, row_index: usize) {
    state.paths.faction_path.truncate(row_index);
    state.paths.popular_path.truncate(row_index);
}

/// Resolve a path of option ids into (row, option index) pairs for the
/// audio timeline.
fn path_pairs(state: &ShowState, path: &[yggdrasil_types::OptionId]) -> Vec<(usize, usize)> {
    path.iter()
        .enumerate()
        .filter_map(|(row_index, option_id)| {
            state.rows.get(row_index).and_then(|row| {
                row.options
                    .iter()
                    .position(|o| o.id == *option_id)
                    .map(|opt| (row_index, opt))
            })
        })
        .collect()
}
