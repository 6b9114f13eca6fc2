//! Vote intake.

use yggdrasil_types::{
    ErrorKind, OptionId, RowPhase, ShowEvent, ShowPhase, ShowState, Timestamp, UserId, Vote,
};

use super::Outcome;

/// Upsert a vote for the current (row, attempt). At most one vote per
/// (user, row, attempt); re-submission replaces. Votes outside the open
/// window are silently ignored so stale clients are not punished.
pub(super) fn submit_vote(
    state: &mut ShowState,
    user_id: &UserId,
    faction_vote: &OptionId,
    personal_vote: &OptionId,
    now: Timestamp,
) -> Outcome {
    let Some(user) = state.users.get(user_id) else {
        return Outcome::Ignored("vote from unknown user");
    };
    if user.faction.is_none() {
        return Outcome::rejected(
            ErrorKind::UserNoFaction,
            format!("vote from unassigned user {user_id}"),
        );
    }
    if state.phase != ShowPhase::Running {
        return Outcome::Ignored("show not running");
    }
    let Some(row) = state.current_row() else {
        return Outcome::Ignored("no current row");
    };
    let window_open = match row.phase {
        RowPhase::Voting => true,
        RowPhase::Auditioning => state.config.voting.allow_during_audition,
        _ => false,
    };
    if !window_open {
        return Outcome::Ignored("votes closed for this row");
    }

    let row_index = state.current_row_index;
    let attempt = row.attempts;
    match state
        .votes
        .iter_mut()
        .find(|v| v.user_id == *user_id && v.row_index == row_index && v.attempt == attempt)
    {
        Some(vote) => {
            vote.faction_vote = faction_vote.clone();
            vote.personal_vote = personal_vote.clone();
            vote.timestamp = now;
        }
        None => state.votes.push(Vote {
            user_id: user_id.clone(),
            row_index,
            faction_vote: faction_vote.clone(),
            personal_vote: personal_vote.clone(),
            timestamp: now,
            attempt,
        }),
    }

    state
        .personal_trees
        .entry(user_id.clone())
        .or_default()
        .path
        .insert(row_index, personal_vote.clone());

    Outcome::Accepted(vec![ShowEvent::VoteReceived {
        user_id: user_id.clone(),
        row_index,
        attempt,
    }])
}
