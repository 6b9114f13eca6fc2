//! User lifecycle: connect, disconnect, reconnect, lobby responses.

use yggdrasil_types::{
    ErrorKind, FactionId, SeatId, ShowEvent, ShowPhase, ShowState, Timestamp, User, UserId,
};

use super::{assignment, Outcome};

/// Idempotent insert-or-reconnect. New users get a personal tree; users
/// joining a show already past the lobby are assigned as latecomers.
pub(super) fn connect(
    state: &mut ShowState,
    user_id: &UserId,
    seat_id: Option<SeatId>,
    faction: Option<FactionId>,
    now: Timestamp,
) -> Outcome {
    let mut events = Vec::new();

    if let Some(user) = state.users.get_mut(user_id) {
        user.connected = true;
        if user.seat.is_none() {
            user.seat = seat_id;
        }
        events.push(ShowEvent::UserJoined {
            user_id: user_id.clone(),
            seat_id: user.seat.clone(),
        });
    } else {
        state.users.insert(
            user_id.clone(),
            User {
                id: user_id.clone(),
                seat: seat_id.clone(),
                faction,
                connected: true,
                joined_at: now,
            },
        );
        state.personal_trees.entry(user_id.clone()).or_default();
        events.push(ShowEvent::UserJoined {
            user_id: user_id.clone(),
            seat_id,
        });
    }

    let needs_faction = state.phase != ShowPhase::Lobby
        && state
            .users
            .get(user_id)
            .map(|u| u.faction.is_none())
            .unwrap_or(false);
    if needs_faction {
        let fid = assignment::assign_latecomer(state, user_id);
        if let Some(user) = state.users.get_mut(user_id) {
            user.faction = Some(fid);
        }
        events.push(ShowEvent::FactionAssigned {
            user_id: user_id.clone(),
            faction: fid,
        });
    }

    events.push(ShowEvent::StateSync {
        user_id: Some(user_id.clone()),
    });
    Outcome::Accepted(events)
}

pub(super) fn disconnect(state: &mut ShowState, user_id: &UserId) -> Outcome {
    match state.users.get_mut(user_id) {
        Some(user) => {
            user.connected = false;
            Outcome::Accepted(vec![ShowEvent::UserLeft {
                user_id: user_id.clone(),
            }])
        }
        // Heartbeat expiry can race a reset that cleared the roster.
        None => Outcome::Ignored("disconnect for unknown user"),
    }
}

pub(super) fn reconnect(state: &mut ShowState, user_id: &UserId, last_version: u64) -> Outcome {
    match state.users.get_mut(user_id) {
        Some(user) => {
            user.connected = true;
            Outcome::Accepted(vec![
                ShowEvent::UserReconnected {
                    user_id: user_id.clone(),
                    last_version,
                },
                ShowEvent::StateSync {
                    user_id: Some(user_id.clone()),
                },
            ])
        }
        None => Outcome::rejected(
            ErrorKind::MissingUser,
            format!("reconnect for unknown user {user_id}"),
        ),
    }
}

pub(super) fn fig_tree_response(state: &mut ShowState, user_id: &UserId, text: &str) -> Outcome {
    if !state.users.contains_key(user_id) {
        return Outcome::rejected(
            ErrorKind::MissingUser,
            format!("lobby response from unknown user {user_id}"),
        );
    }
    state
        .personal_trees
        .entry(user_id.clone())
        .or_default()
        .fig_tree_response = Some(text.to_string());
    Outcome::Accepted(Vec::new())
}
