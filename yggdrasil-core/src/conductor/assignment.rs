//! Faction assignment.
//!
//! Hard constraint: faction sizes differ by at most one. Soft goal: split
//! seat neighbours across factions. The size term is weighted so that any
//! size increase dominates any adjacency improvement, which makes the
//! balance constraint fall out of a single greedy score.

use std::collections::BTreeMap;

use yggdrasil_types::{
    ErrorKind, FactionId, SeatId, ShowEvent, ShowPhase, ShowState, UserId, FACTION_COUNT,
};

use super::Outcome;

/// Size dominates adjacency in the greedy score.
const SIZE_WEIGHT: usize = 100;

pub(super) fn assign_factions(state: &mut ShowState) -> Outcome {
    if state.phase != ShowPhase::Lobby {
        return Outcome::rejected(
            ErrorKind::InvalidPhase,
            format!("assign_factions requires lobby, show is {:?}", state.phase),
        );
    }

    let assignments = assign_all(state);
    for (user_id, fid) in &assignments {
        if let Some(user) = state.users.get_mut(user_id) {
            user.faction = Some(*fid);
        }
    }
    state.phase = ShowPhase::Assigning;

    Outcome::Accepted(vec![
        ShowEvent::ShowPhaseChanged {
            phase: ShowPhase::Assigning,
        },
        ShowEvent::FactionsAssigned { assignments },
    ])
}

/// Users whose seat is adjacent to `seat`.
fn seated_neighbors<'a>(
    state: &'a ShowState,
    seat_owner: &'a BTreeMap<SeatId, UserId>,
    seat: Option<&SeatId>,
) -> Vec<&'a UserId> {
    let Some(seat) = seat else {
        return Vec::new();
    };
    state
        .config
        .neighbors(seat)
        .map(|adj| {
            adj.iter()
                .filter_map(|s| seat_owner.get(s))
                .collect()
        })
        .unwrap_or_default()
}

/// Greedy most-constrained-first assignment over all unassigned users.
/// Users already holding a faction (reconnects from a previous session)
/// keep it and seed the size counts.
fn assign_all(state: &ShowState) -> Vec<(UserId, FactionId)> {
    let seat_owner: BTreeMap<SeatId, UserId> = state
        .users
        .values()
        .filter_map(|u| u.seat.clone().map(|s| (s, u.id.clone())))
        .collect();

    let mut sizes = [0usize; FACTION_COUNT];
    let mut placed: BTreeMap<UserId, FactionId> = BTreeMap::new();
    for user in state.users.values() {
        if let Some(fid) = user.faction {
            sizes[fid.index()] += 1;
            placed.insert(user.id.clone(), fid);
        }
    }

    let mut pending: Vec<UserId> = state
        .users
        .values()
        .filter(|u| u.faction.is_none())
        .map(|u| u.id.clone())
        .collect();
    // BTreeMap iteration already sorted by id; keep that as the tie order.

    let mut out = Vec::new();
    while !pending.is_empty() {
        // Most constrained first: the user with the most already-placed
        // neighbours, re-computed each step. Strict '>' keeps the earliest
        // (lexicographically least) id on ties.
        let mut best_pos = 0;
        let mut best_count = usize::MAX;
        for (pos, user_id) in pending.iter().enumerate() {
            let seat = state.users.get(user_id).and_then(|u| u.seat.as_ref());
            let count = seated_neighbors(state, &seat_owner, seat)
                .iter()
                .filter(|n| placed.contains_key(**n))
                .count();
            if best_count == usize::MAX || count > best_count {
                best_pos = pos;
                best_count = count;
            }
        }
        let user_id = pending.remove(best_pos);

        let seat = state.users.get(&user_id).and_then(|u| u.seat.as_ref());
        let neighbors = seated_neighbors(state, &seat_owner, seat);
        let mut adjacency = [0usize; FACTION_COUNT];
        for n in &neighbors {
            if let Some(fid) = placed.get(*n) {
                adjacency[fid.index()] += 1;
            }
        }

        let fid = best_faction(&sizes, &adjacency);
        sizes[fid.index()] += 1;
        placed.insert(user_id.clone(), fid);
        out.push((user_id, fid));
    }
    out
}

/// Minimum of `size * W + adjacency`, ties by faction id.
fn best_faction(sizes: &[usize; FACTION_COUNT], adjacency: &[usize; FACTION_COUNT]) -> FactionId {
    let mut best = 0usize;
    let mut best_score = usize::MAX;
    for i in 0..FACTION_COUNT {
        let score = sizes[i] * SIZE_WEIGHT + adjacency[i];
        if score < best_score {
            best = i;
            best_score = score;
        }
    }
    FactionId::new(best as u8)
}

/// Single user joining after assignment: smallest faction, ties broken by
/// fewest already-adjacent members, then by faction id.
pub(super) fn assign_latecomer(state: &ShowState, user_id: &UserId) -> FactionId {
    let mut sizes = [0usize; FACTION_COUNT];
    for user in state.users.values() {
        if let Some(fid) = user.faction {
            sizes[fid.index()] += 1;
        }
    }

    let seat_owner: BTreeMap<SeatId, UserId> = state
        .users
        .values()
        .filter_map(|u| u.seat.clone().map(|s| (s, u.id.clone())))
        .collect();
    let seat = state.users.get(user_id).and_then(|u| u.seat.as_ref());
    let mut adjacency = [0usize; FACTION_COUNT];
    for n in seated_neighbors(state, &seat_owner, seat) {
        if let Some(fid) = state.users.get(n).and_then(|u| u.faction) {
            adjacency[fid.index()] += 1;
        }
    }

    let min_size = *sizes.iter().min().unwrap_or(&0);
    let mut best = 0usize;
    let mut best_adj = usize::MAX;
    for i in 0..FACTION_COUNT {
        if sizes[i] == min_size && adjacency[i] < best_adj {
            best = i;
            best_adj = adjacency[i];
        }
    }
    FactionId::new(best as u8)
}
