//! Reveal: coherence competition and the popular vote.

use std::collections::BTreeMap;

use yggdrasil_types::{
    AudioCue, FactionId, FactionRevealResult, OptionId, PopularSummary, RevealPayload, ShowEvent,
    ShowState, Vote,
};

use super::{set_path_entry, tie::TieBreak};

/// Largest bloc within a count map, lexicographically least option on ties.
/// Ascending BTreeMap iteration plus a strict '>' keeps the least key.
fn largest_bloc(counts: &BTreeMap<&OptionId, usize>) -> Option<(OptionId, usize)> {
    let mut best: Option<(&OptionId, usize)> = None;
    for (option, &count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((option, count)),
        }
    }
    best.map(|(o, c)| (o.clone(), c))
}

/// Run the reveal for the current (row, attempt); called on the
/// voting -> revealing transition. Appends to both paths, commits the row,
/// and pushes the reveal events in causal order.
pub(super) fn run(state: &mut ShowState, tie: &mut dyn TieBreak, events: &mut Vec<ShowEvent>) {
    let row_index = state.current_row_index;
    let Some(row) = state.rows.get(row_index) else {
        return;
    };
    let attempt = row.attempts;
    let first_option = row.options[0].id.clone();

    let attempt_votes: Vec<&Vote> = state.votes_for_attempt(row_index, attempt);

    // Per-faction coherence.
    let mut results: Vec<FactionRevealResult> = Vec::with_capacity(state.factions.len());
    for faction in &state.factions {
        let votes: Vec<&&Vote> = attempt_votes
            .iter()
            .filter(|v| {
                state
                    .users
                    .get(&v.user_id)
                    .map(|u| u.faction == Some(faction.id))
                    .unwrap_or(false)
            })
            .collect();
        let mut blocs: BTreeMap<&OptionId, usize> = BTreeMap::new();
        for vote in &votes {
            *blocs.entry(&vote.faction_vote).or_insert(0) += 1;
        }
        let bloc = largest_bloc(&blocs);
        let raw = match &bloc {
            Some((_, count)) if !votes.is_empty() => *count as f64 / votes.len() as f64,
            _ => 0.0,
        };
        results.push(FactionRevealResult {
            faction: faction.id,
            raw_coherence: raw,
            weighted_coherence: raw * faction.coup_multiplier,
            bloc_option: bloc.map(|(o, _)| o),
            vote_count: votes.len(),
        });
    }

    // Winner by weighted coherence; equal maxima go to the tie-breaker.
    let max_weighted = results
        .iter()
        .map(|r| r.weighted_coherence)
        .fold(f64::NEG_INFINITY, f64::max);
    let tied: Vec<FactionId> = results
        .iter()
        .filter(|r| r.weighted_coherence == max_weighted)
        .map(|r| r.faction)
        .collect();
    let winning_faction = if tied.len() > 1 {
        events.push(ShowEvent::TieDetected {
            factions: tied.clone(),
        });
        let winner = tied[tie.pick(tied.len())];
        events.push(ShowEvent::TieResolved { winner });
        winner
    } else {
        tied[0]
    };

    let winning_option = results[winning_faction.index()]
        .bloc_option
        .clone()
        .unwrap_or_else(|| first_option.clone());

    // Popular vote across all factions.
    let mut popular_counts: BTreeMap<&OptionId, usize> = BTreeMap::new();
    for vote in &attempt_votes {
        *popular_counts.entry(&vote.personal_vote).or_insert(0) += 1;
    }
    let popular_winner = largest_bloc(&popular_counts)
        .map(|(o, _)| o)
        .unwrap_or_else(|| first_option.clone());
    let mut counts: Vec<(OptionId, usize)> = popular_counts
        .into_iter()
        .map(|(o, c)| (o.clone(), c))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let diverged = popular_winner != winning_option;

    // Commit.
    if let Some(row) = state.rows.get_mut(row_index) {
        row.committed_option = Some(winning_option.clone());
    }
    set_path_entry(state, row_index, winning_option.clone(), popular_winner.clone());

    let winning_option_index = state
        .rows
        .get(row_index)
        .and_then(|r| r.options.iter().position(|o| o.id == winning_option))
        .unwrap_or(0);

    let tied_for_payload = if tied.len() > 1 { tied } else { Vec::new() };
    events.push(ShowEvent::Reveal(RevealPayload {
        row_index,
        attempt,
        faction_results: results,
        tied: tied_for_payload,
        winning_faction,
        winning_option: winning_option.clone(),
        popular: PopularSummary {
            winner: popular_winner,
            counts,
            diverged_from_faction: diverged,
        },
    }));
    events.push(ShowEvent::PathsUpdated {
        faction_path: state.paths.faction_path.clone(),
        popular_path: state.paths.popular_path.clone(),
    });
    events.push(ShowEvent::Audio(AudioCue::CommitLayer {
        row: row_index,
        option: winning_option_index,
    }));
}
