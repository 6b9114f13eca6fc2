use std::collections::BTreeMap;

use yggdrasil_types::{
    AudioCue, CoupConfig, ErrorKind, FactionConfig, FactionId, OptionConfig, RowConfig, RowPhase,
    ShowCommand, ShowConfig, ShowEvent, ShowPhase, ShowState, TimingConfig, TimingOverride, User,
    VotingRules,
};

use super::tie::SequenceTieBreak;
use super::Conductor;

fn config(rows: usize) -> ShowConfig {
    ShowConfig {
        show_id: "test-show".into(),
        rows: (0..rows)
            .map(|r| RowConfig {
                label: format!("Row {r}"),
                kind: "melody".into(),
                options: ["A", "B", "C", "D"]
                    .iter()
                    .map(|o| OptionConfig {
                        id: format!("{o}{r}"),
                        clip: format!("clip-{o}{r}"),
                        harmonic_group: None,
                    })
                    .collect(),
            })
            .collect(),
        factions: ["North", "East", "South", "West"]
            .iter()
            .map(|n| FactionConfig {
                name: n.to_string(),
                color: "#fff".into(),
            })
            .collect(),
        timing: TimingConfig::default(),
        coup: CoupConfig {
            threshold: 0.5,
            multiplier_bonus: 0.5,
        },
        voting: VotingRules::default(),
        seat_adjacency: BTreeMap::new(),
    }
}

fn state_with(rows: usize) -> ShowState {
    ShowState::new(config(rows), 1_000)
}

fn add_user(state: &mut ShowState, id: &str, faction: Option<u8>) {
    state.users.insert(
        id.to_string(),
        User {
            id: id.to_string(),
            seat: None,
            faction: faction.map(FactionId::new),
            connected: true,
            joined_at: 0,
        },
    );
    state.personal_trees.entry(id.to_string()).or_default();
}

/// Put the show in `Running` with the current row in the given phase.
fn run_row(state: &mut ShowState, phase: RowPhase) {
    state.phase = ShowPhase::Running;
    let row = state.rows.get_mut(state.current_row_index).unwrap();
    row.phase = phase;
    row.audition_index = if phase == RowPhase::Auditioning {
        Some(0)
    } else {
        None
    };
}

fn vote(
    conductor: &mut Conductor,
    state: &mut ShowState,
    user: &str,
    faction_vote: &str,
    personal_vote: &str,
) -> Vec<ShowEvent> {
    conductor.process(
        state,
        &ShowCommand::SubmitVote {
            user_id: user.into(),
            faction_vote: faction_vote.into(),
            personal_vote: personal_vote.into(),
        },
        2_000,
    )
}

fn find_reveal(events: &[ShowEvent]) -> &yggdrasil_types::RevealPayload {
    events
        .iter()
        .find_map(|e| match e {
            ShowEvent::Reveal(p) => Some(p),
            _ => None,
        })
        .expect("reveal event")
}

// ── Scenarios ──────────────────────────────────────────────────

#[test]
fn s1_full_coherence_single_faction() {
    let mut conductor = Conductor::new();
    let mut state = state_with(2);
    for u in ["u1", "u2", "u3"] {
        add_user(&mut state, u, Some(0));
    }
    run_row(&mut state, RowPhase::Voting);
    for u in ["u1", "u2", "u3"] {
        vote(&mut conductor, &mut state, u, "A0", "A0");
    }

    let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 3_000);
    let reveal = find_reveal(&events);
    assert_eq!(reveal.faction_results[0].raw_coherence, 1.0);
    assert_eq!(reveal.winning_faction, FactionId::new(0));
    assert_eq!(reveal.winning_option, "A0");
    assert_eq!(state.paths.faction_path[0], "A0");
    assert_eq!(state.rows[0].committed_option.as_deref(), Some("A0"));
    // No tie: the other factions are at weighted zero.
    assert!(!events
        .iter()
        .any(|e| matches!(e, ShowEvent::TieDetected { .. })));
}

#[test]
fn s2_weighted_tie_resolved_by_injected_rng() {
    for (pick, expected_faction, expected_option) in
        [(0usize, FactionId::new(0), "A0"), (1, FactionId::new(1), "C0")]
    {
        let mut conductor = Conductor::with_tie_break(Box::new(SequenceTieBreak::new([pick])));
        let mut state = state_with(1);
        for u in ["a1", "a2", "a3", "a4"] {
            add_user(&mut state, u, Some(0));
        }
        add_user(&mut state, "b1", Some(1));
        // Faction 0: split 2-2, multiplier 1.5 -> weighted 0.75.
        state.factions[0].coup_multiplier = 1.5;
        // Faction 1: unanimous, multiplier 0.75 -> weighted 0.75.
        state.factions[1].coup_multiplier = 0.75;
        run_row(&mut state, RowPhase::Voting);
        vote(&mut conductor, &mut state, "a1", "A0", "A0");
        vote(&mut conductor, &mut state, "a2", "A0", "A0");
        vote(&mut conductor, &mut state, "a3", "B0", "B0");
        vote(&mut conductor, &mut state, "a4", "B0", "B0");
        vote(&mut conductor, &mut state, "b1", "C0", "C0");

        let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 3_000);
        let tied = events
            .iter()
            .find_map(|e| match e {
                ShowEvent::TieDetected { factions } => Some(factions.clone()),
                _ => None,
            })
            .expect("tie detected");
        assert_eq!(tied, vec![FactionId::new(0), FactionId::new(1)]);
        let winner = events
            .iter()
            .find_map(|e| match e {
                ShowEvent::TieResolved { winner } => Some(*winner),
                _ => None,
            })
            .expect("tie resolved");
        assert_eq!(winner, expected_faction);
        let reveal = find_reveal(&events);
        assert_eq!(reveal.winning_faction, expected_faction);
        // Faction 0's blocs tie 2-2; lexicographic break picks A0.
        assert_eq!(reveal.winning_option, expected_option);
    }
}

#[test]
fn s3_popular_vote_diverges_from_faction_winner() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    for u in ["u1", "u2", "u3"] {
        add_user(&mut state, u, Some(0));
    }
    run_row(&mut state, RowPhase::Voting);
    for u in ["u1", "u2", "u3"] {
        vote(&mut conductor, &mut state, u, "A0", "B0");
    }

    let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 3_000);
    let reveal = find_reveal(&events);
    assert_eq!(reveal.winning_option, "A0");
    assert_eq!(reveal.popular.winner, "B0");
    assert!(reveal.popular.diverged_from_faction);
    assert_eq!(state.paths.popular_path[0], "B0");
    assert_eq!(state.paths.faction_path[0], "A0");
}

#[test]
fn s4_coup_threshold_fires_on_second_vote() {
    let mut conductor = Conductor::new();
    let mut state = state_with(2);
    for u in ["c1", "c2", "c3", "c4"] {
        add_user(&mut state, u, Some(2));
    }
    run_row(&mut state, RowPhase::CoupWindow);

    let events = conductor.process(
        &mut state,
        &ShowCommand::SubmitCoupVote {
            user_id: "c1".into(),
        },
        2_000,
    );
    assert!(matches!(
        events[0],
        ShowEvent::CoupMeterUpdate { progress, .. } if progress == 0.25
    ));

    let events = conductor.process(
        &mut state,
        &ShowCommand::SubmitCoupVote {
            user_id: "c2".into(),
        },
        2_100,
    );
    assert!(events.iter().any(|e| matches!(
        e,
        ShowEvent::CoupTriggered { faction, .. } if *faction == FactionId::new(2)
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::Audio(AudioCue::UncommitLayer { row: 0 }))));
    assert!(state.factions[2].coup_used);
    assert_eq!(state.factions[2].coup_multiplier, 1.5);
    assert_eq!(state.rows[0].attempts, 1);
    assert_eq!(state.rows[0].phase, RowPhase::Auditioning);
    assert_eq!(state.rows[0].audition_index, Some(0));
}

#[test]
fn s5_multi_loop_audition_cycle() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    state.config.timing.audition_loops_per_row = 2;
    state.phase = ShowPhase::Assigning;
    conductor.process(&mut state, &ShowCommand::StartShow, 2_000);
    assert_eq!(state.rows[0].audition_index, Some(0));

    let mut seen = Vec::new();
    for _ in 0..7 {
        let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_000);
        for e in &events {
            if let ShowEvent::AuditionOptionChanged { option_index, .. } = e {
                seen.push(*option_index);
            }
        }
    }
    assert_eq!(seen, vec![1, 2, 3, 0, 1, 2, 3]);

    conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_000);
    assert_eq!(state.rows[0].phase, RowPhase::Voting);
    assert_eq!(state.rows[0].audition_index, None);
}

#[test]
fn s6_disconnect_and_reconnect() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    add_user(&mut state, "u1", Some(0));

    conductor.process(
        &mut state,
        &ShowCommand::UserDisconnect {
            user_id: "u1".into(),
        },
        2_000,
    );
    assert!(!state.users["u1"].connected);

    let events = conductor.process(
        &mut state,
        &ShowCommand::UserReconnect {
            user_id: "u1".into(),
            last_version: 3,
        },
        2_100,
    );
    assert!(state.users["u1"].connected);
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::StateSync { user_id: Some(u) } if u == "u1")));
}

// ── Properties ─────────────────────────────────────────────────

#[test]
fn version_advances_once_per_accepted_command_only() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    assert_eq!(state.version, 0);

    // Accepted.
    conductor.process(
        &mut state,
        &ShowCommand::UserConnect {
            user_id: "u1".into(),
            seat_id: None,
            faction: None,
        },
        2_000,
    );
    assert_eq!(state.version, 1);

    // Rejected: wrong phase. Version and state untouched.
    let before = state.clone();
    let events = conductor.process(&mut state, &ShowCommand::StartShow, 2_100);
    assert!(matches!(
        events[0],
        ShowEvent::Error {
            kind: ErrorKind::InvalidPhase,
            ..
        }
    ));
    assert_eq!(state, before);

    // Ignored: vote before the show runs. No events, no change.
    let events = vote(&mut conductor, &mut state, "u1", "A0", "A0");
    assert!(events.is_empty());
    assert_eq!(state.version, 1);
}

#[test]
fn last_updated_never_goes_backwards() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    conductor.process(
        &mut state,
        &ShowCommand::UserConnect {
            user_id: "u1".into(),
            seat_id: None,
            faction: None,
        },
        5_000,
    );
    assert_eq!(state.last_updated, 5_000);
    conductor.process(
        &mut state,
        &ShowCommand::UserConnect {
            user_id: "u2".into(),
            seat_id: None,
            faction: None,
        },
        4_000,
    );
    assert_eq!(state.last_updated, 5_000);
    assert_eq!(state.version, 2);
}

#[test]
fn vote_resubmission_replaces() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    add_user(&mut state, "u1", Some(0));
    run_row(&mut state, RowPhase::Voting);

    vote(&mut conductor, &mut state, "u1", "A0", "A0");
    vote(&mut conductor, &mut state, "u1", "B0", "C0");

    assert_eq!(state.votes.len(), 1);
    assert_eq!(state.votes[0].faction_vote, "B0");
    assert_eq!(state.votes[0].personal_vote, "C0");
    assert_eq!(state.personal_trees["u1"].path[&0], "C0");
}

#[test]
fn voting_during_audition_follows_config() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    add_user(&mut state, "u1", Some(0));
    run_row(&mut state, RowPhase::Auditioning);

    state.config.voting.allow_during_audition = false;
    let events = vote(&mut conductor, &mut state, "u1", "A0", "A0");
    assert!(events.is_empty());
    assert!(state.votes.is_empty());

    state.config.voting.allow_during_audition = true;
    vote(&mut conductor, &mut state, "u1", "A0", "A0");
    assert_eq!(state.votes.len(), 1);
}

#[test]
fn coup_vote_is_idempotent_per_user() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    for u in ["c1", "c2", "c3", "c4", "c5", "c6"] {
        add_user(&mut state, u, Some(1));
    }
    run_row(&mut state, RowPhase::CoupWindow);

    for _ in 0..3 {
        conductor.process(
            &mut state,
            &ShowCommand::SubmitCoupVote {
                user_id: "c1".into(),
            },
            2_000,
        );
    }
    assert_eq!(state.factions[1].coup_votes.len(), 1);
}

#[test]
fn coup_vote_from_unknown_user_surfaces_error() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    run_row(&mut state, RowPhase::CoupWindow);
    let events = conductor.process(
        &mut state,
        &ShowCommand::SubmitCoupVote {
            user_id: "ghost".into(),
        },
        2_000,
    );
    assert!(matches!(
        events[0],
        ShowEvent::Error {
            kind: ErrorKind::MissingUser,
            ..
        }
    ));
}

#[test]
fn coup_multiplier_resets_on_next_row_entry() {
    let mut conductor = Conductor::new();
    let mut state = state_with(2);
    add_user(&mut state, "u1", Some(0));
    run_row(&mut state, RowPhase::Committed);
    state.rows[0].committed_option = Some("A0".into());
    state.paths.faction_path.push("A0".into());
    state.paths.popular_path.push("A0".into());
    state.factions[0].coup_multiplier = 1.5;
    state.factions[0].coup_votes.insert("u1".into());

    conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_000);
    assert_eq!(state.current_row_index, 1);
    assert_eq!(state.rows[1].phase, RowPhase::Auditioning);
    assert_eq!(state.factions[0].coup_multiplier, 1.0);
    assert!(state.factions[0].coup_votes.is_empty());
    // coup_used is never cleared mid-show.
    state.factions[0].coup_used = true;
    conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_100);
    assert!(state.factions[0].coup_used);
}

#[test]
fn path_lengths_track_committed_rows() {
    let mut conductor = Conductor::new();
    let mut state = state_with(3);
    run_row(&mut state, RowPhase::Auditioning);

    conductor.process(&mut state, &ShowCommand::SkipRow, 2_000);
    assert_eq!(state.paths.faction_path.len(), 1);
    assert_eq!(state.paths.popular_path.len(), 1);

    conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_100); // row 1 audition
    conductor.process(&mut state, &ShowCommand::SkipRow, 2_200);
    assert_eq!(state.paths.faction_path.len(), 2);
    assert_eq!(state.paths.popular_path.len(), 2);
    let committed = state
        .rows
        .iter()
        .filter(|r| r.committed_option.is_some())
        .count();
    assert_eq!(committed, 2);
}

#[test]
fn coup_after_reveal_unwinds_commit_and_paths() {
    let mut conductor = Conductor::new();
    let mut state = state_with(2);
    for u in ["u1", "u2"] {
        add_user(&mut state, u, Some(0));
    }
    run_row(&mut state, RowPhase::Voting);
    vote(&mut conductor, &mut state, "u1", "A0", "A0");
    vote(&mut conductor, &mut state, "u2", "A0", "A0");
    conductor.process(&mut state, &ShowCommand::AdvancePhase, 3_000); // reveal
    assert_eq!(state.paths.faction_path.len(), 1);
    conductor.process(&mut state, &ShowCommand::AdvancePhase, 3_100); // coup window

    conductor.process(
        &mut state,
        &ShowCommand::TriggerCoup {
            faction: FactionId::new(1),
        },
        3_200,
    );
    assert!(state.rows[0].committed_option.is_none());
    assert!(state.paths.faction_path.is_empty());
    assert!(state.paths.popular_path.is_empty());
    assert_eq!(state.rows[0].attempts, 1);

    // Old-attempt votes stay in the log but no longer count.
    assert_eq!(state.votes.len(), 2);
    assert!(state.votes_for_attempt(0, 1).is_empty());
}

#[test]
fn pause_remembers_and_resume_restores() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    run_row(&mut state, RowPhase::Voting);

    conductor.process(&mut state, &ShowCommand::Pause, 2_000);
    assert_eq!(state.phase, ShowPhase::Paused);
    assert_eq!(state.paused_phase, Some(ShowPhase::Running));

    // Advancing while paused is rejected.
    let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_100);
    assert!(matches!(events[0], ShowEvent::Error { .. }));

    conductor.process(&mut state, &ShowCommand::Resume, 2_200);
    assert_eq!(state.phase, ShowPhase::Running);
    assert_eq!(state.paused_phase, None);
}

#[test]
fn assignment_balances_within_one() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    for i in 0..10 {
        add_user(&mut state, &format!("u{i:02}"), None);
    }
    let events = conductor.process(&mut state, &ShowCommand::AssignFactions, 2_000);
    assert_eq!(state.phase, ShowPhase::Assigning);
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::FactionsAssigned { assignments } if assignments.len() == 10)));

    let mut sizes = [0usize; 4];
    for user in state.users.values() {
        sizes[user.faction.unwrap().index()] += 1;
    }
    let max = sizes.iter().max().unwrap();
    let min = sizes.iter().min().unwrap();
    assert!(max - min <= 1, "sizes {sizes:?}");
}

#[test]
fn assignment_splits_adjacent_seats() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    // Eight seats in a ring: s0-s1-...-s7-s0.
    for i in 0..8 {
        let left = format!("s{}", (i + 7) % 8);
        let right = format!("s{}", (i + 1) % 8);
        state
            .config
            .seat_adjacency
            .insert(format!("s{i}"), [left, right].into_iter().collect());
    }
    for i in 0..8 {
        let id = format!("u{i}");
        add_user(&mut state, &id, None);
        state.users.get_mut(&id).unwrap().seat = Some(format!("s{i}"));
    }
    conductor.process(&mut state, &ShowCommand::AssignFactions, 2_000);

    let faction_of = |seat: &str| -> FactionId {
        state
            .users
            .values()
            .find(|u| u.seat.as_deref() == Some(seat))
            .and_then(|u| u.faction)
            .unwrap()
    };
    let same_adjacent = (0..8)
        .filter(|i| faction_of(&format!("s{i}")) == faction_of(&format!("s{}", (i + 1) % 8)))
        .count();
    // Eight users over four factions can seat the ring with no two
    // neighbours sharing a faction.
    assert_eq!(same_adjacent, 0);
}

#[test]
fn latecomer_joins_smallest_faction() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    add_user(&mut state, "a", Some(0));
    add_user(&mut state, "b", Some(1));
    add_user(&mut state, "c", Some(2));
    run_row(&mut state, RowPhase::Auditioning);

    let events = conductor.process(
        &mut state,
        &ShowCommand::UserConnect {
            user_id: "late".into(),
            seat_id: None,
            faction: None,
        },
        2_000,
    );
    assert_eq!(state.users["late"].faction, Some(FactionId::new(3)));
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::FactionAssigned { faction, .. } if *faction == FactionId::new(3))));
}

#[test]
fn set_timing_merges_partial_overrides() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    let before_voting = state.config.timing.voting_window_ms;
    conductor.process(
        &mut state,
        &ShowCommand::SetTiming(TimingOverride {
            coup_window_ms: Some(4_000),
            ..Default::default()
        }),
        2_000,
    );
    assert_eq!(state.config.timing.coup_window_ms, 4_000);
    assert_eq!(state.config.timing.voting_window_ms, before_voting);
}

#[test]
fn force_finale_emits_popular_song() {
    let mut conductor = Conductor::new();
    let mut state = state_with(2);
    state.paths.popular_path = vec!["B0".into(), "C1".into()];
    state.paths.faction_path = vec!["A0".into(), "A1".into()];
    run_row(&mut state, RowPhase::Voting);

    let events = conductor.process(&mut state, &ShowCommand::ForceFinale, 2_000);
    assert_eq!(state.phase, ShowPhase::Finale);
    assert!(events.iter().any(
        |e| matches!(e, ShowEvent::FinalePopularSong { path } if path == &state.paths.popular_path)
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        ShowEvent::Audio(AudioCue::PlayTimeline { path, user_id: None }) if path.len() == 2
    )));
}

#[test]
fn reset_to_lobby_preserving_users() {
    let mut conductor = Conductor::new();
    let mut state = state_with(2);
    add_user(&mut state, "u1", Some(0));
    state.factions[0].coup_used = true;
    state.factions[0].coup_multiplier = 1.5;
    state.paths.faction_path.push("A0".into());
    state.paths.popular_path.push("A0".into());
    run_row(&mut state, RowPhase::CoupWindow);

    conductor.process(
        &mut state,
        &ShowCommand::ResetToLobby {
            preserve_users: true,
        },
        2_000,
    );
    assert_eq!(state.phase, ShowPhase::Lobby);
    assert!(state.users.contains_key("u1"));
    assert_eq!(state.users["u1"].faction, None);
    assert!(!state.factions[0].coup_used);
    assert_eq!(state.factions[0].coup_multiplier, 1.0);
    assert!(state.paths.faction_path.is_empty());
    assert!(state.rows.iter().all(|r| r.phase == RowPhase::Pending));

    conductor.process(
        &mut state,
        &ShowCommand::ResetToLobby {
            preserve_users: false,
        },
        2_100,
    );
    assert!(state.users.is_empty());
    assert!(state.personal_trees.is_empty());
}

#[test]
fn import_state_overwrites_and_advances_version() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    let mut snapshot = state.clone();
    snapshot.version = 41;
    snapshot.phase = ShowPhase::Finale;

    let events = conductor.process(
        &mut state,
        &ShowCommand::ImportState(Box::new(snapshot)),
        2_000,
    );
    assert_eq!(state.phase, ShowPhase::Finale);
    assert_eq!(state.version, 42);
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::StateSync { user_id: None })));
}

#[test]
fn reveal_with_no_votes_commits_first_option() {
    let mut conductor = Conductor::with_tie_break(Box::new(SequenceTieBreak::new([2])));
    let mut state = state_with(1);
    run_row(&mut state, RowPhase::Voting);

    let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_000);
    // All four factions tie at zero coherence.
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::TieDetected { factions } if factions.len() == 4)));
    let reveal = find_reveal(&events);
    assert_eq!(reveal.winning_option, "A0");
    assert_eq!(reveal.popular.winner, "A0");
    assert_eq!(state.rows[0].committed_option.as_deref(), Some("A0"));
}

#[test]
fn advancing_past_last_row_enters_finale() {
    let mut conductor = Conductor::new();
    let mut state = state_with(1);
    run_row(&mut state, RowPhase::Committed);
    state.rows[0].committed_option = Some("A0".into());
    state.paths.faction_path.push("A0".into());
    state.paths.popular_path.push("A0".into());

    let events = conductor.process(&mut state, &ShowCommand::AdvancePhase, 2_000);
    assert_eq!(state.phase, ShowPhase::Finale);
    assert!(events
        .iter()
        .any(|e| matches!(e, ShowEvent::FinalePopularSong { .. })));
}
