//! The authoritative show state model.
//!
//! `ShowState` is the single root value; everything nested is exclusively
//! owned by it and cross-references use identifiers only. All mutation goes
//! through the Conductor, which bumps `version` exactly once per accepted
//! command.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    wire, FactionId, OptionId, SeatId, ShowConfig, ShowId, Timestamp, UserId, FACTION_COUNT,
};

/// Top-level show lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowPhase {
    Lobby,
    Assigning,
    Running,
    Finale,
    Ended,
    Paused,
}

/// Per-row sub-state machine. Initial `Pending`, terminal `Committed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPhase {
    Pending,
    Auditioning,
    Voting,
    Revealing,
    CoupWindow,
    Committed,
}

/// One audience member. Never destroyed within a show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub seat: Option<SeatId>,
    /// None until faction assignment.
    pub faction: Option<FactionId>,
    pub connected: bool,
    pub joined_at: Timestamp,
}

/// One of the four factions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub name: String,
    pub color: String,
    /// Monotonic false -> true, once per show.
    pub coup_used: bool,
    /// 1.0 normally; 1 + bonus on the row where this faction's coup fired.
    pub coup_multiplier: f64,
    /// Members who have voted for a coup on the current row.
    pub coup_votes: BTreeSet<UserId>,
}

/// One option within a row. Immutable after configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOption {
    pub id: OptionId,
    /// Index within the row, 0..4.
    pub index: u8,
    /// DAW clip reference.
    pub clip: String,
    pub harmonic_group: Option<String>,
}

/// One step of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub index: usize,
    pub label: String,
    pub kind: String,
    pub options: Vec<RowOption>,
    pub phase: RowPhase,
    pub committed_option: Option<OptionId>,
    /// Increments on coup or restart.
    pub attempts: u32,
    /// Monotonic audition step counter; `% 4` is the audible option.
    /// `Some` iff `phase == Auditioning`.
    pub audition_index: Option<u32>,
}

impl Row {
    /// The option currently sounding during audition.
    pub fn audition_option(&self) -> Option<&RowOption> {
        self.audition_index
            .map(|i| &self.options[i as usize % self.options.len()])
    }
}

/// One vote. At most one per (user, row, attempt); re-submission replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub user_id: UserId,
    pub row_index: usize,
    /// Counts toward the faction's coherence.
    pub faction_vote: OptionId,
    /// Counts toward the popular path.
    pub personal_vote: OptionId,
    pub timestamp: Timestamp,
    pub attempt: u32,
}

/// One user's path through the show by personal vote, plus their lobby
/// prompt response. Rows the user never voted on have no entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalTree {
    #[serde(with = "wire::map_as_pairs")]
    pub path: BTreeMap<usize, OptionId>,
    pub fig_tree_response: Option<String>,
}

/// The two parallel option sequences, aligned to row index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DualPaths {
    /// Coherence winners.
    pub faction_path: Vec<OptionId>,
    /// Personal-vote plurality winners.
    pub popular_path: Vec<OptionId>,
}

/// The single authoritative state root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowState {
    pub id: ShowId,
    /// Increments by exactly one per accepted command.
    pub version: u64,
    pub last_updated: Timestamp,
    pub phase: ShowPhase,
    /// Snapshot of `phase` while paused; None otherwise.
    pub paused_phase: Option<ShowPhase>,
    pub current_row_index: usize,
    pub rows: Vec<Row>,
    /// Exactly four.
    pub factions: Vec<Faction>,
    #[serde(with = "wire::map_as_pairs")]
    pub users: BTreeMap<UserId, User>,
    pub votes: Vec<Vote>,
    #[serde(with = "wire::map_as_pairs")]
    pub personal_trees: BTreeMap<UserId, PersonalTree>,
    pub paths: DualPaths,
    pub config: ShowConfig,
}

impl ShowState {
    /// Build the initial (lobby) state from a validated configuration.
    pub fn new(config: ShowConfig, now: Timestamp) -> Self {
        let rows = config
            .rows
            .iter()
            .enumerate()
            .map(|(index, rc)| Row {
                index,
                label: rc.label.clone(),
                kind: rc.kind.clone(),
                options: rc
                    .options
                    .iter()
                    .enumerate()
                    .map(|(i, oc)| RowOption {
                        id: oc.id.clone(),
                        index: i as u8,
                        clip: oc.clip.clone(),
                        harmonic_group: oc.harmonic_group.clone(),
                    })
                    .collect(),
                phase: RowPhase::Pending,
                committed_option: None,
                attempts: 0,
                audition_index: None,
            })
            .collect();

        let factions = config
            .factions
            .iter()
            .enumerate()
            .take(FACTION_COUNT)
            .map(|(i, fc)| Faction {
                id: FactionId::new(i as u8),
                name: fc.name.clone(),
                color: fc.color.clone(),
                coup_used: false,
                coup_multiplier: 1.0,
                coup_votes: BTreeSet::new(),
            })
            .collect();

        Self {
            id: config.show_id.clone(),
            version: 0,
            last_updated: now,
            phase: ShowPhase::Lobby,
            paused_phase: None,
            current_row_index: 0,
            rows,
            factions,
            users: BTreeMap::new(),
            votes: Vec::new(),
            personal_trees: BTreeMap::new(),
            paths: DualPaths::default(),
            config,
        }
    }

    /// Stamp an accepted command: version +1, monotonic `last_updated`.
    pub fn touch(&mut self, now: Timestamp) {
        self.version += 1;
        if now > self.last_updated {
            self.last_updated = now;
        }
    }

    pub fn current_row(&self) -> Option<&Row> {
        self.rows.get(self.current_row_index)
    }

    pub fn current_row_mut(&mut self) -> Option<&mut Row> {
        self.rows.get_mut(self.current_row_index)
    }

    pub fn faction(&self, id: FactionId) -> &Faction {
        &self.factions[id.index()]
    }

    pub fn faction_mut(&mut self, id: FactionId) -> &mut Faction {
        &mut self.factions[id.index()]
    }

    /// Connected members of a faction.
    pub fn connected_faction_members(&self, id: FactionId) -> usize {
        self.users
            .values()
            .filter(|u| u.connected && u.faction == Some(id))
            .count()
    }

    /// The user's vote for a (row, attempt), if any.
    pub fn vote_for(&self, user_id: &UserId, row_index: usize, attempt: u32) -> Option<&Vote> {
        self.votes
            .iter()
            .find(|v| v.user_id == *user_id && v.row_index == row_index && v.attempt == attempt)
    }

    /// All votes for a (row, attempt).
    pub fn votes_for_attempt(&self, row_index: usize, attempt: u32) -> Vec<&Vote> {
        self.votes
            .iter()
            .filter(|v| v.row_index == row_index && v.attempt == attempt)
            .collect()
    }
}
