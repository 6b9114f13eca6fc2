//! Show configuration.
//!
//! The core consumes a fully validated `ShowConfig` value; parsing a show
//! file into one is the server binary's job. All numeric policies (coup
//! threshold, timing windows, heartbeat) live here so the Conductor never
//! has to assume a default.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{wire, OptionId, SeatId, ShowId};

/// One of a row's four options, as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionConfig {
    pub id: OptionId,
    /// DAW clip reference (clip name in the session).
    pub clip: String,
    /// Optional harmonic-group tag for the projector display.
    pub harmonic_group: Option<String>,
}

/// One row of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowConfig {
    pub label: String,
    /// Free-form row type shown to clients ("rhythm", "melody", ...).
    pub kind: String,
    /// Exactly four options.
    pub options: Vec<OptionConfig>,
}

/// Display identity for one faction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionConfig {
    pub name: String,
    pub color: String,
}

/// Timing windows for the phase scheduler, in milliseconds unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long each option sounds during audition before the scheduler
    /// advances to the next one.
    pub audition_per_option_ms: u64,
    /// How many times a single option loops before the audition cursor moves.
    pub audition_loops_per_option: u32,
    /// How many full passes over the four options a row's audition makes.
    pub audition_loops_per_row: u32,
    pub voting_window_ms: u64,
    pub reveal_duration_ms: u64,
    pub coup_window_ms: u64,
    /// External-clock mode: beats per audition step.
    pub master_loop_beats: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            audition_per_option_ms: 8_000,
            audition_loops_per_option: 1,
            audition_loops_per_row: 1,
            voting_window_ms: 20_000,
            reveal_duration_ms: 8_000,
            coup_window_ms: 12_000,
            master_loop_beats: 16,
        }
    }
}

/// Partial timing update carried by the `SetTiming` command.
/// `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingOverride {
    pub audition_per_option_ms: Option<u64>,
    pub audition_loops_per_option: Option<u32>,
    pub audition_loops_per_row: Option<u32>,
    pub voting_window_ms: Option<u64>,
    pub reveal_duration_ms: Option<u64>,
    pub coup_window_ms: Option<u64>,
    pub master_loop_beats: Option<u32>,
}

impl TimingConfig {
    /// Merge a partial override into this config.
    pub fn apply(&mut self, o: &TimingOverride) {
        if let Some(v) = o.audition_per_option_ms {
            self.audition_per_option_ms = v;
        }
        if let Some(v) = o.audition_loops_per_option {
            self.audition_loops_per_option = v;
        }
        if let Some(v) = o.audition_loops_per_row {
            self.audition_loops_per_row = v;
        }
        if let Some(v) = o.voting_window_ms {
            self.voting_window_ms = v;
        }
        if let Some(v) = o.reveal_duration_ms {
            self.reveal_duration_ms = v;
        }
        if let Some(v) = o.coup_window_ms {
            self.coup_window_ms = v;
        }
        if let Some(v) = o.master_loop_beats {
            self.master_loop_beats = v;
        }
    }
}

/// Coup policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoupConfig {
    /// Fraction of a faction's connected members that must vote to fire.
    pub threshold: f64,
    /// Added to 1.0 as the coherence multiplier on the coup'd row.
    pub multiplier_bonus: f64,
}

impl Default for CoupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            multiplier_bonus: 0.5,
        }
    }
}

/// Vote-intake policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingRules {
    /// Accept votes while the row is still auditioning (the combined
    /// audition-and-vote flow) rather than only during the voting window.
    pub allow_during_audition: bool,
}

impl Default for VotingRules {
    fn default() -> Self {
        Self {
            allow_during_audition: true,
        }
    }
}

/// Validated show configuration, the input to `ShowState::new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowConfig {
    pub show_id: ShowId,
    pub rows: Vec<RowConfig>,
    /// Exactly four.
    pub factions: Vec<FactionConfig>,
    pub timing: TimingConfig,
    pub coup: CoupConfig,
    pub voting: VotingRules,
    /// Seat adjacency relation for faction assignment. An empty map is a
    /// valid (null) relation.
    #[serde(with = "wire::map_as_pairs", default)]
    pub seat_adjacency: BTreeMap<SeatId, BTreeSet<SeatId>>,
}

impl ShowConfig {
    /// Seats adjacent to `seat` under the configured relation.
    pub fn neighbors(&self, seat: &SeatId) -> Option<&BTreeSet<SeatId>> {
        self.seat_adjacency.get(seat)
    }
}
