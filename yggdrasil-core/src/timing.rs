//! Hybrid phase scheduler.
//!
//! The engine observes the authoritative state after every command and
//! schedules at most one pending trigger: a wall-clock deadline for
//! voting/revealing/coup windows (and auditioning in fallback mode), or a
//! beat wait when an external musical clock drives the audition. Triggers
//! carry the state version they were scheduled under and drop themselves if
//! a manual command has moved the version on.

use std::time::{Duration, Instant};

use log::debug;
use yggdrasil_types::{RowPhase, ShowCommand, ShowPhase, ShowState};

enum Pending {
    Timer {
        fire_at: Instant,
        version: u64,
    },
    Beats {
        /// First beat observed after scheduling; elapsed counts from here.
        start_beat: Option<i64>,
        wait_beats: i64,
        version: u64,
    },
}

pub struct TimingEngine {
    /// Beat events drive auditioning instead of wall-clock timers.
    external_clock: bool,
    pending: Option<Pending>,
}

impl TimingEngine {
    pub fn new(external_clock: bool) -> Self {
        Self {
            external_clock,
            pending: None,
        }
    }

    /// Re-plan after a state change. Cancels whatever was pending.
    pub fn observe(&mut self, state: &ShowState, now: Instant) {
        self.pending = None;
        if state.phase != ShowPhase::Running {
            // Lobby, finale, and paused shows run on manual commands only;
            // resume re-observes and reschedules.
            return;
        }
        let Some(row) = state.current_row() else {
            return;
        };
        let timing = &state.config.timing;
        let version = state.version;

        self.pending = match row.phase {
            RowPhase::Auditioning if self.external_clock => Some(Pending::Beats {
                start_beat: None,
                wait_beats: timing.master_loop_beats.max(1) as i64,
                version,
            }),
            RowPhase::Auditioning => Some(Pending::Timer {
                fire_at: now
                    + Duration::from_millis(
                        timing.audition_per_option_ms
                            * timing.audition_loops_per_option.max(1) as u64,
                    ),
                version,
            }),
            RowPhase::Voting => Some(Pending::Timer {
                fire_at: now + Duration::from_millis(timing.voting_window_ms),
                version,
            }),
            RowPhase::Revealing => Some(Pending::Timer {
                fire_at: now + Duration::from_millis(timing.reveal_duration_ms),
                version,
            }),
            RowPhase::CoupWindow => Some(Pending::Timer {
                fire_at: now + Duration::from_millis(timing.coup_window_ms),
                version,
            }),
            // Committed and pending rows wait for the console.
            RowPhase::Committed | RowPhase::Pending => None,
        };
    }

    /// Wall-clock tick. Returns the command to dispatch if a deadline
    /// passed and is still current.
    pub fn poll(&mut self, state_version: u64, now: Instant) -> Option<ShowCommand> {
        let Some(Pending::Timer { fire_at, version }) = &self.pending else {
            return None;
        };
        if now < *fire_at {
            return None;
        }
        let scheduled_version = *version;
        self.pending = None;
        if scheduled_version == state_version {
            Some(ShowCommand::AdvancePhase)
        } else {
            debug!(
                "dropping stale timer (scheduled v{}, now v{})",
                scheduled_version, state_version
            );
            None
        }
    }

    /// External beat tick (`/clock/beat` or the DAW's beat counter).
    pub fn on_beat(&mut self, beat: i64, state_version: u64) -> Option<ShowCommand> {
        let Some(Pending::Beats {
            start_beat,
            wait_beats,
            version,
        }) = &mut self.pending
        else {
            return None;
        };
        if *version != state_version {
            debug!(
                "dropping stale beat wait (scheduled v{}, now v{})",
                version, state_version
            );
            self.pending = None;
            return None;
        }
        match *start_beat {
            None => {
                *start_beat = Some(beat);
                None
            }
            Some(start) if beat - start >= *wait_beats => {
                self.pending = None;
                Some(ShowCommand::AdvancePhase)
            }
            Some(_) => None,
        }
    }

    /// True when something is scheduled (test observability).
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use yggdrasil_types::{
        CoupConfig, FactionConfig, OptionConfig, RowConfig, ShowConfig, ShowState, TimingConfig,
        VotingRules,
    };

    fn running_state(row_phase: RowPhase) -> ShowState {
        let config = ShowConfig {
            show_id: "t".into(),
            rows: vec![RowConfig {
                label: "Row 0".into(),
                kind: "melody".into(),
                options: (0..4)
                    .map(|o| OptionConfig {
                        id: format!("o{o}"),
                        clip: format!("c{o}"),
                        harmonic_group: None,
                    })
                    .collect(),
            }],
            factions: (0..4)
                .map(|i| FactionConfig {
                    name: format!("F{i}"),
                    color: "#000".into(),
                })
                .collect(),
            timing: TimingConfig {
                audition_per_option_ms: 100,
                voting_window_ms: 200,
                ..TimingConfig::default()
            },
            coup: CoupConfig::default(),
            voting: VotingRules::default(),
            seat_adjacency: BTreeMap::new(),
        };
        let mut state = ShowState::new(config, 0);
        state.phase = ShowPhase::Running;
        state.version = 5;
        state.rows[0].phase = row_phase;
        if row_phase == RowPhase::Auditioning {
            state.rows[0].audition_index = Some(0);
        }
        state
    }

    #[test]
    fn fallback_audition_timer_fires_advance() {
        let mut engine = TimingEngine::new(false);
        let state = running_state(RowPhase::Auditioning);
        let start = Instant::now();
        engine.observe(&state, start);
        assert!(engine.is_armed());

        assert_eq!(engine.poll(5, start + Duration::from_millis(50)), None);
        assert_eq!(
            engine.poll(5, start + Duration::from_millis(150)),
            Some(ShowCommand::AdvancePhase)
        );
        // One-shot.
        assert!(!engine.is_armed());
    }

    #[test]
    fn stale_timer_is_dropped_when_version_moves() {
        let mut engine = TimingEngine::new(false);
        let state = running_state(RowPhase::Voting);
        let start = Instant::now();
        engine.observe(&state, start);

        // A manual command advanced the state to v6 before the deadline.
        assert_eq!(engine.poll(6, start + Duration::from_millis(500)), None);
        assert!(!engine.is_armed());
    }

    #[test]
    fn no_timer_outside_running_or_on_committed_rows() {
        let mut engine = TimingEngine::new(false);
        let mut state = running_state(RowPhase::Committed);
        engine.observe(&state, Instant::now());
        assert!(!engine.is_armed());

        state.rows[0].phase = RowPhase::Voting;
        state.phase = ShowPhase::Paused;
        engine.observe(&state, Instant::now());
        assert!(!engine.is_armed());
    }

    #[test]
    fn external_clock_counts_beats_from_first_observed() {
        let mut engine = TimingEngine::new(true);
        let mut state = running_state(RowPhase::Auditioning);
        state.config.timing.master_loop_beats = 4;
        engine.observe(&state, Instant::now());

        // First beat only anchors the count.
        assert_eq!(engine.on_beat(100, 5), None);
        assert_eq!(engine.on_beat(102, 5), None);
        assert_eq!(engine.on_beat(104, 5), Some(ShowCommand::AdvancePhase));
    }

    #[test]
    fn external_clock_voting_still_uses_wall_clock() {
        let mut engine = TimingEngine::new(true);
        let state = running_state(RowPhase::Voting);
        let start = Instant::now();
        engine.observe(&state, start);
        assert_eq!(
            engine.poll(5, start + Duration::from_millis(250)),
            Some(ShowCommand::AdvancePhase)
        );
    }

    #[test]
    fn beat_wait_dropped_on_version_change() {
        let mut engine = TimingEngine::new(true);
        let state = running_state(RowPhase::Auditioning);
        engine.observe(&state, Instant::now());
        assert_eq!(engine.on_beat(10, 5), None);
        assert_eq!(engine.on_beat(50, 9), None);
        assert!(!engine.is_armed());
    }
}
