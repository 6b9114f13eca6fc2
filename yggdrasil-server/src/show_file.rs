//! TOML show file -> validated `ShowConfig`.
//!
//! The core never parses files; everything it consumes is validated here.
//! Missing sections fall back to the compiled defaults, the way timing and
//! coup policy usually stay stock while rows and factions change per show.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use yggdrasil_types::{
    CoupConfig, FactionConfig, OptionConfig, RowConfig, ShowConfig, TimingConfig, VotingRules,
    FACTION_COUNT, OPTIONS_PER_ROW,
};

#[derive(Deserialize)]
struct RawShowFile {
    show_id: String,
    #[serde(default)]
    timing: RawTiming,
    #[serde(default)]
    coup: RawCoup,
    #[serde(default)]
    voting: RawVoting,
    factions: Vec<RawFaction>,
    rows: Vec<RawRow>,
    #[serde(default)]
    seats: RawSeats,
}

#[derive(Deserialize, Default)]
struct RawTiming {
    audition_per_option_ms: Option<u64>,
    audition_loops_per_option: Option<u32>,
    audition_loops_per_row: Option<u32>,
    voting_window_ms: Option<u64>,
    reveal_duration_ms: Option<u64>,
    coup_window_ms: Option<u64>,
    master_loop_beats: Option<u32>,
}

#[derive(Deserialize, Default)]
struct RawCoup {
    threshold: Option<f64>,
    multiplier_bonus: Option<f64>,
}

#[derive(Deserialize, Default)]
struct RawVoting {
    allow_during_audition: Option<bool>,
}

#[derive(Deserialize)]
struct RawFaction {
    name: String,
    color: String,
}

#[derive(Deserialize)]
struct RawRow {
    label: String,
    #[serde(default = "default_row_kind")]
    kind: String,
    options: Vec<RawOption>,
}

fn default_row_kind() -> String {
    "layer".to_string()
}

#[derive(Deserialize)]
struct RawOption {
    id: String,
    clip: String,
    harmonic_group: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawSeats {
    #[serde(default)]
    adjacency: BTreeMap<String, Vec<String>>,
}

/// Load and validate a show file.
pub fn load(path: &Path) -> Result<ShowConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read {}: {}", path.display(), e))?;
    let raw: RawShowFile =
        toml::from_str(&contents).map_err(|e| format!("malformed {}: {}", path.display(), e))?;
    validate(raw)
}

fn validate(raw: RawShowFile) -> Result<ShowConfig, String> {
    if raw.show_id.trim().is_empty() {
        return Err("show_id must not be empty".into());
    }
    if raw.factions.len() != FACTION_COUNT {
        return Err(format!(
            "expected exactly {} factions, found {}",
            FACTION_COUNT,
            raw.factions.len()
        ));
    }
    if raw.rows.is_empty() {
        return Err("a show needs at least one row".into());
    }
    for (i, row) in raw.rows.iter().enumerate() {
        if row.options.len() != OPTIONS_PER_ROW {
            return Err(format!(
                "row {} ('{}') has {} options; exactly {} required",
                i,
                row.label,
                row.options.len(),
                OPTIONS_PER_ROW
            ));
        }
    }
    {
        let mut seen = BTreeSet::new();
        for row in &raw.rows {
            for option in &row.options {
                if !seen.insert(option.id.as_str()) {
                    return Err(format!("duplicate option id '{}'", option.id));
                }
            }
        }
    }

    let defaults = TimingConfig::default();
    let timing = TimingConfig {
        audition_per_option_ms: raw
            .timing
            .audition_per_option_ms
            .unwrap_or(defaults.audition_per_option_ms),
        audition_loops_per_option: raw
            .timing
            .audition_loops_per_option
            .unwrap_or(defaults.audition_loops_per_option),
        audition_loops_per_row: raw
            .timing
            .audition_loops_per_row
            .unwrap_or(defaults.audition_loops_per_row),
        voting_window_ms: raw.timing.voting_window_ms.unwrap_or(defaults.voting_window_ms),
        reveal_duration_ms: raw
            .timing
            .reveal_duration_ms
            .unwrap_or(defaults.reveal_duration_ms),
        coup_window_ms: raw.timing.coup_window_ms.unwrap_or(defaults.coup_window_ms),
        master_loop_beats: raw
            .timing
            .master_loop_beats
            .unwrap_or(defaults.master_loop_beats),
    };

    let coup_defaults = CoupConfig::default();
    let coup = CoupConfig {
        threshold: raw.coup.threshold.unwrap_or(coup_defaults.threshold),
        multiplier_bonus: raw
            .coup
            .multiplier_bonus
            .unwrap_or(coup_defaults.multiplier_bonus),
    };
    if !(0.0..=1.0).contains(&coup.threshold) || coup.threshold == 0.0 {
        return Err(format!("coup threshold {} outside (0, 1]", coup.threshold));
    }

    Ok(ShowConfig {
        show_id: raw.show_id,
        rows: raw
            .rows
            .into_iter()
            .map(|r| RowConfig {
                label: r.label,
                kind: r.kind,
                options: r
                    .options
                    .into_iter()
                    .map(|o| OptionConfig {
                        id: o.id,
                        clip: o.clip,
                        harmonic_group: o.harmonic_group,
                    })
                    .collect(),
            })
            .collect(),
        factions: raw
            .factions
            .into_iter()
            .map(|f| FactionConfig {
                name: f.name,
                color: f.color,
            })
            .collect(),
        timing,
        coup,
        voting: VotingRules {
            allow_during_audition: raw
                .voting
                .allow_during_audition
                .unwrap_or(VotingRules::default().allow_during_audition),
        },
        seat_adjacency: raw
            .seats
            .adjacency
            .into_iter()
            .map(|(seat, adj)| (seat, adj.into_iter().collect()))
            .collect(),
    })
}
