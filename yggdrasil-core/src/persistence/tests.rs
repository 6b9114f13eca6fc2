use std::collections::BTreeMap;

use tempfile::{NamedTempFile, TempDir};

use yggdrasil_types::{
    CoupConfig, FactionConfig, FactionId, OptionConfig, RowConfig, ShowConfig, ShowState,
    TimingConfig, User, Vote, VotingRules,
};

use super::{BackupWriter, Persistence};

fn test_config() -> ShowConfig {
    ShowConfig {
        show_id: "persist-show".into(),
        rows: vec![RowConfig {
            label: "Row 0".into(),
            kind: "melody".into(),
            options: (0..4)
                .map(|o| OptionConfig {
                    id: format!("o{o}"),
                    clip: format!("clip{o}"),
                    harmonic_group: None,
                })
                .collect(),
        }],
        factions: (0..4)
            .map(|i| FactionConfig {
                name: format!("F{i}"),
                color: "#123".into(),
            })
            .collect(),
        timing: TimingConfig::default(),
        coup: CoupConfig::default(),
        voting: VotingRules::default(),
        seat_adjacency: BTreeMap::new(),
    }
}

fn populated_state() -> ShowState {
    let mut state = ShowState::new(test_config(), 1_000);
    state.version = 17;
    state.users.insert(
        "u1".into(),
        User {
            id: "u1".into(),
            seat: Some("A1".into()),
            faction: Some(FactionId::new(1)),
            connected: false,
            joined_at: 900,
        },
    );
    state.votes.push(Vote {
        user_id: "u1".into(),
        row_index: 0,
        faction_vote: "o1".into(),
        personal_vote: "o2".into(),
        timestamp: 950,
        attempt: 0,
    });
    state.paths.faction_path.push("o1".into());
    state.paths.popular_path.push("o2".into());
    state.factions[1].coup_votes.insert("u1".into());
    state
}

#[test]
fn snapshot_roundtrips_bit_for_bit() {
    let mut store = Persistence::open_in_memory().unwrap();
    let state = populated_state();
    store.save_snapshot(&state).unwrap();

    let loaded = store.load_snapshot(&state.id).unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(loaded.users, state.users);
    assert_eq!(loaded.votes, state.votes);
    assert_eq!(loaded.paths, state.paths);
    assert_eq!(loaded.factions[1].coup_votes, state.factions[1].coup_votes);
}

#[test]
fn missing_snapshot_loads_none() {
    let store = Persistence::open_in_memory().unwrap();
    assert!(store.load_snapshot(&"nope".to_string()).unwrap().is_none());
}

#[test]
fn snapshot_upsert_keeps_latest_version() {
    let mut store = Persistence::open_in_memory().unwrap();
    let mut state = populated_state();
    store.save_snapshot(&state).unwrap();
    state.version = 18;
    state.users.clear();
    store.save_snapshot(&state).unwrap();

    let loaded = store.load_snapshot(&state.id).unwrap().unwrap();
    assert_eq!(loaded.version, 18);
    assert!(loaded.users.is_empty());
}

#[test]
fn snapshot_survives_reopen() {
    let tmp = NamedTempFile::new().unwrap();
    let state = populated_state();
    {
        let mut store = Persistence::open(tmp.path()).unwrap();
        store.save_snapshot(&state).unwrap();
    }
    let store = Persistence::open(tmp.path()).unwrap();
    let loaded = store.load_snapshot(&state.id).unwrap().unwrap();
    assert_eq!(loaded, state);
}

#[test]
fn analysis_tables_are_append_only() {
    let store = Persistence::open_in_memory().unwrap();
    let state = populated_state();
    let user = &state.users["u1"];
    store.record_user(&state.id, user).unwrap();
    store.record_user(&state.id, user).unwrap();
    store.record_vote(&state.id, &state.votes[0]).unwrap();
    store
        .record_response(&state.id, &"u1".to_string(), "roots and branches", 999)
        .unwrap();

    let users: i64 = store
        .conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .unwrap();
    assert_eq!(users, 2);
    let votes: i64 = store
        .conn
        .query_row("SELECT COUNT(*) FROM votes", [], |r| r.get(0))
        .unwrap();
    assert_eq!(votes, 1);
    let responses: i64 = store
        .conn
        .query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))
        .unwrap();
    assert_eq!(responses, 1);
}

#[test]
fn backup_filename_carries_show_and_version() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path(), "ygg", 10).unwrap();
    let state = populated_state();

    let path = writer.write(&state).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("ygg-persist-show-"));
    assert!(name.ends_with("-v17.json"));
    assert!(!name.contains(':'));
}

#[test]
fn backup_roundtrips_through_load() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path(), "ygg", 10).unwrap();
    let state = populated_state();

    let path = writer.write(&state).unwrap();
    let loaded = BackupWriter::load(&path).unwrap();
    assert_eq!(loaded, state);
}

#[test]
fn prune_keeps_newest_files() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path(), "ygg", 3).unwrap();
    let mut state = populated_state();

    for v in 0..6 {
        state.version = v;
        writer.write(&state).unwrap();
        // mtime resolution on some filesystems is coarse; space the writes.
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    let count = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(count, 3);
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert!(names.iter().any(|n| n.ends_with("-v5.json")));
    assert!(!names.iter().any(|n| n.ends_with("-v0.json")));
}
