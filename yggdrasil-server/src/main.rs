//! Yggdrasil show server.
//!
//! Wires the core, transport, and audio crates together: one loop thread
//! owns the state and linearises every command source (client sockets,
//! wall-clock timers, DAW beats, heartbeat expiry). Everything that follows
//! an accepted command (snapshot, backups, audio cues, broadcast) happens
//! here, outside the Conductor.

mod settings;
mod show_file;

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use yggdrasil_audio::{beat_events, AudioRouter, DawBridge, NullBridge, OscBridge};
use yggdrasil_core::conductor::Conductor;
use yggdrasil_core::persistence::{BackupWriter, Persistence};
use yggdrasil_core::store::ShowStore;
use yggdrasil_core::timing::TimingEngine;
use yggdrasil_net::{ConnId, HeartbeatConfig, ServerInput, ShowServer};
use yggdrasil_types::{
    ShowCommand, ShowEvent, ShowPhase, ShowState, Timestamp, OPTIONS_PER_ROW,
};

use settings::Settings;

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let log_path = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("yggdrasil")
        .join("server.log");
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let log_file = File::create(&log_path)
        .unwrap_or_else(|_| File::create("/tmp/yggdrasil-server.log").expect("cannot create log file"));

    WriteLogger::init(log_level, Config::default(), log_file).expect("failed to initialize logger");
    info!("yggdrasil server starting (log level {:?})", log_level);
}

fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let show_path = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with('-'))
        .cloned()
        .unwrap_or_else(|| "show.toml".to_string());

    let settings = Settings::from_env();
    let config = match show_file::load(std::path::Path::new(&show_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load show file: {e}");
            error!("cannot load show file: {}", e);
            std::process::exit(1);
        }
    };

    run(settings, config)
}

fn run(settings: Settings, config: yggdrasil_types::ShowConfig) -> std::io::Result<()> {
    // Persistence failure at start-up is fatal; everything downstream
    // assumes snapshots can be written.
    if let Some(parent) = settings.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut persistence = match Persistence::open(&settings.db_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("cannot open persistence at {}: {e}", settings.db_path.display());
            error!("cannot open persistence: {}", e);
            std::process::exit(1);
        }
    };

    let state = match persistence.load_snapshot(&config.show_id) {
        Ok(Some(state)) => {
            info!(
                "resuming show '{}' at v{} ({:?})",
                state.id, state.version, state.phase
            );
            state
        }
        Ok(None) => {
            info!("starting fresh show '{}'", config.show_id);
            ShowState::new(config.clone(), now_ms())
        }
        Err(e) => {
            warn!("snapshot load failed, starting fresh: {}", e);
            ShowState::new(config.clone(), now_ms())
        }
    };

    let mut store = ShowStore::new(state);
    let mut conductor = Conductor::new();
    let mut timing = TimingEngine::new(settings.external_clock);

    let bridge: Arc<dyn DawBridge> = if settings.daw_enabled {
        let target = format!("{}:{}", settings.daw_host, settings.daw_send_port);
        match OscBridge::new(&target, settings.osc_recv_port) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                warn!("osc bridge unavailable ({}), using null bridge", e);
                Arc::new(NullBridge)
            }
        }
    } else {
        info!("daw disabled, using null bridge");
        Arc::new(NullBridge)
    };
    let beats = beat_events(bridge.as_ref());
    bridge.subscribe(
        "/live/test",
        Box::new(|_| info!("daw answered the test probe")),
    );
    let mut router = AudioRouter::new(Arc::clone(&bridge));
    router.probe_track_count(store.state().rows.len() * OPTIONS_PER_ROW);

    let heartbeat = HeartbeatConfig {
        interval: settings.heartbeat_interval,
        ..HeartbeatConfig::default()
    };
    let mut server = ShowServer::bind(&settings.bind_addr, heartbeat)?;
    let backups = BackupWriter::new(&settings.backup_dir, "yggdrasil", settings.max_backups)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            warn!("could not install signal handler: {}", e);
        }
    }

    let mut last_periodic_backup = Instant::now();
    info!(
        "show '{}' ready: {} rows, listening on {}",
        store.state().id,
        store.state().rows.len(),
        settings.bind_addr
    );

    while !shutdown.load(Ordering::SeqCst) {
        server.accept_connections();

        let mut inputs = server.poll(store.state());
        inputs.extend(server.tick_heartbeat());
        for input in inputs {
            let (origin, command) = match input {
                ServerInput::Command { conn, command } => (Some(conn), command),
                ServerInput::Internal { command } => (None, command),
            };
            dispatch(
                &mut store,
                &mut conductor,
                &mut timing,
                &mut persistence,
                &backups,
                &mut router,
                &mut server,
                origin,
                &command,
            );
        }

        while let Ok(beat) = beats.try_recv() {
            if let Some(command) = timing.on_beat(beat, store.version()) {
                dispatch(
                    &mut store,
                    &mut conductor,
                    &mut timing,
                    &mut persistence,
                    &backups,
                    &mut router,
                    &mut server,
                    None,
                    &command,
                );
            }
        }

        if let Some(command) = timing.poll(store.version(), Instant::now()) {
            dispatch(
                &mut store,
                &mut conductor,
                &mut timing,
                &mut persistence,
                &backups,
                &mut router,
                &mut server,
                None,
                &command,
            );
        }

        if let Some(interval) = settings.backup_interval {
            if last_periodic_backup.elapsed() >= interval {
                last_periodic_backup = Instant::now();
                if let Err(e) = backups.write(store.state()) {
                    warn!("periodic backup failed: {}", e);
                }
            }
        }

        thread::sleep(Duration::from_millis(2));
    }

    info!("shutting down");
    bridge.stop();
    if let Err(e) = backups.write(store.state()) {
        warn!("final backup failed: {}", e);
    }
    server.shutdown();
    drop(persistence);
    Ok(())
}

/// Run one command through the conductor, then do everything the accepted
/// command implies: snapshot, analytics, audio, backups, broadcast,
/// rescheduling.
#[allow(clippy::too_many_arguments)]
fn dispatch(
    store: &mut ShowStore,
    conductor: &mut Conductor,
    timing: &mut TimingEngine,
    persistence: &mut Persistence,
    backups: &BackupWriter,
    router: &mut AudioRouter,
    server: &mut ShowServer,
    origin: Option<ConnId>,
    command: &ShowCommand,
) {
    let version_before = store.version();
    let now = now_ms();
    let events = store.apply(conductor, command, now);

    for event in &events {
        if let ShowEvent::Error { kind, message } = event {
            match origin {
                Some(conn) => server.send_error(
                    conn,
                    format!("{kind:?}: {message}"),
                    Some(command.name().to_string()),
                ),
                None => warn!("internal command {} rejected: {}", command.name(), message),
            }
        }
    }
    if store.version() == version_before {
        // Ignored or rejected: nothing changed, nothing to fan out.
        return;
    }

    // The command already stands in memory; a failed write is an operator
    // problem (export a backup), not a rollback.
    if let Err(e) = persistence.save_snapshot(store.state()) {
        error!("snapshot write failed (command stands): {}", e);
    }
    record_analytics(persistence, store.state(), command, &events, now);

    router.handle_events(&events);

    let mut phase_backup = false;
    for event in &events {
        match event {
            ShowEvent::ShowPhaseChanged { phase }
                if matches!(phase, ShowPhase::Running | ShowPhase::Finale) =>
            {
                phase_backup = true;
            }
            ShowEvent::FactionAssigned { user_id, faction } => {
                server.join_faction_room(user_id, *faction);
            }
            // A reconnecting user keeps their faction; re-join the room.
            ShowEvent::UserJoined { user_id, .. } => {
                if let Some(faction) = store
                    .state()
                    .users
                    .get(user_id)
                    .and_then(|u| u.faction)
                {
                    server.join_faction_room(user_id, faction);
                }
            }
            ShowEvent::FactionsAssigned { assignments } => {
                for (user_id, faction) in assignments {
                    server.join_faction_room(user_id, *faction);
                }
            }
            ShowEvent::ForceReconnect => server.force_reconnect_all(),
            _ => {}
        }
    }
    if phase_backup {
        if let Err(e) = backups.write(store.state()) {
            error!("phase backup failed: {}", e);
        }
    }

    server.broadcast_state(store.state());
    timing.observe(store.state(), Instant::now());
}

/// Append-only analysis rows; never authoritative, never fatal.
fn record_analytics(
    persistence: &Persistence,
    state: &ShowState,
    command: &ShowCommand,
    events: &[ShowEvent],
    now: Timestamp,
) {
    for event in events {
        match event {
            ShowEvent::UserJoined { user_id, .. } => {
                if let Some(user) = state.users.get(user_id) {
                    if let Err(e) = persistence.record_user(&state.id, user) {
                        warn!("user analytics write failed: {}", e);
                    }
                }
            }
            ShowEvent::VoteReceived {
                user_id,
                row_index,
                attempt,
            } => {
                if let Some(vote) = state.vote_for(user_id, *row_index, *attempt) {
                    if let Err(e) = persistence.record_vote(&state.id, vote) {
                        warn!("vote analytics write failed: {}", e);
                    }
                }
            }
            _ => {}
        }
    }
    if let ShowCommand::SubmitFigTreeResponse { user_id, text } = command {
        if let Err(e) = persistence.record_response(&state.id, user_id, text, now) {
            warn!("response analytics write failed: {}", e);
        }
    }
}
