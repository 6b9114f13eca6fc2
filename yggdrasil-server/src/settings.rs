//! Runtime settings from environment variables.
//!
//! Everything has a code default so a bare `yggdrasil-server show.toml`
//! works on a laptop; production overrides live in the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone)]
pub struct Settings {
    /// TCP bind address for show clients.
    pub bind_addr: String,
    pub daw_host: String,
    pub daw_send_port: u16,
    /// Local UDP port for replies and beat ticks from the DAW.
    pub osc_recv_port: u16,
    /// False runs the null bridge (rehearsal without a DAW).
    pub daw_enabled: bool,
    /// Drive auditioning from the DAW beat counter instead of timers.
    pub external_clock: bool,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
    /// Periodic backup cadence; None disables the timer (phase-boundary
    /// backups still happen).
    pub backup_interval: Option<Duration>,
    pub max_backups: usize,
    pub heartbeat_interval: Duration,
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("ignoring malformed {}={}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("yggdrasil")
}

impl Settings {
    pub fn from_env() -> Self {
        let backup_interval_secs: u64 = env_parse("YGG_BACKUP_INTERVAL_SECS", 0);
        Self {
            bind_addr: std::env::var("YGG_BIND").unwrap_or_else(|_| "0.0.0.0:9090".into()),
            daw_host: std::env::var("YGG_DAW_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            daw_send_port: env_parse("YGG_DAW_SEND_PORT", 11_000),
            osc_recv_port: env_parse("YGG_OSC_RECV_PORT", 11_001),
            daw_enabled: env_flag("YGG_DAW_ENABLED", true),
            external_clock: env_flag("YGG_EXTERNAL_CLOCK", false),
            db_path: std::env::var("YGG_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir().join("show.sqlite")),
            backup_dir: std::env::var("YGG_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir().join("backups")),
            backup_interval: (backup_interval_secs > 0)
                .then(|| Duration::from_secs(backup_interval_secs)),
            max_backups: env_parse("YGG_MAX_BACKUPS", 10),
            heartbeat_interval: Duration::from_secs(env_parse("YGG_HEARTBEAT_SECS", 15)),
        }
    }
}
