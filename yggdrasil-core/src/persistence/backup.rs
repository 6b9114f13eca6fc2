//! Timestamped JSON file backups.
//!
//! Written at phase boundaries that enter running or finale, and on the
//! optional periodic timer. Files are named
//! `{prefix}-{show_id}-{timestamp}-v{version}.json` where the timestamp is
//! ISO 8601 with ':' and '.' replaced by '-'. A prune pass keeps the N
//! newest files by modification time. Any backup loads back through the
//! `ImportState` command.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::{info, warn};

use yggdrasil_types::ShowState;

pub struct BackupWriter {
    dir: PathBuf,
    prefix: String,
    max_files: usize,
}

impl BackupWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, max_files: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.to_string(),
            max_files: max_files.max(1),
        })
    }

    /// Write one backup file and prune old ones.
    pub fn write(&self, state: &ShowState) -> io::Result<PathBuf> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let stamp: String = stamp
            .chars()
            .map(|c| if c == ':' || c == '.' { '-' } else { c })
            .collect();
        let name = format!("{}-{}-{}-v{}.json", self.prefix, state.id, stamp, state.version);
        let path = self.dir.join(name);

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        info!("wrote backup {}", path.display());

        if let Err(e) = self.prune() {
            warn!("backup prune failed: {}", e);
        }
        Ok(path)
    }

    /// Unlink everything but the newest `max_files` backups.
    fn prune(&self) -> io::Result<()> {
        let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&self.prefix) || !name.ends_with(".json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push((modified, entry.path()));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in files.into_iter().skip(self.max_files) {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Load a backup file back into a state value.
    pub fn load(path: &Path) -> io::Result<ShowState> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
