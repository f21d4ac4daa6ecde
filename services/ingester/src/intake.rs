//! Polling intake directory watcher.
//!
//! Each scan claims files not already being processed. A claimed file
//! stays on disk until its event settles: processed files are removed,
//! dead-lettered ones are moved under the failed directory, and released
//! ones (interrupted or deferred) are left in place for a later scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IntakeConfig;

/// How an intake event ended, from the intake directory's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Ownership passed to the outbox; the file is no longer needed
    Processed,
    /// Moved to the failed directory for operator inspection
    DeadLettered,
    /// Left in place to be picked up again
    Released,
}

pub struct IntakeWatcher {
    watch_dir: PathBuf,
    failed_dir: PathBuf,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl IntakeWatcher {
    pub fn new(config: &IntakeConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.watch_dir)?;
        std::fs::create_dir_all(&config.failed_dir)?;
        Ok(Self {
            watch_dir: config.watch_dir.clone(),
            failed_dir: config.failed_dir.clone(),
            claimed: Mutex::new(HashSet::new()),
        })
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    fn claimed(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.claimed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of files currently claimed by the pipeline.
    pub fn in_progress(&self) -> usize {
        self.claimed().len()
    }

    /// Claim every unclaimed file, oldest first.
    ///
    /// Dot-files are skipped so uploads can be written under a temporary
    /// name and renamed into place.
    pub fn scan(&self) -> Vec<PathBuf> {
        let failed_dir = self.failed_dir.clone();
        let mut found: Vec<(SystemTime, PathBuf)> = WalkDir::new(&self.watch_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| entry.path() != failed_dir)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Could not read intake entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.into_path())
            })
            .collect();
        found.sort();

        let mut claimed = self.claimed();
        let fresh: Vec<PathBuf> = found
            .into_iter()
            .map(|(_, path)| path)
            .filter(|path| claimed.insert(path.clone()))
            .collect();

        if !fresh.is_empty() {
            debug!(count = fresh.len(), dir = %self.watch_dir.display(), "Claimed intake files");
        }
        fresh
    }

    pub fn read(&self, path: &Path) -> std::io::Result<Bytes> {
        std::fs::read(path).map(Bytes::from)
    }

    /// Finish with a claimed file.
    pub fn settle(&self, path: &Path, settlement: Settlement) -> std::io::Result<()> {
        let result = match settlement {
            Settlement::Processed => match std::fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
            Settlement::DeadLettered => self.move_to_failed(path).map(|_| ()),
            Settlement::Released => Ok(()),
        };
        self.claimed().remove(path);
        result
    }

    /// Return a claimed file without touching it.
    pub fn release(&self, path: &Path) {
        self.claimed().remove(path);
    }

    fn move_to_failed(&self, path: &Path) -> std::io::Result<PathBuf> {
        let relative = match path.strip_prefix(&self.watch_dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => PathBuf::from(path.file_name().unwrap_or_default()),
        };
        let target = self.failed_dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match std::fs::rename(path, &target) {
            Ok(()) => Ok(target),
            // Different filesystems
            Err(_) => {
                std::fs::copy(path, &target)?;
                std::fs::remove_file(path)?;
                Ok(target)
            }
        }
    }
}
