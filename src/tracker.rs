use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;

pub const SNAPSHOT_FILE: &str = ".fetched.json";

/// Set of source URLs already processed, gating link scheduling so reruns
/// never refetch (or re-row) a page. Grows monotonically; persisted once at
/// shutdown.
pub struct FetchTracker {
    seen: HashSet<String>,
    snapshot_path: PathBuf,
}

impl FetchTracker {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self {
            seen: HashSet::new(),
            snapshot_path,
        }
    }

    /// Load the identity set from the local snapshot. Failures are non-fatal:
    /// the run starts from an empty set.
    pub fn restore(&mut self) {
        match fs::read_to_string(&self.snapshot_path) {
            Ok(text) => match serde_json::from_str::<HashSet<String>>(&text) {
                Ok(set) => {
                    info!("Restored {} fetched identifiers", set.len());
                    self.seen = set;
                }
                Err(e) => warn!(
                    "Unable to load fetched set from {}: {}",
                    self.snapshot_path.display(),
                    e
                ),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Unable to load fetched set from {}: {}",
                self.snapshot_path.display(),
                e
            ),
        }
    }

    /// Alternate restore: list every source identifier already stored in the
    /// record store.
    pub fn restore_from_store(&mut self, conn: &Connection) -> Result<()> {
        let sources = db::list_sources(conn)?;
        info!("Restored {} fetched identifiers from record store", sources.len());
        self.seen.extend(sources);
        Ok(())
    }

    pub fn should_follow(&self, url: &str) -> bool {
        !self.seen.contains(url)
    }

    pub fn mark_seen(&mut self, url: &str) {
        self.seen.insert(url.to_string());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Serialize the full identity set. Called exactly once, at shutdown.
    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.seen)?;
        fs::write(&self.snapshot_path, json)?;
        Ok(())
    }
}

// ── Tests ──
