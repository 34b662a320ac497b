//! Record of box types nobody knows how to interpret, kept across sessions
//! so they can be looked up and added to the catalog later.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::ResearchLogError;

/// Entries order by box type, then file, then offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResearchLogEntry {
    pub box_type: String,
    pub file_path: String,
    pub start_offset: u64,
    pub end_offset: u64,
}

/// Sink for unknown-box sightings. Recording the same entry twice is a no-op.
pub trait ResearchLogRecording: Send + Sync + fmt::Debug {
    fn record(&self, entry: ResearchLogEntry);

    fn entries(&self) -> Vec<ResearchLogEntry>;
}

/// Keeps entries for the lifetime of the value only.
#[derive(Debug, Default)]
pub struct InMemoryResearchLog {
    entries: Mutex<BTreeSet<ResearchLogEntry>>,
}

impl InMemoryResearchLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ResearchLogRecording for InMemoryResearchLog {
    fn record(&self, entry: ResearchLogEntry) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).insert(entry);
    }

    fn entries(&self) -> Vec<ResearchLogEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }
}

/// Research log persisted as a sorted JSON array, rewritten whenever a new
/// entry arrives.
#[derive(Debug)]
pub struct ResearchLogWriter {
    path: PathBuf,
    entries: Mutex<BTreeSet<ResearchLogEntry>>,
}

impl ResearchLogWriter {
    /// Open `path`, loading whatever a previous session left there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ResearchLogError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeSet::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<ResearchLogEntry>>(&bytes)?.into_iter().collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "research log opened");
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    /// `$HOME/.isoinspect/research-log.json`
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(Path::new(&home).join(".isoinspect").join("research-log.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeSet<ResearchLogEntry>) -> Result<(), ResearchLogError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(&entries.iter().collect::<Vec<_>>())?;
        // Write beside the target and rename so readers never see half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ResearchLogRecording for ResearchLogWriter {
    fn record(&self, entry: ResearchLogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.insert(entry) {
            return;
        }
        if let Err(e) = self.persist(&entries) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist research log");
        }
    }

    fn entries(&self) -> Vec<ResearchLogEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }
}
