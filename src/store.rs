//! Durable mapping from listing id to processing state.
//!
//! The whole state lives in one JSON file. Every flush rewrites it through a
//! temporary file in the same directory followed by a rename, so a crash
//! leaves either the previous or the new state on disk, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Judgment, Listing, ListingId, ProcessingRecord, ProcessingStatus};
use crate::utils::error::{AppError, Result};
use crate::utils::fs::{write_atomic, write_atomic_async};

const STATE_VERSION: u32 = 1;

#[derive(Deserialize)]
struct StateFile {
    #[serde(default)]
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    records: HashMap<ListingId, ProcessingRecord>,
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    records: BTreeMap<&'a ListingId, &'a ProcessingRecord>,
}

pub struct ListingStore {
    path: PathBuf,
    records: HashMap<ListingId, ProcessingRecord>,
    dirty: bool,
}

impl ListingStore {
    /// Open the store at `path`.
    ///
    /// A missing or empty file yields an empty store. Anything that cannot be
    /// read or parsed is an error: starting from scratch would re-notify
    /// every listing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file yet, starting with an empty store");
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let state: StateFile = serde_json::from_str(&contents).map_err(|source| AppError::StoreCorrupted {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), records = state.records.len(), "Loaded listing store");

        Ok(Self {
            path,
            records: state.records,
            dirty: false,
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            records: HashMap::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has(&self, id: &ListingId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &ListingId) -> Option<&ProcessingRecord> {
        self.records.get(id)
    }

    pub fn status(&self, id: &ListingId) -> Option<ProcessingStatus> {
        self.records.get(id).map(|record| record.status)
    }

    /// Create a `seen_only` record for `id` unless one exists. Returns whether it was created.
    pub fn record_seen(&mut self, id: &ListingId, at: DateTime<Utc>) -> bool {
        if self.records.contains_key(id) {
            return false;
        }
        self.records.insert(id.clone(), ProcessingRecord::seen(at));
        self.dirty = true;
        true
    }

    /// Move `id` to `status`, optionally replacing its details snapshot.
    ///
    /// Fails without touching the record when `status` is not an allowed
    /// successor of the current one.
    pub fn advance(&mut self, id: &ListingId, status: ProcessingStatus, details: Option<Listing>) -> Result<()> {
        self.transition(id, status, |record| {
            if let Some(details) = details {
                record.details = Some(details);
            }
        })
    }

    /// Record a classifier judgment, moving to `judged_relevant` or `judged_irrelevant`.
    pub fn advance_judged(&mut self, id: &ListingId, judgment: Judgment) -> Result<()> {
        let status = if judgment.relevant {
            ProcessingStatus::JudgedRelevant
        } else {
            ProcessingStatus::JudgedIrrelevant
        };
        self.transition(id, status, |record| record.judgment = Some(judgment))
    }

    /// Annotate a recoverable failure. The status is left as is so the next run retries.
    pub fn record_failure(&mut self, id: &ListingId, message: impl Into<String>) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownListing { id: id.clone() })?;
        record.last_error = Some(message.into());
        record.failed_attempts += 1;
        record.updated_at = Utc::now();
        self.dirty = true;
        Ok(())
    }

    fn transition(
        &mut self,
        id: &ListingId,
        to: ProcessingStatus,
        apply: impl FnOnce(&mut ProcessingRecord),
    ) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| AppError::UnknownListing { id: id.clone() })?;

        if !record.status.can_advance_to(to) {
            return Err(AppError::InvalidTransition {
                id: id.clone(),
                from: record.status,
                to,
            });
        }

        record.status = to;
        record.updated_at = Utc::now();
        record.last_error = None;
        apply(record);
        self.dirty = true;
        Ok(())
    }

    /// Number of records per status.
    pub fn summary(&self) -> BTreeMap<ProcessingStatus, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    /// Persist all in-memory changes. A no-op when nothing changed since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        write_atomic(&self.path, &self.snapshot()?)?;
        self.flushed();
        Ok(())
    }

    /// Same as [`ListingStore::flush`], with the write done off the async worker threads.
    pub async fn flush_async(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        write_atomic_async(self.path.clone(), self.snapshot()?).await?;
        self.flushed();
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let state = StateFileRef {
            version: STATE_VERSION,
            records: self.records.iter().collect(),
        };
        Ok(serde_json::to_vec_pretty(&state)?)
    }

    fn flushed(&mut self) {
        self.dirty = false;
        debug!(path = %self.path.display(), records = self.records.len(), "Flushed listing store");
    }
}

impl Drop for ListingStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "Failed to flush listing store on close");
        }
    }
}
