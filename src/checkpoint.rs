//! Durable fetch progress.
//!
//! A [`CheckpointStore`] maps a run key (a project identifier, or the
//! enrichment run) to one small JSON file in the checkpoint directory.
//! Access is single-process and sequential; `save` is a whole-record
//! atomic replace.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::files;

/// Key of the shared journal-enrichment checkpoint.
pub const ENRICHMENT_KEY: &str = "journal_enrichment";

/// Key of the record left behind when an enrichment run finishes.
pub const ENRICHMENT_LEDGER_KEY: &str = "journal_enrichment_ledger";

/// Key of a project's listing checkpoint.
pub fn listing_key(project_id: &str) -> String {
    format!("{}_checkpoint", project_id)
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Last successfully saved state, or `None` if never saved or cleared.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        files::read_json(&self.path_for(key))
    }

    pub fn save<T: Serialize>(&self, key: &str, state: &T) -> Result<()> {
        files::write_json_atomic(&self.path_for(key), state)
    }

    /// Remove persisted state. Returns whether anything was removed.
    pub fn clear(&self, key: &str) -> Result<bool> {
        files::remove_if_exists(&self.path_for(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }
}

/// Progress of one project's paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCheckpoint {
    /// Next offset to request.
    pub offset: u64,
    /// Server-reported `total_count`, absent until the first page arrives.
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub updated_at: i64,
}

/// Progress of the per-issue enrichment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnrichmentCheckpoint {
    /// Number of input issues when the checkpoint was written.
    pub total: usize,
    /// Failed attempts per issue id. Never decreases, capped at the
    /// configured maximum.
    #[serde(default)]
    pub retries: BTreeMap<u64, u32>,
    /// Issue ids whose enriched record is in the output file.
    #[serde(default)]
    pub completed: BTreeSet<u64>,
    #[serde(default)]
    pub updated_at: i64,
}

impl EnrichmentCheckpoint {
    pub fn retry_count(&self, id: u64) -> u32 {
        self.retries.get(&id).copied().unwrap_or(0)
    }

    /// Record one more failed attempt, saturating at `max_retries`.
    pub fn record_failure(&mut self, id: u64, max_retries: u32) -> u32 {
        let count = self.retries.entry(id).or_insert(0);
        *count = (*count + 1).min(max_retries.max(*count));
        *count
    }

    pub fn is_exhausted(&self, id: u64, max_retries: u32) -> bool {
        !self.completed.contains(&id) && self.retry_count(id) >= max_retries
    }

    /// An id that is neither succeeded nor exhausted.
    pub fn is_outstanding(&self, id: u64, max_retries: u32) -> bool {
        !self.completed.contains(&id) && self.retry_count(id) < max_retries
    }
}

/// Terminal record of a finished enrichment run.
///
/// Written just before the checkpoint is cleared, so a later run can tell
/// which records in the enriched file were fetched and which are originals
/// kept after retry exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnrichmentLedger {
    pub total: usize,
    /// Ids whose record in the enriched file was fetched by the run.
    #[serde(default)]
    pub completed: BTreeSet<u64>,
    #[serde(default)]
    pub exhausted: BTreeSet<u64>,
    #[serde(default)]
    pub finished_at: i64,
}
