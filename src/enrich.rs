//! Per-issue journal enrichment with bounded retry.
//!
//! Every issue of the master dataset is re-fetched individually to pick up
//! its full journal history. The run is resumable across invocations:
//!
//! - an issue whose enriched record is already on disk is never re-fetched;
//! - a failed issue keeps its original record in the output and has its
//!   retry counter bumped;
//! - once the counter reaches `max_retries` the issue is *exhausted* and no
//!   further request is made for it, in this run or any later one.
//!
//! Output order always equals input order, one record per input issue.
//!
//! # Persistence
//!
//! Every `save_interval` processed issues, and after the last one, the
//! output list is written first and the [`EnrichmentCheckpoint`] second.
//! When no issue is left outstanding (every id succeeded or is exhausted)
//! an [`EnrichmentLedger`] listing the succeeded and exhausted ids replaces
//! the checkpoint. A later run seeds itself from the ledger plus the
//! previous output, so a finished run re-runs with zero requests and
//! exhausted issues stay skipped. Records in the output that the ledger
//! does not list as succeeded are fetched again.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::checkpoint::{
    CheckpointStore, EnrichmentCheckpoint, EnrichmentLedger, ENRICHMENT_KEY,
    ENRICHMENT_LEDGER_KEY,
};
use crate::config::Config;
use crate::files;
use crate::models::Issue;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::redmine::{describe_status, FetchError, IssueApi, RedmineClient};

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub max_retries: u32,
    pub save_interval: usize,
    pub delay: Duration,
    /// Ignore any checkpoint or ledger and fetch everything again.
    pub fresh: bool,
}

impl EnrichOptions {
    pub fn from_config(config: &Config, fresh: bool) -> Self {
        Self {
            max_retries: config.enrichment.max_retries,
            save_interval: config.enrichment.save_interval.max(1),
            delay: config.enrichment_delay(),
            fresh,
        }
    }
}

/// Counts reported at the end of an enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub total: usize,
    /// Fetched successfully during this run.
    pub enriched: usize,
    /// Taken from a previous run without a request.
    pub resumed: usize,
    pub with_journals: usize,
    /// Failed during this run.
    pub failed: usize,
    /// Ids that will never be retried again.
    pub exhausted: Vec<u64>,
    /// Failed ids that a later run will retry.
    pub pending: Vec<u64>,
    pub checkpoint_cleared: bool,
    pub requests: usize,
}

pub struct Enricher<'a> {
    api: &'a dyn IssueApi,
    store: &'a CheckpointStore,
    options: EnrichOptions,
    progress: &'a dyn ProgressReporter,
}

impl<'a> Enricher<'a> {
    pub fn new(
        api: &'a dyn IssueApi,
        store: &'a CheckpointStore,
        options: EnrichOptions,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            api,
            store,
            options,
            progress,
        }
    }

    /// Enrich `input` into `output`, resuming any previous run.
    ///
    /// Only storage errors are returned as `Err`; fetch failures are
    /// recorded per issue.
    pub async fn run(&self, input: &[Issue], output: &Path) -> Result<(Vec<Issue>, EnrichSummary)> {
        let max_retries = self.options.max_retries;
        let (mut state, resolved) = self.restore(input, output)?;
        state.total = input.len();

        let mut summary = EnrichSummary {
            total: input.len(),
            ..Default::default()
        };
        let mut results: Vec<Issue> = Vec::with_capacity(input.len());

        if input.is_empty() {
            files::write_json_atomic(output, &results)?;
        }

        for (index, original) in input.iter().enumerate() {
            let id = original.id;

            if let Some(done) = resolved.get(&id) {
                results.push(done.clone());
                summary.resumed += 1;
            } else if state.is_exhausted(id, max_retries) {
                debug!(issue = id, "retries exhausted, keeping original record");
                results.push(original.clone());
            } else {
                if summary.requests > 0 && !self.options.delay.is_zero() {
                    tokio::time::sleep(self.options.delay).await;
                }
                summary.requests += 1;

                match self.api.fetch_issue(id).await {
                    Ok(fetched) => {
                        state.completed.insert(id);
                        results.push(carry_local_fields(fetched, original));
                        summary.enriched += 1;
                    }
                    Err(e) => {
                        let attempts = state.record_failure(id, max_retries);
                        warn!(
                            issue = id,
                            attempt = attempts,
                            max_retries,
                            class = e.class().as_str(),
                            "enrichment failed: {}",
                            failure_reason(&e)
                        );
                        results.push(original.clone());
                        summary.failed += 1;
                    }
                }
            }

            let processed = index + 1;
            if processed % self.options.save_interval == 0 || processed == input.len() {
                self.persist(output, &results, &mut state)?;
                let exhausted = input
                    .iter()
                    .filter(|i| state.is_exhausted(i.id, max_retries))
                    .count();
                self.progress.report(ProgressEvent::Checkpoint {
                    processed: processed as u64,
                    total: input.len() as u64,
                    failed: summary.failed as u64,
                    exhausted: exhausted as u64,
                });
            }
        }

        let (exhausted, pending) = residual(input, &state, max_retries);
        if pending.is_empty() {
            self.store.save(
                ENRICHMENT_LEDGER_KEY,
                &EnrichmentLedger {
                    total: input.len(),
                    completed: state.completed.clone(),
                    exhausted: exhausted.iter().copied().collect(),
                    finished_at: chrono::Utc::now().timestamp(),
                },
            )?;
            self.store.clear(ENRICHMENT_KEY)?;
            summary.checkpoint_cleared = true;
            info!(
                issues = input.len(),
                exhausted = exhausted.len(),
                "enrichment complete"
            );
        } else {
            info!(
                pending = pending.len(),
                "enrichment incomplete, checkpoint kept for the next run"
            );
        }

        summary.with_journals = results.iter().filter(|i| i.journal_count() > 0).count();
        summary.exhausted = exhausted;
        summary.pending = pending;
        Ok((results, summary))
    }

    /// Rebuild the run state from the checkpoint, or from the ledger of a
    /// finished run, together with the enriched records already on disk.
    fn restore(
        &self,
        input: &[Issue],
        output: &Path,
    ) -> Result<(EnrichmentCheckpoint, HashMap<u64, Issue>)> {
        if self.options.fresh {
            self.store.clear(ENRICHMENT_KEY)?;
            self.store.clear(ENRICHMENT_LEDGER_KEY)?;
            return Ok((EnrichmentCheckpoint::default(), HashMap::new()));
        }

        let checkpoint: Option<EnrichmentCheckpoint> = self.store.load(ENRICHMENT_KEY)?;
        let ledger: Option<EnrichmentLedger> = if checkpoint.is_none() {
            self.store.load(ENRICHMENT_LEDGER_KEY)?
        } else {
            None
        };
        if checkpoint.is_none() && ledger.is_none() {
            return Ok((EnrichmentCheckpoint::default(), HashMap::new()));
        }

        let previous: HashMap<u64, Issue> = files::read_json::<Vec<Issue>>(output)?
            .unwrap_or_default()
            .into_iter()
            .map(|issue| (issue.id, issue))
            .collect();
        let wanted: BTreeSet<u64> = input.iter().map(|i| i.id).collect();

        let mut state = match (checkpoint, ledger) {
            (Some(cp), _) => {
                info!(
                    completed = cp.completed.len(),
                    failing = cp.retries.len(),
                    "resuming enrichment from checkpoint"
                );
                cp
            }
            (None, Some(ledger)) => {
                let mut cp = EnrichmentCheckpoint::default();
                for id in &ledger.exhausted {
                    cp.retries.insert(*id, self.options.max_retries);
                }
                cp.completed = ledger.completed;
                info!(
                    completed = cp.completed.len(),
                    exhausted = cp.retries.len(),
                    "seeding enrichment from previous run"
                );
                cp
            }
            (None, None) => EnrichmentCheckpoint::default(),
        };

        // A completed id without its record on disk is fetched again.
        let missing: Vec<u64> = state
            .completed
            .iter()
            .filter(|id| !previous.contains_key(*id))
            .copied()
            .collect();
        for id in missing {
            debug!(issue = id, "enriched record missing from output, refetching");
            state.completed.remove(&id);
        }

        let resolved = previous
            .into_iter()
            .filter(|(id, _)| state.completed.contains(id) && wanted.contains(id))
            .collect();
        Ok((state, resolved))
    }

    /// Write the output list, then the checkpoint.
    fn persist(
        &self,
        output: &Path,
        results: &[Issue],
        state: &mut EnrichmentCheckpoint,
    ) -> Result<()> {
        files::write_json_atomic(output, results)?;
        state.updated_at = chrono::Utc::now().timestamp();
        self.store.save(ENRICHMENT_KEY, state)
    }
}

/// Keep fields attached locally (the listing's project tag, anything the
/// detail endpoint does not return) on the freshly fetched record.
fn carry_local_fields(mut fetched: Issue, original: &Issue) -> Issue {
    if fetched.project_identifier.is_none() {
        fetched.project_identifier = original.project_identifier.clone();
    }
    for (key, value) in &original.extra {
        if !fetched.extra.contains_key(key) {
            fetched.extra.insert(key.clone(), value.clone());
        }
    }
    fetched
}

fn failure_reason(err: &FetchError) -> String {
    match err {
        FetchError::Status { status, .. } => describe_status(*status),
        other => other.to_string(),
    }
}

/// Split the input ids that have not succeeded into (exhausted, pending).
fn residual(input: &[Issue], state: &EnrichmentCheckpoint, max_retries: u32) -> (Vec<u64>, Vec<u64>) {
    let mut exhausted = Vec::new();
    let mut pending = Vec::new();
    for issue in input {
        if state.is_exhausted(issue.id, max_retries) {
            exhausted.push(issue.id);
        } else if state.is_outstanding(issue.id, max_retries) {
            pending.push(issue.id);
        }
    }
    (exhausted, pending)
}

/// Run the `enrich` command.
pub async fn run_enrich(
    config: &Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    fresh: bool,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let input_path = input.unwrap_or_else(|| config.paths.master_file());
    let output_path = output.unwrap_or_else(|| config.paths.enriched_file());

    let issues: Vec<Issue> = files::read_required_json(&input_path)?;
    let client = RedmineClient::from_config(config)?;
    let store = CheckpointStore::new(config.paths.checkpoint_dir());

    info!(issues = issues.len(), input = %input_path.display(), "starting enrichment");
    let enricher = Enricher::new(
        &client,
        &store,
        EnrichOptions::from_config(config, fresh),
        progress,
    );
    let (_, summary) = enricher.run(&issues, &output_path).await?;

    print_enrich_summary(&summary, &output_path);
    Ok(())
}

fn print_enrich_summary(summary: &EnrichSummary, output: &Path) {
    println!("enrich");
    println!("  issues: {}", summary.total);
    println!("  enriched: {}", summary.enriched);
    println!("  resumed: {}", summary.resumed);
    println!("  with journals: {}", summary.with_journals);
    println!("  failed this run: {}", summary.failed);
    println!("  retry-exhausted: {}", summary.exhausted.len());
    if !summary.exhausted.is_empty() {
        let ids: Vec<String> = summary.exhausted.iter().map(|id| format!("#{}", id)).collect();
        println!("  exhausted ids: {}", ids.join(", "));
    }
    println!("  pending retry: {}", summary.pending.len());
    println!("  requests: {}", summary.requests);
    println!(
        "  checkpoint: {}",
        if summary.checkpoint_cleared {
            "cleared"
        } else {
            "kept"
        }
    );
    println!("  output: {}", output.display());
}
