//! Resumable paginated issue listing.
//!
//! Fetches every issue of one project by walking `offset = 0, L, 2L, …`
//! until the server-reported `total_count` is reached. After each page the
//! accumulated issues are written to the project's data file and then the
//! checkpoint is advanced, so the checkpoint never points past data that is
//! on disk.
//!
//! A failed page stops the project: what was stored stays stored, the
//! checkpoint keeps the un-advanced offset, and the next invocation resumes
//! there. There is no in-place retry.
//!
//! # Files
//!
//! | File | Content |
//! |------|---------|
//! | `redmine_<project>_issues_data.json` | issues fetched so far |
//! | `<checkpoint_dir>/<project>_checkpoint.json` | `{offset, total}` |
//!
//! A run that starts from offset 0 saves `{offset: 0, total: null}` before
//! its first request, so a data file with no checkpoint next to it always
//! belongs to a finished listing. The checkpoint is deleted once the stored
//! count equals `total`; a later run then returns the stored file without
//! issuing any request.
//!
//! When the pages run out but the stored count differs from `total` (issues
//! moved or deleted mid-listing), the checkpoint is reset to offset 0 and
//! the next run lists the project again from scratch.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::checkpoint::{listing_key, CheckpointStore, ListingCheckpoint};
use crate::config::{Config, PathsConfig};
use crate::files;
use crate::merge;
use crate::models::Issue;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::redmine::{IssueApi, RedmineClient};

/// Knobs of the paginated fetch.
#[derive(Debug, Clone)]
pub struct ListingOptions {
    pub page_size: u64,
    pub page_delay: Duration,
    /// Ignore existing data and checkpoints and list from offset 0.
    pub full: bool,
}

impl ListingOptions {
    pub fn from_config(config: &Config, full: bool) -> Self {
        Self {
            page_size: config.fetch.page_size,
            page_delay: config.page_delay(),
            full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    /// Stored data was already complete; no request was issued.
    AlreadyComplete,
    /// Every issue is stored and the checkpoint was deleted.
    Complete,
    /// The server reported zero issues.
    Empty,
    /// Stopped early; a checkpoint remains for the next invocation.
    Partial,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::AlreadyComplete => "already complete",
            ListingStatus::Complete => "complete",
            ListingStatus::Empty => "empty",
            ListingStatus::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingOutcome {
    pub project_id: String,
    pub issues: Vec<Issue>,
    pub total: Option<u64>,
    pub status: ListingStatus,
    pub requests: u64,
    pub error: Option<String>,
}

/// Drives the paginated listing of one project at a time.
pub struct ProjectFetcher<'a> {
    api: &'a dyn IssueApi,
    store: &'a CheckpointStore,
    paths: &'a PathsConfig,
    options: ListingOptions,
    progress: &'a dyn ProgressReporter,
}

impl<'a> ProjectFetcher<'a> {
    pub fn new(
        api: &'a dyn IssueApi,
        store: &'a CheckpointStore,
        paths: &'a PathsConfig,
        options: ListingOptions,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            api,
            store,
            paths,
            options,
            progress,
        }
    }

    /// Fetch (or resume fetching) all issues of `project_id`.
    ///
    /// Page failures are converted into a [`ListingStatus::Partial`]
    /// outcome. Only storage errors are returned as `Err`.
    pub async fn fetch(&self, project_id: &str) -> Result<ListingOutcome> {
        let key = listing_key(project_id);
        let data_file = self.paths.project_data_file(project_id);

        let (stored, checkpoint) = if self.options.full {
            self.store.clear(&key)?;
            (None, None)
        } else {
            (
                files::read_json::<Vec<Issue>>(&data_file)?,
                self.store.load::<ListingCheckpoint>(&key)?,
            )
        };

        let already_complete = stored
            .as_ref()
            .is_some_and(|issues| is_complete(issues.len(), checkpoint.as_ref()));
        if already_complete {
            if self.store.clear(&key)? {
                debug!(project = project_id, "removed stale checkpoint");
            }
            let issues = stored.unwrap_or_default();
            info!(
                project = project_id,
                issues = issues.len(),
                "project already complete, skipping download"
            );
            return Ok(ListingOutcome {
                project_id: project_id.to_string(),
                total: Some(issues.len() as u64),
                issues,
                status: ListingStatus::AlreadyComplete,
                requests: 0,
                error: None,
            });
        }

        // Offset 0 means start over: the stored file is replaced by the
        // first page.
        let (mut offset, mut total, mut issues) = match (checkpoint, stored) {
            (Some(cp), Some(issues)) if cp.offset > 0 => (cp.offset, cp.total, issues),
            (Some(cp), None) if cp.offset > 0 => {
                warn!(
                    project = project_id,
                    offset = cp.offset,
                    "checkpoint found without stored issues, restarting from offset 0"
                );
                (0, None, Vec::new())
            }
            _ => (0, None, Vec::new()),
        };

        if offset > 0 {
            info!(
                project = project_id,
                offset,
                stored = issues.len(),
                "resuming download"
            );
        } else {
            self.store.save(
                &key,
                &ListingCheckpoint {
                    offset: 0,
                    total: None,
                    updated_at: chrono::Utc::now().timestamp(),
                },
            )?;
        }

        let mut seen: HashSet<u64> = issues.iter().map(|i| i.id).collect();
        let mut requests = 0u64;
        let mut error: Option<String> = None;
        let page_size = self.options.page_size;

        loop {
            if let Some(t) = total {
                if offset >= t {
                    break;
                }
            }

            requests += 1;
            let page = match self.api.fetch_page(project_id, offset, page_size).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        project = project_id,
                        offset,
                        class = e.class().as_str(),
                        "page fetch failed: {}",
                        e
                    );
                    error = Some(e.to_string());
                    break;
                }
            };

            let t = match (total, page.total_count) {
                (Some(t), _) => t,
                (None, Some(t)) => {
                    total = Some(t);
                    t
                }
                (None, None) => {
                    let reason = format!(
                        "malformed response for project '{}' offset {}: missing total_count",
                        project_id, offset
                    );
                    warn!(project = project_id, "{}", reason);
                    error = Some(reason);
                    break;
                }
            };

            if t == 0 {
                files::write_json_atomic(&data_file, &issues)?;
                break;
            }

            for mut issue in page.issues {
                if seen.insert(issue.id) {
                    issue.project_identifier = Some(project_id.to_string());
                    issues.push(issue);
                } else {
                    debug!(project = project_id, issue = issue.id, "duplicate issue in listing");
                }
            }

            offset += page_size;
            files::write_json_atomic(&data_file, &issues)?;
            self.store.save(
                &key,
                &ListingCheckpoint {
                    offset,
                    total,
                    updated_at: chrono::Utc::now().timestamp(),
                },
            )?;

            self.progress.report(ProgressEvent::Page {
                project: project_id.to_string(),
                fetched: issues.len() as u64,
                total: t,
            });

            if offset < t && !self.options.page_delay.is_zero() {
                tokio::time::sleep(self.options.page_delay).await;
            }
        }

        let count = issues.len() as u64;
        let status = match (error.is_some(), total) {
            (true, _) | (false, None) => ListingStatus::Partial,
            (false, Some(0)) => {
                self.store.clear(&key)?;
                ListingStatus::Empty
            }
            (false, Some(t)) if count == t => {
                self.store.clear(&key)?;
                ListingStatus::Complete
            }
            (false, Some(t)) => {
                // Pages exhausted but the count drifted from total_count;
                // re-list from the start next time and de-duplicate.
                warn!(
                    project = project_id,
                    stored = count,
                    total = t,
                    "stored count differs from server total, resetting checkpoint"
                );
                self.store.save(
                    &key,
                    &ListingCheckpoint {
                        offset: 0,
                        total: None,
                        updated_at: chrono::Utc::now().timestamp(),
                    },
                )?;
                ListingStatus::Partial
            }
        };

        match status {
            ListingStatus::Partial => warn!(
                project = project_id,
                stored = count,
                total = ?total,
                "partial fetch"
            ),
            _ => info!(project = project_id, issues = count, "fetch complete"),
        }

        Ok(ListingOutcome {
            project_id: project_id.to_string(),
            issues,
            total,
            status,
            requests,
            error,
        })
    }
}

/// Stored data is complete when no checkpoint remains, or when the
/// checkpoint reached `total` and the stored count matches it.
fn is_complete(stored_len: usize, checkpoint: Option<&ListingCheckpoint>) -> bool {
    match checkpoint {
        None => true,
        Some(cp) => matches!(cp.total, Some(t) if cp.offset >= t && stored_len as u64 == t),
    }
}

/// Run the `fetch` command: list every project, then optionally merge.
///
/// Returns the number of projects left partial.
pub async fn run_fetch(
    config: &Config,
    projects: Vec<String>,
    full: bool,
    merge_after: bool,
    progress: &dyn ProgressReporter,
) -> Result<usize> {
    let projects = if projects.is_empty() {
        config.redmine.projects.clone()
    } else {
        projects
    };
    if projects.is_empty() {
        bail!("No projects configured. Set PROJECT_IDS, [redmine].projects, or pass --project.");
    }

    let client = RedmineClient::from_config(config)?;
    let store = CheckpointStore::new(config.paths.checkpoint_dir());
    let fetcher = ProjectFetcher::new(
        &client,
        &store,
        &config.paths,
        ListingOptions::from_config(config, full),
        progress,
    );

    let outcomes = fetch_projects(&fetcher, &projects).await?;
    print_fetch_summary(&outcomes);

    if merge_after {
        let output: PathBuf = config.paths.master_file();
        let summary = merge::merge_projects(&config.paths, &projects, &output)?;
        merge::print_merge_summary(&summary, &output);
    }

    Ok(outcomes
        .iter()
        .filter(|o| o.status == ListingStatus::Partial)
        .count())
}

/// List every project in order. A failing project never stops the others.
pub async fn fetch_projects(
    fetcher: &ProjectFetcher<'_>,
    projects: &[String],
) -> Result<Vec<ListingOutcome>> {
    let mut outcomes = Vec::with_capacity(projects.len());
    for project_id in projects {
        outcomes.push(fetcher.fetch(project_id).await?);
    }
    Ok(outcomes)
}

fn print_fetch_summary(outcomes: &[ListingOutcome]) {
    let total_issues: usize = outcomes.iter().map(|o| o.issues.len()).sum();
    let partial = outcomes
        .iter()
        .filter(|o| o.status == ListingStatus::Partial)
        .count();

    println!("fetch");
    for o in outcomes {
        let total = o
            .total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  {}: {}/{} issues ({}, {} requests)",
            o.project_id,
            o.issues.len(),
            total,
            o.status.as_str(),
            o.requests
        );
    }
    println!("  total issues: {}", total_issues);
    println!("  partial projects: {}", partial);
}
