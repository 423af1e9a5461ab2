//! Merge per-project listings into the master dataset.
//!
//! Projects are read in configuration order and their issues concatenated.
//! An issue id seen twice (an issue moved between projects while the
//! listings ran) keeps its first occurrence.

use anyhow::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{Config, PathsConfig};
use crate::files;
use crate::models::Issue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub projects_merged: usize,
    pub projects_missing: Vec<String>,
    pub issues: usize,
    pub duplicates: usize,
}

/// Concatenate the stored listings of `projects` into `output`.
///
/// A project without a data file is skipped with a warning.
pub fn merge_projects(
    paths: &PathsConfig,
    projects: &[String],
    output: &Path,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();
    let mut seen = HashSet::new();
    let mut merged: Vec<Issue> = Vec::new();

    for project_id in projects {
        let file = paths.project_data_file(project_id);
        let Some(issues) = files::read_json::<Vec<Issue>>(&file)? else {
            warn!(project = %project_id, file = %file.display(), "no data file, skipping");
            summary.projects_missing.push(project_id.clone());
            continue;
        };

        for mut issue in issues {
            if !seen.insert(issue.id) {
                warn!(project = %project_id, issue = issue.id, "duplicate issue id, keeping first");
                summary.duplicates += 1;
                continue;
            }
            if issue.project_identifier.is_none() {
                issue.project_identifier = Some(project_id.clone());
            }
            merged.push(issue);
        }
        summary.projects_merged += 1;
    }

    summary.issues = merged.len();
    files::write_json_atomic(output, &merged)?;
    info!(
        issues = summary.issues,
        output = %output.display(),
        "master dataset written"
    );
    Ok(summary)
}

pub fn print_merge_summary(summary: &MergeSummary, output: &Path) {
    println!("merge");
    println!("  projects merged: {}", summary.projects_merged);
    if !summary.projects_missing.is_empty() {
        println!("  projects missing: {}", summary.projects_missing.join(", "));
    }
    println!("  issues: {}", summary.issues);
    println!("  duplicates dropped: {}", summary.duplicates);
    println!("  output: {}", output.display());
}

/// Run the `merge` command.
pub fn run_merge(config: &Config, output: Option<PathBuf>) -> Result<()> {
    if config.redmine.projects.is_empty() {
        anyhow::bail!("No projects configured. Set PROJECT_IDS or [redmine].projects.");
    }
    let output = output.unwrap_or_else(|| config.paths.master_file());
    let summary = merge_projects(&config.paths, &config.redmine.projects, &output)?;
    print_merge_summary(&summary, &output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn issue(id: u64) -> Issue {
        Issue {
            id,
            ..Default::default()
        }
    }

    #[test]
    fn concatenates_in_project_order_and_drops_duplicates() {
        let dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        files::write_json_atomic(&paths.project_data_file("a"), &vec![issue(1), issue(2)])
            .unwrap();
        files::write_json_atomic(&paths.project_data_file("b"), &vec![issue(2), issue(3)])
            .unwrap();

        let output = dir.path().join("master.json");
        let projects = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let summary = merge_projects(&paths, &projects, &output).unwrap();

        assert_eq!(summary.projects_merged, 2);
        assert_eq!(summary.projects_missing, vec!["missing".to_string()]);
        assert_eq!(summary.duplicates, 1);

        let merged: Vec<Issue> = files::read_required_json(&output).unwrap();
        let ids: Vec<u64> = merged.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(merged[1].project_identifier.as_deref(), Some("a"));
        assert_eq!(merged[2].project_identifier.as_deref(), Some("b"));
    }
}
