//! Dataset and collection statistics.
//!
//! Gives a quick view of how much discussion history a dataset carries and,
//! when a vector store exists, how much of it was ingested. Used by
//! `redmine-rag stats` to check that enrichment and ingestion worked.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::files;
use crate::models::Issue;
use crate::vector_store::{VectorStore, DATABASE_FILE};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalStats {
    pub issues: usize,
    pub with_journals: usize,
    pub journals: usize,
    pub with_notes: usize,
    pub per_project: BTreeMap<String, usize>,
}

impl JournalStats {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut stats = Self {
            issues: issues.len(),
            ..Default::default()
        };
        for issue in issues {
            let journals = issue.journals();
            if !journals.is_empty() {
                stats.with_journals += 1;
            }
            stats.journals += journals.len();
            stats.with_notes += journals
                .iter()
                .filter(|j| j.notes.as_deref().is_some_and(|n| !n.is_empty()))
                .count();
            let project = issue
                .project_identifier
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.per_project.entry(project).or_default() += 1;
        }
        stats
    }

    pub fn percent_with_journals(&self) -> f64 {
        if self.issues == 0 {
            0.0
        } else {
            self.with_journals as f64 * 100.0 / self.issues as f64
        }
    }

    pub fn average_journals(&self) -> f64 {
        if self.issues == 0 {
            0.0
        } else {
            self.journals as f64 / self.issues as f64
        }
    }
}

/// Run the stats command: analyze the dataset and print a summary.
pub async fn run_stats(
    config: &Config,
    input: Option<PathBuf>,
    db: Option<PathBuf>,
    collection: Option<String>,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.paths.enriched_file());
    let db = db.unwrap_or_else(|| config.store.path.clone());
    let collection = collection.unwrap_or_else(|| config.store.collection.clone());

    let issues: Vec<Issue> = files::read_required_json(&input)?;
    let stats = JournalStats::from_issues(&issues);
    let file_size = std::fs::metadata(&input).map(|m| m.len()).unwrap_or(0);

    println!("Redmine RAG - Dataset Stats");
    println!("===========================");
    println!();
    println!("  Dataset:       {}", input.display());
    println!("  Size:          {}", format_bytes(file_size));
    println!();
    println!("  Issues:        {}", stats.issues);
    println!(
        "  With journals: {} ({:.1}%)",
        stats.with_journals,
        stats.percent_with_journals()
    );
    println!("  Journals:      {}", stats.journals);
    println!("  With notes:    {}", stats.with_notes);
    println!("  Avg/issue:     {:.2}", stats.average_journals());

    if stats.per_project.len() > 1 {
        println!();
        println!("  By project:");
        println!("  {:<24} {:>8}", "PROJECT", "ISSUES");
        println!("  {}", "-".repeat(33));
        for (project, count) in &stats.per_project {
            println!("  {:<24} {:>8}", project, count);
        }
    }

    print_collection_stats(&db, &collection).await?;
    println!();
    Ok(())
}

async fn print_collection_stats(db: &Path, collection: &str) -> Result<()> {
    if !db.join(DATABASE_FILE).exists() {
        return Ok(());
    }
    let store = VectorStore::open_existing(db).await?;
    println!();
    match store.collection(collection).await? {
        Some(info) => {
            let count = store.count(collection).await?;
            let embedded = store.count_embedded(collection).await?;
            println!("  Collection:    {}", info.name);
            println!("  Created:       {}", info.created_at);
            println!("  Documents:     {}", count);
            println!("  Embedded:      {} / {}", embedded, count);
        }
        None => println!("  Collection:    {} (not found)", collection),
    }
    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
