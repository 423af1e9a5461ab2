//! Load an issue dataset into a vector store collection.
//!
//! The target collection is always recreated. Each issue becomes one
//! document (see [`crate::document`]); documents are embedded and inserted
//! in batches. A batch that fails to embed or insert is logged and skipped,
//! and the final count check reports the gap.

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::document::{prepare_document, Document};
use crate::embedding::{self, EmbeddingProvider};
use crate::files;
use crate::models::Issue;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::vector_store::VectorStore;

/// Command-line overrides for `ingest`.
#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub data: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub collection: Option<String>,
    pub batch: Option<usize>,
    pub max_text: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub total: usize,
    pub inserted: usize,
    pub failed_batches: usize,
    pub failed_documents: usize,
    pub embedded: bool,
    pub replaced_existing: bool,
}

/// Recreate `collection` and insert one document per issue.
///
/// With `provider == None` documents are stored without vectors.
pub async fn ingest_issues(
    store: &VectorStore,
    provider: Option<&dyn EmbeddingProvider>,
    collection: &str,
    issues: &[Issue],
    batch_size: usize,
    max_text: usize,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let metadata = serde_json::json!({
        "created_at": chrono::Utc::now().to_rfc3339(),
        "embedding_model": provider.map(|p| p.model_name()).unwrap_or("none"),
        "source": "redmine",
    });
    let replaced_existing = store.recreate_collection(collection, &metadata).await?;
    if replaced_existing {
        warn!(collection, "deleted existing collection");
    }

    let mut summary = IngestSummary {
        total: issues.len(),
        embedded: provider.is_some(),
        replaced_existing,
        ..Default::default()
    };

    let documents: Vec<Document> = issues
        .iter()
        .map(|issue| prepare_document(issue, max_text))
        .collect();

    for batch in documents.chunks(batch_size.max(1)) {
        match insert_batch(store, provider, collection, batch).await {
            Ok(()) => summary.inserted += batch.len(),
            Err(e) => {
                warn!(
                    collection,
                    first = %batch[0].id,
                    size = batch.len(),
                    "batch failed, skipping: {:#}",
                    e
                );
                summary.failed_batches += 1;
                summary.failed_documents += batch.len();
            }
        }
        progress.report(ProgressEvent::Ingest {
            inserted: (summary.inserted + summary.failed_documents) as u64,
            total: summary.total as u64,
        });
    }

    Ok(summary)
}

async fn insert_batch(
    store: &VectorStore,
    provider: Option<&dyn EmbeddingProvider>,
    collection: &str,
    batch: &[Document],
) -> Result<()> {
    match provider {
        Some(provider) => {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let vectors = provider.embed(&texts).await?;
            store.add(collection, batch, Some(vectors.as_slice())).await
        }
        None => store.add(collection, batch, None).await,
    }
}

/// Run the `ingest` command.
pub async fn run_ingest(
    config: &Config,
    args: IngestArgs,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let data = args.data.unwrap_or_else(|| config.paths.anonymized_file());
    let db = args.db.unwrap_or_else(|| config.store.path.clone());
    let collection = args
        .collection
        .unwrap_or_else(|| config.store.collection.clone());
    let batch = args.batch.unwrap_or(config.store.batch_size);
    let max_text = args.max_text.unwrap_or(config.store.max_text);

    let issues: Vec<Issue> = files::read_required_json(&data)?;
    info!(issues = issues.len(), data = %data.display(), "loaded dataset");

    let provider = if config.embedding.is_enabled() {
        Some(embedding::create_provider(&config.embedding)?)
    } else {
        warn!("embedding provider disabled, storing documents without vectors");
        None
    };

    let store = VectorStore::open(&db).await?;
    let summary = ingest_issues(
        &store,
        provider.as_deref(),
        &collection,
        &issues,
        batch,
        max_text,
        progress,
    )
    .await?;
    let stored = store.count(&collection).await?;
    let store_path = store.path().to_path_buf();
    store.close().await;

    println!("ingest");
    println!("  data: {}", data.display());
    println!("  store: {}", store_path.display());
    println!("  collection: {}", collection);
    println!(
        "  embeddings: {}",
        provider
            .as_deref()
            .map(|p| p.model_name().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  issues: {}", summary.total);
    println!("  inserted: {}", summary.inserted);
    println!("  failed batches: {}", summary.failed_batches);
    println!("  collection count: {}", stored);
    if stored as usize != summary.total {
        warn!(
            expected = summary.total,
            stored, "collection count differs from dataset size"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails its second call; otherwise returns a unit vector per text.
    struct FlakyEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                anyhow::bail!("embedding backend unavailable");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn issues(n: u64) -> Vec<Issue> {
        (1..=n)
            .map(|id| Issue {
                id,
                subject: Some(format!("issue {}", id)),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn failed_batch_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();
        let embedder = FlakyEmbedder {
            calls: AtomicUsize::new(0),
        };

        let summary = ingest_issues(&store, Some(&embedder), "c", &issues(5), 2, 100, &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(store.count("c").await.unwrap(), 3);
        assert_eq!(store.count_embedded("c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reingest_replaces_collection() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();

        ingest_issues(&store, None, "c", &issues(4), 10, 100, &NoProgress)
            .await
            .unwrap();
        let summary = ingest_issues(&store, None, "c", &issues(2), 10, 100, &NoProgress)
            .await
            .unwrap();

        assert!(summary.replaced_existing);
        assert!(!summary.embedded);
        assert_eq!(store.count("c").await.unwrap(), 2);
    }
}
