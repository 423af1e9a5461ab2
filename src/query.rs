//! Similarity search over an ingested collection.
//!
//! `query --query TEXT` runs one search and exits. Without `--query` an
//! interactive `Query>` prompt reads one query per line until `exit`,
//! `quit` or end of input.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::vector_store::{QueryHit, VectorStore};

#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub db: Option<PathBuf>,
    pub collection: Option<String>,
    pub top_k: Option<usize>,
    pub query: Option<String>,
}

const RULE: &str = "----------------------------------------------------------";

/// Embed `text` and return the closest documents of `collection`.
pub async fn search(
    store: &VectorStore,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    text: &str,
    top_k: usize,
) -> Result<Vec<QueryHit>> {
    let query_vec = embedding::embed_query(provider, text).await?;
    store.query(collection, &query_vec, top_k).await
}

pub fn print_hits(out: &mut impl Write, hits: &[QueryHit], top_k: usize) -> std::io::Result<()> {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Top {} results:", top_k)?;
    writeln!(out, "{}", RULE)?;
    for (rank, hit) in hits.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "[{}] ID = {}", rank + 1, hit.id)?;
        writeln!(out, "Score = {:.4}", hit.score)?;
        writeln!(out, "Document:\n{}", hit.text)?;
        writeln!(out, "{}", RULE)?;
    }
    Ok(())
}

/// Whether an interactive input line ends the session.
fn is_exit(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "exit" | "quit")
}

/// Run the `query` command.
pub async fn run_query(config: &Config, args: QueryArgs) -> Result<()> {
    let db = args.db.unwrap_or_else(|| config.store.path.clone());
    let collection = args
        .collection
        .unwrap_or_else(|| config.store.collection.clone());
    let top_k = args.top_k.unwrap_or(config.store.top_k).max(1);

    if !config.embedding.is_enabled() {
        anyhow::bail!(
            "Querying needs an embedding provider. Set [embedding].provider to ollama or openai."
        );
    }
    let provider = embedding::create_provider(&config.embedding)?;

    let store = VectorStore::open_existing(&db).await?;
    if store.collection(&collection).await?.is_none() {
        anyhow::bail!("Collection '{}' not found in {}", collection, db.display());
    }

    if let Some(text) = args.query {
        let hits = search(&store, provider.as_ref(), &collection, &text, top_k).await?;
        print_hits(&mut std::io::stdout().lock(), &hits, top_k)?;
        store.close().await;
        return Ok(());
    }

    println!("Interactive query on '{}' (type 'exit' to quit)", collection);
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("Query> ");
        std::io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if is_exit(text) {
            break;
        }

        match search(&store, provider.as_ref(), &collection, text, top_k).await {
            Ok(hits) => print_hits(&mut std::io::stdout().lock(), &hits, top_k)?,
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMetadata;

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(!is_exit("exit now"));
    }

    #[test]
    fn hits_are_printed_with_rank_and_score() {
        let hits = vec![QueryHit {
            id: "issue_7".into(),
            text: "Subject: flaky test".into(),
            metadata: DocumentMetadata::default(),
            score: 0.91234,
        }];
        let mut out = Vec::new();
        print_hits(&mut out, &hits, 5).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Top 5 results:"));
        assert!(text.contains("[1] ID = issue_7"));
        assert!(text.contains("Score = 0.9123"));
        assert!(text.contains("Document:\nSubject: flaky test"));
    }
}
