//! SQLite-backed document collections with stored embeddings.
//!
//! The store lives in `<store.path>/vectors.sqlite` and holds any number of
//! named collections. Each document row keeps its text, its flat metadata as
//! JSON and, when an embedding provider is configured, its vector as a
//! little-endian `f32` BLOB. Similarity queries load a collection's vectors
//! and rank them by cosine similarity in Rust.
//!
//! # Schema
//!
//! ```sql
//! collections(name PK, metadata_json, created_at)
//! documents(collection, id, text, metadata_json, embedding BLOB NULL,
//!           PRIMARY KEY (collection, id))
//! ```

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::document::{Document, DocumentMetadata};
use crate::embedding;

pub const DATABASE_FILE: &str = "vectors.sqlite";

#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

pub struct VectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl VectorStore {
    /// Open (creating if needed) the store under `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        let store = Self::connect(dir, true).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Open a store that must already exist.
    pub async fn open_existing(dir: &Path) -> Result<Self> {
        let path = dir.join(DATABASE_FILE);
        if !path.exists() {
            bail!(
                "Vector store not found at {}. Run `redmine-rag ingest` first.",
                path.display()
            );
        }
        let store = Self::connect(dir, false).await?;
        store.migrate().await?;
        Ok(store)
    }

    async fn connect(dir: &Path, create: bool) -> Result<Self> {
        let path = dir.join(DATABASE_FILE);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(create)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool, path })
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                embedding BLOB,
                PRIMARY KEY (collection, id),
                FOREIGN KEY (collection) REFERENCES collections(name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop `name` if it exists and create it empty. Returns whether an
    /// existing collection was dropped.
    pub async fn recreate_collection(
        &self,
        name: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let dropped = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        sqlx::query("INSERT INTO collections (name, metadata_json, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(metadata.to_string())
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(dropped)
    }

    pub async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query("SELECT name, metadata_json, created_at FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.get("metadata_json");
        Ok(Some(CollectionInfo {
            name: row.get("name"),
            metadata: serde_json::from_str(&raw)?,
            created_at: row.get("created_at"),
        }))
    }

    /// Insert (or replace) a batch of documents. `embeddings`, when given,
    /// must hold one vector per document.
    pub async fn add(
        &self,
        collection: &str,
        documents: &[Document],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        if let Some(vectors) = embeddings {
            if vectors.len() != documents.len() {
                bail!(
                    "{} documents but {} embeddings",
                    documents.len(),
                    vectors.len()
                );
            }
        }

        let mut tx = self.pool.begin().await?;
        for (i, doc) in documents.iter().enumerate() {
            let blob = embeddings.map(|v| embedding::vec_to_blob(&v[i]));
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO documents (collection, id, text, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(&doc.id)
            .bind(&doc.text)
            .bind(serde_json::to_string(&doc.metadata)?)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_embedded(&self, collection: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = ? AND embedding IS NOT NULL",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// The `top_k` documents most similar to `query_vec`.
    pub async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryHit>> {
        if self.collection(collection).await?.is_none() {
            bail!("Collection '{}' does not exist", collection);
        }

        let rows = sqlx::query(
            r#"
            SELECT id, text, metadata_json, embedding
            FROM documents
            WHERE collection = ? AND embedding IS NOT NULL
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() && self.count(collection).await? > 0 {
            bail!(
                "Collection '{}' has no embeddings. Re-run ingest with an embedding provider.",
                collection
            );
        }

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let raw: String = row.get("metadata_json");
            hits.push(QueryHit {
                id: row.get("id"),
                text: row.get("text"),
                metadata: serde_json::from_str(&raw).unwrap_or_default(),
                score: embedding::cosine_similarity(query_vec, &vec),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: DocumentMetadata {
                issue_id: id.trim_start_matches("issue_").to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();
        store
            .recreate_collection("issues", &serde_json::json!({}))
            .await
            .unwrap();

        let docs = vec![doc("issue_1", "a"), doc("issue_2", "b"), doc("issue_3", "c")];
        let vectors: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]];
        store
            .add("issues", &docs, Some(vectors.as_slice()))
            .await
            .unwrap();

        let hits = store.query("issues", &[0.0, 1.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["issue_3", "issue_2"]);
        assert_eq!(hits[0].metadata.issue_id, "3");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn recreate_drops_previous_documents() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();

        assert!(!store
            .recreate_collection("issues", &serde_json::json!({"v": 1}))
            .await
            .unwrap());
        store.add("issues", &[doc("issue_1", "a")], None).await.unwrap();
        assert_eq!(store.count("issues").await.unwrap(), 1);
        assert_eq!(store.count_embedded("issues").await.unwrap(), 0);

        assert!(store
            .recreate_collection("issues", &serde_json::json!({"v": 2}))
            .await
            .unwrap());
        assert_eq!(store.count("issues").await.unwrap(), 0);
        let info = store.collection("issues").await.unwrap().unwrap();
        assert_eq!(info.metadata["v"], 2);
    }

    #[tokio::test]
    async fn text_only_collection_cannot_be_queried() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path()).await.unwrap();
        store
            .recreate_collection("issues", &serde_json::json!({}))
            .await
            .unwrap();
        store.add("issues", &[doc("issue_1", "a")], None).await.unwrap();

        let err = store.query("issues", &[1.0], 5).await.unwrap_err();
        assert!(err.to_string().contains("no embeddings"));
        assert!(store.query("missing", &[1.0], 5).await.is_err());
    }

    #[tokio::test]
    async fn open_existing_requires_database() {
        let dir = TempDir::new().unwrap();
        assert!(VectorStore::open_existing(dir.path()).await.is_err());
        VectorStore::open(dir.path()).await.unwrap().close().await;
        assert!(VectorStore::open_existing(dir.path()).await.is_ok());
    }
}
