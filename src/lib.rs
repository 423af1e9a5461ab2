//! # Redmine RAG
//!
//! A resumable ETL pipeline that turns a Redmine instance into a searchable
//! vector store for retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ listing  │──▶│ merge │──▶│  enrich  │──▶│ anonymize │──▶│  ingest  │
//! │ per proj │   │       │   │ per issue│   │           │   │ + query  │
//! └────┬─────┘   └───────┘   └────┬─────┘   └───────────┘   └──────────┘
//!      │                          │
//!      └──────── checkpoint ──────┘
//! ```
//!
//! Both fetch stages talk to Redmine through [`redmine::IssueApi`] and keep
//! their progress in a [`checkpoint::CheckpointStore`], so an interrupted run
//! continues where it stopped when the program is started again.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, environment overrides, path layout |
//! | [`models`] | Issue, journal and user reference records |
//! | [`files`] | JSON read and atomic write helpers |
//! | [`checkpoint`] | Durable fetch progress |
//! | [`redmine`] | Redmine REST client and fetch errors |
//! | [`listing`] | Resumable paginated project listing |
//! | [`merge`] | Master dataset assembly |
//! | [`enrich`] | Resumable per-issue enrichment with bounded retry |
//! | [`anonymize`] | User pseudonymization |
//! | [`document`] | Issue → document text and metadata |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`vector_store`] | SQLite-backed collections |
//! | [`ingest`] | Collection loading |
//! | [`query`] | Similarity search |
//! | [`stats`] | Dataset statistics |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | Tracing subscriber set-up |

pub mod anonymize;
pub mod checkpoint;
pub mod config;
pub mod document;
pub mod embedding;
pub mod enrich;
pub mod files;
pub mod ingest;
pub mod listing;
pub mod logging;
pub mod merge;
pub mod models;
pub mod progress;
pub mod query;
pub mod redmine;
pub mod stats;
pub mod vector_store;
