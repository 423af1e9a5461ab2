//! # Redmine RAG CLI (`redmine-rag`)
//!
//! Harvests issues from a Redmine instance, enriches them with their full
//! journal history, pseudonymizes users and loads the result into a vector
//! store for semantic retrieval.
//!
//! ## Usage
//!
//! ```bash
//! redmine-rag --config ./config/redmine-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `redmine-rag fetch` | List every configured project (resumable), then merge |
//! | `redmine-rag merge` | Build the master dataset from per-project files |
//! | `redmine-rag enrich` | Re-fetch each issue with journals (resumable, bounded retry) |
//! | `redmine-rag anonymize` | Replace user names with `User_<id>` pseudonyms |
//! | `redmine-rag ingest` | Load the anonymized dataset into a collection |
//! | `redmine-rag query` | Similarity search, one-shot or interactive |
//! | `redmine-rag stats` | Journal statistics and collection counts |
//! | `redmine-rag run` | fetch → merge → enrich → anonymize → ingest |
//!
//! Interrupted `fetch` and `enrich` runs resume from their checkpoints when
//! invoked again.

use anyhow::bail;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use redmine_rag::progress::{ProgressMode, ProgressReporter};
use redmine_rag::{anonymize, config, enrich, ingest, listing, logging, merge, query, stats};

/// Resumable Redmine → vector store pipeline.
#[derive(Parser)]
#[command(
    name = "redmine-rag",
    about = "Redmine RAG: harvest, enrich, anonymize and index Redmine issues",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/redmine-rag.toml`; when that default file is
    /// absent built-in defaults and environment variables are used.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Progress on stderr: off, human, or json. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every issue of the configured projects.
    ///
    /// Each project resumes from its checkpoint. A failed page stops that
    /// project only; run the command again to continue.
    Fetch {
        /// Project identifier; repeatable. Defaults to the configured list.
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Ignore checkpoints and stored files and list from scratch.
        #[arg(long)]
        full: bool,

        /// Skip writing the master dataset afterwards.
        #[arg(long)]
        no_merge: bool,
    },

    /// Merge per-project files into the master dataset.
    Merge {
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fetch each issue individually to add its journals.
    ///
    /// Failed issues are retried on later runs up to
    /// `[enrichment].max_retries` times; after that the original record is
    /// kept and the issue is reported as retry-exhausted.
    Enrich {
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,

        /// Ignore the checkpoint and previous results.
        #[arg(long)]
        fresh: bool,
    },

    /// Replace user names with stable pseudonyms.
    Anonymize {
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,

        /// Mapping file (id → original and anonymous name).
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Do not seed from an existing mapping file.
        #[arg(long)]
        fresh_mapping: bool,
    },

    /// Load a dataset into a vector store collection (recreated).
    Ingest {
        #[arg(long, short = 'd')]
        data: Option<PathBuf>,

        /// Vector store directory.
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long)]
        collection: Option<String>,

        /// Documents per embedding/insert batch.
        #[arg(long)]
        batch: Option<usize>,

        /// Maximum characters per document before truncation.
        #[arg(long)]
        max_text: Option<usize>,
    },

    /// Search a collection. Interactive without `--query`.
    Query {
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long)]
        collection: Option<String>,

        #[arg(long = "top-k", alias = "topk")]
        top_k: Option<usize>,

        /// Run a single query and exit.
        #[arg(long)]
        query: Option<String>,
    },

    /// Show journal statistics and collection counts.
    Stats {
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Run fetch, merge, enrich, anonymize and ingest in order.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging, cli.verbose);

    let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let reporter = mode.reporter();
    let progress: &dyn ProgressReporter = reporter.as_ref();

    match cli.command {
        Commands::Fetch {
            projects,
            full,
            no_merge,
        } => {
            listing::run_fetch(&cfg, projects, full, !no_merge, progress).await?;
        }
        Commands::Merge { output } => {
            merge::run_merge(&cfg, output)?;
        }
        Commands::Enrich {
            input,
            output,
            fresh,
        } => {
            enrich::run_enrich(&cfg, input, output, fresh, progress).await?;
        }
        Commands::Anonymize {
            input,
            output,
            mapping,
            fresh_mapping,
        } => {
            anonymize::run_anonymize(&cfg, input, output, mapping, fresh_mapping)?;
        }
        Commands::Ingest {
            data,
            db,
            collection,
            batch,
            max_text,
        } => {
            let args = ingest::IngestArgs {
                data,
                db,
                collection,
                batch,
                max_text,
            };
            ingest::run_ingest(&cfg, args, progress).await?;
        }
        Commands::Query {
            db,
            collection,
            top_k,
            query,
        } => {
            let args = query::QueryArgs {
                db,
                collection,
                top_k,
                query,
            };
            query::run_query(&cfg, args).await?;
            return Ok(());
        }
        Commands::Stats {
            input,
            db,
            collection,
        } => {
            stats::run_stats(&cfg, input, db, collection).await?;
            return Ok(());
        }
        Commands::Run => {
            let partial = listing::run_fetch(&cfg, Vec::new(), false, true, progress).await?;
            if partial > 0 {
                bail!(
                    "{} project(s) incomplete; run again to resume before enriching",
                    partial
                );
            }
            enrich::run_enrich(&cfg, None, None, false, progress).await?;
            anonymize::run_anonymize(&cfg, None, None, None, false)?;
            ingest::run_ingest(&cfg, ingest::IngestArgs::default(), progress).await?;
        }
    }

    println!("ok");
    Ok(())
}
