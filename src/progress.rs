//! Fetch progress reporting.
//!
//! Reports observable progress during `fetch` and `enrich` so users see how
//! far a run got, how many items failed, and when a checkpoint was written.
//! Everything goes to **stderr**; stdout carries only command summaries.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A listing page was stored for a project.
    Page {
        project: String,
        fetched: u64,
        total: u64,
    },
    /// The enrichment run persisted its checkpoint.
    Checkpoint {
        processed: u64,
        total: u64,
        failed: u64,
        exhausted: u64,
    },
    /// Documents were written to the vector store.
    Ingest { inserted: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "fetch qa  1,200 / 5,000 issues".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Page {
                project,
                fetched,
                total,
            } => format!(
                "fetch {}  {} / {} issues\n",
                project,
                format_number(*fetched),
                format_number(*total)
            ),
            ProgressEvent::Checkpoint {
                processed,
                total,
                failed,
                exhausted,
            } => format!(
                "enrich  checkpoint at {} / {}  failed {}  exhausted {}\n",
                format_number(*processed),
                format_number(*total),
                format_number(*failed),
                format_number(*exhausted)
            ),
            ProgressEvent::Ingest { inserted, total } => format!(
                "ingest  {} / {} documents\n",
                format_number(*inserted),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Line-delimited JSON events on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Page {
                project,
                fetched,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "fetch",
                "project": project,
                "n": fetched,
                "total": total
            }),
            ProgressEvent::Checkpoint {
                processed,
                total,
                failed,
                exhausted,
            } => serde_json::json!({
                "event": "checkpoint",
                "phase": "enrich",
                "n": processed,
                "total": total,
                "failed": failed,
                "exhausted": exhausted
            }),
            ProgressEvent::Ingest { inserted, total } => serde_json::json!({
                "event": "progress",
                "phase": "ingest",
                "n": inserted,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Group digits in threes: `1234567` → `1,234,567`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.char_indices() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Value of the global `--progress` flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human output on an interactive stderr, nothing otherwise.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_digits_by_thousands() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(205), "205");
        assert_eq!(format_number(4_100), "4,100");
        assert_eq!(format_number(52_000), "52,000");
        assert_eq!(format_number(9_876_543), "9,876,543");
    }
}
