//! Issue → indexable document.
//!
//! ```text
//! Subject: <subject>
//! Description: <description>        (omitted when empty)
//! Comments:                          (omitted when there are no journals)
//! - <user>: <notes>                  (one line per journal with notes)
//! ```
//!
//! Text longer than `max_text` characters is cut and suffixed with
//! [`TRUNCATION_MARKER`].

use serde::{Deserialize, Serialize};

use crate::models::{Issue, NamedRef, UserRef};

pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

const SUBJECT_METADATA_CHARS: usize = 500;

/// Flat metadata stored alongside every document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub issue_id: String,
    pub subject: String,
    pub status: String,
    pub priority: String,
    pub tracker: String,
    pub project: String,
    pub project_id: String,
    pub created_on: String,
    pub updated_on: String,
    pub author: String,
    pub assigned_to: String,
    pub num_journals: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

pub fn document_id(issue_id: u64) -> String {
    format!("issue_{}", issue_id)
}

pub fn prepare_document(issue: &Issue, max_text: usize) -> Document {
    let subject = issue.subject.as_deref().unwrap_or("");
    let mut parts = vec![format!("Subject: {}", subject)];

    if let Some(description) = issue.description.as_deref().filter(|d| !d.is_empty()) {
        parts.push(format!("Description: {}", description));
    }

    let journals = issue.journals();
    if !journals.is_empty() {
        parts.push("Comments:".to_string());
        for journal in journals {
            let Some(notes) = journal.notes.as_deref().filter(|n| !n.is_empty()) else {
                continue;
            };
            let user = journal
                .user
                .as_ref()
                .and_then(|u| u.name.as_deref())
                .unwrap_or("Unknown");
            parts.push(format!("- {}: {}", user, notes));
        }
    }

    let text = truncate(parts.join("\n").trim(), max_text);

    Document {
        id: document_id(issue.id),
        text,
        metadata: DocumentMetadata {
            issue_id: issue.id.to_string(),
            subject: subject.chars().take(SUBJECT_METADATA_CHARS).collect(),
            status: named(&issue.status),
            priority: named(&issue.priority),
            tracker: named(&issue.tracker),
            project: named(&issue.project),
            project_id: issue.project_identifier.clone().unwrap_or_default(),
            created_on: issue.created_on.clone().unwrap_or_default(),
            updated_on: issue.updated_on.clone().unwrap_or_default(),
            author: user_name(&issue.author),
            assigned_to: user_name(&issue.assigned_to),
            num_journals: journals.len(),
        },
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

fn named(value: &Option<NamedRef>) -> String {
    value
        .as_ref()
        .and_then(|v| v.name.clone())
        .unwrap_or_default()
}

fn user_name(value: &Option<UserRef>) -> String {
    value
        .as_ref()
        .and_then(|v| v.name.clone())
        .unwrap_or_default()
}
