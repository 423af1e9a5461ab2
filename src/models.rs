//! Core data models used throughout the pipeline.
//!
//! Redmine returns loosely shaped JSON. The fields the pipeline reads are
//! typed; everything else is kept verbatim in a flattened `extra` map so the
//! records written between stages lose nothing the API returned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A reference to a Redmine user (`author`, `assigned_to`, journal `user`,
/// watchers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
            extra: Map::new(),
        }
    }
}

/// A named reference such as `project`, `tracker`, `status` or `priority`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NamedRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One discussion / change entry attached to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Journal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A Redmine issue as stored in every result file of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Issue {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<NamedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<String>,
    /// `None` when the API response carried no `journals` key at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journals: Option<Vec<Journal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchers: Option<Vec<UserRef>>,
    /// Identifier of the project whose listing produced this issue. Set
    /// locally, never returned by Redmine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_identifier: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Issue {
    pub fn journals(&self) -> &[Journal] {
        self.journals.as_deref().unwrap_or(&[])
    }

    pub fn journal_count(&self) -> usize {
        self.journals().len()
    }
}

/// One page of `GET /issues.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuePage {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

/// Envelope of `GET /issues/{id}.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueEnvelope {
    pub issue: Issue,
}

/// The unit of fetch handed to the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Page {
        project_id: String,
        offset: u64,
        limit: u64,
    },
    Item {
        issue_id: u64,
    },
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItem::Page {
                project_id,
                offset,
                limit,
            } => write!(f, "project '{}' offset {} limit {}", project_id, offset, limit),
            WorkItem::Item { issue_id } => write!(f, "issue #{}", issue_id),
        }
    }
}
