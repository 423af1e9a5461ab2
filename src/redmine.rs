//! Redmine REST client.
//!
//! The fetch engine talks to the remote tracker only through the
//! [`IssueApi`] trait, whose methods can fail only with a [`FetchError`].
//! A `FetchError` is always an item- or page-level failure: the engine
//! records it and moves on. Fatal problems (storage, configuration) are
//! `anyhow::Error`s raised outside this seam, so the two can never be
//! mixed up by a caller.
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | [`IssueApi::fetch_page`] | `GET {base}/issues.json?project_id=&limit=&offset=&include=journals&status_id=*&sort=id:asc` |
//! | [`IssueApi::fetch_issue`] | `GET {base}/issues/{id}.json?include=journals,children,attachments,relations,changesets,watchers` |
//!
//! Authentication is the `X-Redmine-API-Key` header on every request.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::models::{Issue, IssueEnvelope, IssuePage, WorkItem};

const ISSUE_INCLUDES: &str = "journals,children,attachments,relations,changesets,watchers";

/// Diagnostic classification of a failed request.
///
/// Every class is handled the same way by the engine; the distinction only
/// shows up in logs and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    NotFound,
    Forbidden,
    Unauthorized,
    RateLimited,
    Server,
    OtherStatus,
    Timeout,
    Transport,
    Malformed,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::NotFound => "not-found",
            FailureClass::Forbidden => "forbidden",
            FailureClass::Unauthorized => "unauthorized",
            FailureClass::RateLimited => "rate-limited",
            FailureClass::Server => "server-error",
            FailureClass::OtherStatus => "http-error",
            FailureClass::Timeout => "timeout",
            FailureClass::Transport => "transport",
            FailureClass::Malformed => "malformed",
        }
    }
}

/// A retryable, item-level fetch failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {item}")]
    Status { item: WorkItem, status: u16 },

    #[error("request for {item} timed out")]
    Timeout { item: WorkItem },

    #[error("transport error for {item}: {message}")]
    Transport { item: WorkItem, message: String },

    #[error("malformed response for {item}: {reason}")]
    Malformed { item: WorkItem, reason: String },
}

impl FetchError {
    pub fn item(&self) -> &WorkItem {
        match self {
            FetchError::Status { item, .. }
            | FetchError::Timeout { item }
            | FetchError::Transport { item, .. }
            | FetchError::Malformed { item, .. } => item,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Status { status, .. } => match *status {
                404 => FailureClass::NotFound,
                403 => FailureClass::Forbidden,
                401 => FailureClass::Unauthorized,
                429 => FailureClass::RateLimited,
                s if s >= 500 => FailureClass::Server,
                _ => FailureClass::OtherStatus,
            },
            FetchError::Timeout { .. } => FailureClass::Timeout,
            FetchError::Transport { .. } => FailureClass::Transport,
            FetchError::Malformed { .. } => FailureClass::Malformed,
        }
    }

    fn from_reqwest(item: WorkItem, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { item }
        } else if err.is_decode() {
            FetchError::Malformed {
                item,
                reason: err.to_string(),
            }
        } else {
            FetchError::Transport {
                item,
                message: err.to_string(),
            }
        }
    }
}

/// Remote operations the resumable fetcher depends on.
#[async_trait]
pub trait IssueApi: Send + Sync {
    /// One page of a project's issue listing.
    async fn fetch_page(
        &self,
        project_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<IssuePage, FetchError>;

    /// One issue with its journals and related detail.
    async fn fetch_issue(&self, issue_id: u64) -> Result<Issue, FetchError>;
}

/// [`IssueApi`] over HTTP with `reqwest`.
pub struct RedmineClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RedmineClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Build a client from the configuration. Fails if no API key is set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        Self::new(&config.redmine.base_url, api_key, config.request_timeout())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        item: WorkItem,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(&url)
            .header("X-Redmine-API-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(item.clone(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                item,
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(item.clone(), e))?;

        serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed {
            item,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl IssueApi for RedmineClient {
    async fn fetch_page(
        &self,
        project_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<IssuePage, FetchError> {
        let item = WorkItem::Page {
            project_id: project_id.to_string(),
            offset,
            limit,
        };
        let url = format!("{}/issues.json", self.base_url);
        let query = [
            ("project_id", project_id.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("include", "journals".to_string()),
            ("status_id", "*".to_string()),
            ("sort", "id:asc".to_string()),
        ];
        self.get(item, url, &query).await
    }

    async fn fetch_issue(&self, issue_id: u64) -> Result<Issue, FetchError> {
        let item = WorkItem::Item { issue_id };
        let url = format!("{}/issues/{}.json", self.base_url, issue_id);
        let query = [("include", ISSUE_INCLUDES.to_string())];
        let envelope: IssueEnvelope = self.get(item, url, &query).await?;
        Ok(envelope.issue)
    }
}

/// Human-readable reason for a status code, for log lines.
pub fn describe_status(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason().map(|r| format!("{} {}", status, r)))
        .unwrap_or_else(|| status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            item: WorkItem::Item { issue_id: 1 },
            status: code,
        }
    }

    #[test]
    fn classifies_auth_and_missing_distinctly() {
        assert_eq!(status(404).class(), FailureClass::NotFound);
        assert_eq!(status(403).class(), FailureClass::Forbidden);
        assert_eq!(status(401).class(), FailureClass::Unauthorized);
        assert_eq!(status(429).class(), FailureClass::RateLimited);
        assert_eq!(status(502).class(), FailureClass::Server);
        assert_eq!(status(418).class(), FailureClass::OtherStatus);
    }

    #[test]
    fn error_message_names_the_work_item() {
        let err = status(404);
        assert_eq!(err.to_string(), "HTTP 404 for issue #1");
        assert_eq!(err.item(), &WorkItem::Item { issue_id: 1 });
    }

    #[test]
    fn describe_status_includes_reason() {
        assert_eq!(describe_status(404), "404 Not Found");
        assert_eq!(describe_status(799), "799");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client =
            RedmineClient::new("https://redmine.example/", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "https://redmine.example");
    }
}
