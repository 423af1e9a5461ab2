use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use redmine_rag::checkpoint::{listing_key, CheckpointStore, ListingCheckpoint};
use redmine_rag::config::PathsConfig;
use redmine_rag::enrich::{EnrichOptions, Enricher};
use redmine_rag::listing::{ListingOptions, ListingStatus, ProjectFetcher};
use redmine_rag::models::Issue;
use redmine_rag::progress::NoProgress;
use redmine_rag::redmine::{FailureClass, IssueApi, RedmineClient};

fn client(server: &MockServer) -> RedmineClient {
    RedmineClient::new(&server.uri(), "test-key", Duration::from_secs(5)).unwrap()
}

fn page(ids: &[u64], total: u64) -> serde_json::Value {
    let issues: Vec<_> = ids
        .iter()
        .map(|id| json!({"id": id, "subject": format!("issue {}", id)}))
        .collect();
    json!({"issues": issues, "total_count": total, "offset": 0, "limit": 2})
}

#[tokio::test]
async fn test_listing_request_carries_key_and_paging() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues.json"))
        .and(header("X-Redmine-API-Key", "test-key"))
        .and(query_param("project_id", "qa"))
        .and(query_param("offset", "100"))
        .and(query_param("limit", "100"))
        .and(query_param("status_id", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[7, 8], 102)))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server).fetch_page("qa", 100, 100).await.unwrap();
    let ids: Vec<u64> = page.issues.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![7, 8]);
    assert_eq!(page.total_count, Some(102));
}

#[tokio::test]
async fn test_status_and_body_failures_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/404.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/issues/500.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/issues/1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let api = client(&server);
    let err = api.fetch_issue(404).await.unwrap_err();
    assert_eq!(err.class(), FailureClass::NotFound);
    let err = api.fetch_issue(500).await.unwrap_err();
    assert_eq!(err.class(), FailureClass::Server);
    let err = api.fetch_issue(1).await.unwrap_err();
    assert_eq!(err.class(), FailureClass::Malformed);
}

#[tokio::test]
async fn test_interrupted_listing_resumes_without_refetching_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues.json"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[1, 2], 5)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/issues.json"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/issues.json"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[3, 4], 5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/issues.json"))
        .and(query_param("offset", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[5], 5)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let paths = PathsConfig {
        data_dir: dir.path().join("data"),
        ..Default::default()
    };
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    let api = client(&server);
    let options = || ListingOptions {
        page_size: 2,
        page_delay: Duration::ZERO,
        full: false,
    };

    let first = ProjectFetcher::new(&api, &store, &paths, options(), &NoProgress)
        .fetch("qa")
        .await
        .unwrap();
    assert_eq!(first.status, ListingStatus::Partial);
    assert_eq!(first.issues.len(), 2);
    assert!(first.error.is_some());
    let cp: ListingCheckpoint = store.load(&listing_key("qa")).unwrap().unwrap();
    assert_eq!(cp.offset, 2);
    assert_eq!(cp.total, Some(5));

    let second = ProjectFetcher::new(&api, &store, &paths, options(), &NoProgress)
        .fetch("qa")
        .await
        .unwrap();
    assert_eq!(second.status, ListingStatus::Complete);
    let ids: Vec<u64> = second.issues.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(!store.exists(&listing_key("qa")));

    let stored: Vec<Issue> =
        redmine_rag::files::read_required_json(&paths.project_data_file("qa")).unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored
        .iter()
        .all(|i| i.project_identifier.as_deref() == Some("qa")));
}

#[tokio::test]
async fn test_enrichment_against_server_keeps_failed_originals() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/1.json"))
        .and(query_param("include", "journals,children,attachments,relations,changesets,watchers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issue": {
                "id": 1,
                "subject": "issue 1",
                "journals": [{"id": 10, "user": {"id": 3, "name": "Dana"}, "notes": "seen"}]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/issues/2.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    let output = dir.path().join("enriched.json");
    let api = client(&server);
    let input = vec![
        Issue {
            id: 1,
            project_identifier: Some("qa".to_string()),
            ..Default::default()
        },
        Issue {
            id: 2,
            subject: Some("kept".to_string()),
            ..Default::default()
        },
    ];
    let options = EnrichOptions {
        max_retries: 3,
        save_interval: 10,
        delay: Duration::ZERO,
        fresh: false,
    };

    let (issues, summary) = Enricher::new(&api, &store, options, &NoProgress)
        .run(&input, &output)
        .await
        .unwrap();

    assert_eq!(summary.enriched, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.pending, vec![2]);
    assert_eq!(issues[0].journal_count(), 1);
    assert_eq!(issues[0].project_identifier.as_deref(), Some("qa"));
    assert_eq!(issues[1], input[1]);
}
