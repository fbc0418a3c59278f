//! End-to-end runs over whole manifests

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use amplitude_events_downloader::downloader::rate_limit::Unthrottled;
use amplitude_events_downloader::downloader::ExtractionExecutor;
use amplitude_events_downloader::fetcher::amplitude_config::{AmplitudeConfig, Credentials};
use amplitude_events_downloader::fetcher::amplitude_http::AmplitudeHttpClient;
use amplitude_events_downloader::fetcher::retry::RetryPolicy;
use amplitude_events_downloader::fetcher::FetcherError;
use amplitude_events_downloader::output::{JsonResultWriter, ResultStore};
use amplitude_events_downloader::{EntryKey, RawPage};

use crate::support::{date, event, file_names, page, write_manifest, ScriptedSource, StubServer};

fn http_client(base_url: &str) -> AmplitudeHttpClient {
    let config = AmplitudeConfig {
        base_url: base_url.to_string(),
        retry: RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..RetryPolicy::with_max_retries(2)
        },
        ..AmplitudeConfig::default()
    };
    let credentials = Credentials::new("test-key", "test-secret").unwrap();
    AmplitudeHttpClient::new(config, credentials, Arc::new(Unthrottled)).unwrap()
}

#[tokio::test]
async fn test_two_page_user_over_http() {
    let server = StubServer::start(vec![
        (
            200,
            r#"{"events":[
                {"uuid":"e1","event_type":"login","event_time":"2024-01-02 10:00:00.000000","user_id":"alice"},
                {"uuid":"e2","event_type":"view","event_time":"2024-01-02 10:05:00.000000","user_id":"alice",
                 "event_properties":{"page":"home"}}
            ],"next_cursor":"c1"}"#
                .to_string(),
        ),
        (
            200,
            r#"{"events":[
                {"uuid":"e2","event_type":"view","event_time":"2024-01-02 10:05:00.000000","user_id":"alice",
                 "event_properties":{"page":"home"}},
                {"uuid":"e3","event_type":"logout","event_time":"2024-01-02 11:00:00.000000","user_id":"alice"}
            ],"next_cursor":null}"#
                .to_string(),
        ),
    ])
    .await;

    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path(), "alice|2024-01-01|2024-01-31\n");
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    let summary = ExtractionExecutor::new(Arc::new(http_client(&server.base_url)), writer.clone())
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert!(!summary.is_aborted());
    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.events_written, 3);

    let key = EntryKey::new("alice", date(2024, 1, 1), date(2024, 1, 31));
    let result = writer.read(&key).unwrap();
    let ids: Vec<_> = result
        .events
        .iter()
        .map(|e| e.event_id.clone().unwrap())
        .collect();
    assert_eq!(ids, vec!["e1", "e2", "e3"]);
    assert_eq!(result.page_count, 2);
    assert_eq!(result.duplicates_dropped, 1);
    assert_eq!(result.events[1].properties["page"], "home");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].target.starts_with("/api/2/export?"));
    assert_eq!(requests[0].query_param("user_id").as_deref(), Some("alice"));
    assert_eq!(requests[0].query_param("start").as_deref(), Some("20240101T00"));
    assert_eq!(requests[0].query_param("end").as_deref(), Some("20240131T23"));
    assert_eq!(requests[0].query_param("cursor"), None);
    assert_eq!(requests[1].query_param("cursor").as_deref(), Some("c1"));
    assert!(requests[0]
        .authorization
        .as_deref()
        .is_some_and(|auth| auth.starts_with("Basic ")));
}

#[tokio::test]
async fn test_malformed_line_does_not_stop_valid_entries() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(
        temp.path(),
        "alice|2024-01-01|2024-01-31\nnot a valid line\nbob|2024-01-31|2024-01-01\ncarol|2024-02-01|2024-02-29\n",
    );
    let source = Arc::new(ScriptedSource::empty());
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    let summary = ExtractionExecutor::new(source.clone(), writer)
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert_eq!(summary.total_entries, 4);
    assert_eq!(summary.succeeded.len(), 2);
    let lines: Vec<usize> = summary.malformed.iter().map(|(line, _)| *line).collect();
    assert_eq!(lines, vec![2, 3]);
    assert_eq!(source.requested_users(), vec!["alice", "carol"]);
    assert_eq!(summary.accounted(), summary.total_entries);
    assert!(!summary.is_aborted());
}

#[tokio::test]
async fn test_auth_failure_aborts_run() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(
        temp.path(),
        "alice|2024-01-01|2024-01-31\nbob|2024-01-01|2024-01-31\ncarol|2024-01-01|2024-01-31\n",
    );
    let source = Arc::new(ScriptedSource::new(|request| {
        if request.user_id == "bob" {
            Err(FetcherError::Auth {
                status: 401,
                message: "HTTP 401 Unauthorized".to_string(),
            })
        } else {
            Ok(RawPage::default())
        }
    }));
    let output = temp.path().join("raw");
    let writer = Arc::new(JsonResultWriter::new(&output).unwrap());

    let summary = ExtractionExecutor::new(source.clone(), writer)
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert!(summary.is_aborted());
    assert!(!summary.interrupted);
    let (entry, cause) = summary.aborted.clone().unwrap();
    assert_eq!(entry.unwrap().user_id, "bob");
    assert!(cause.contains("401"));
    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.not_processed, 1);
    assert_eq!(source.requested_users(), vec!["alice", "bob"]);
    assert_eq!(
        file_names(&output),
        vec!["user_alice_events_20240101_to_20240131.json"]
    );
    assert!(summary.format_report().contains("[ABORTED] at line 2"));
}

#[tokio::test]
async fn test_auth_failure_over_http_is_not_retried() {
    let server = StubServer::start(vec![(401, r#"{"error":"Invalid API key"}"#.to_string())]).await;
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(
        temp.path(),
        "alice|2024-01-01|2024-01-31\nbob|2024-01-01|2024-01-31\n",
    );
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    let summary = ExtractionExecutor::new(Arc::new(http_client(&server.base_url)), writer)
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert!(summary.is_aborted());
    assert_eq!(server.requests().len(), 1);
    assert_eq!(summary.not_processed, 1);
    assert!(summary.aborted.unwrap().1.contains("Invalid API key"));
}

#[tokio::test]
async fn test_failed_entry_does_not_abort_run() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(
        temp.path(),
        "alice|2024-01-01|2024-01-31\nbob|2024-01-01|2024-01-31\n",
    );
    let source = Arc::new(ScriptedSource::new(|request| {
        if request.user_id == "alice" {
            Err(FetcherError::FetchFailed {
                user_id: "alice".to_string(),
                cause: "HTTP 503".to_string(),
            })
        } else {
            Ok(RawPage::default())
        }
    }));
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    let summary = ExtractionExecutor::new(source, writer.clone())
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert!(!summary.is_aborted());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0.user_id, "alice");
    assert_eq!(summary.succeeded.len(), 1);
    assert!(!writer.exists(&EntryKey::new("alice", date(2024, 1, 1), date(2024, 1, 31))));
}

#[tokio::test]
async fn test_repeating_cursor_fails_entry() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path(), "alice|2024-01-01|2024-01-31\n");
    let source = Arc::new(ScriptedSource::new(|_| {
        Ok(page(vec![event("e1", "login", 0)], Some("same")))
    }));
    let output = temp.path().join("raw");
    let writer = Arc::new(JsonResultWriter::new(&output).unwrap());

    let summary = ExtractionExecutor::new(source.clone(), writer)
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert!(!summary.is_aborted());
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].1.contains("pagination stalled"));
    assert_eq!(source.calls(), 2);
    assert!(file_names(&output).is_empty());
}

#[tokio::test]
async fn test_empty_history_is_published() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path(), "newuser|2024-01-01|2024-01-31\n");
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    let summary = ExtractionExecutor::new(Arc::new(ScriptedSource::empty()), writer.clone())
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.events_written, 0);
    let result = writer
        .read(&EntryKey::new("newuser", date(2024, 1, 1), date(2024, 1, 31)))
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.page_count, 1);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let temp = TempDir::new().unwrap();
    let body: String = (0..8)
        .map(|i| format!("user{i}|2024-01-01|2024-01-31\n"))
        .collect();
    let manifest = write_manifest(temp.path(), &body);
    let source = Arc::new(ScriptedSource::empty().with_delay(Duration::from_millis(30)));
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    let summary = ExtractionExecutor::new(source.clone(), writer)
        .with_concurrency(3)
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert_eq!(summary.succeeded.len(), 8);
    assert!(source.peak_in_flight() <= 3);
    assert!(source.peak_in_flight() >= 2);
}

#[tokio::test]
async fn test_default_run_is_sequential() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(
        temp.path(),
        "a|2024-01-01|2024-01-31\nb|2024-01-01|2024-01-31\nc|2024-01-01|2024-01-31\n",
    );
    let source = Arc::new(ScriptedSource::empty().with_delay(Duration::from_millis(10)));
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());

    ExtractionExecutor::new(source.clone(), writer)
        .run_manifest(&manifest)
        .await
        .unwrap();

    assert_eq!(source.peak_in_flight(), 1);
    assert_eq!(source.requested_users(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_unreadable_manifest_is_an_error() {
    let temp = TempDir::new().unwrap();
    let writer = Arc::new(JsonResultWriter::new(temp.path().join("raw")).unwrap());
    let source = Arc::new(ScriptedSource::empty());

    let result = ExtractionExecutor::new(source.clone(), writer)
        .run_manifest(temp.path().join("missing.txt"))
        .await;

    assert!(result.is_err());
    assert_eq!(source.calls(), 0);
}
