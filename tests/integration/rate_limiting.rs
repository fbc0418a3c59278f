//! Integration tests for rate limiting and retry behavior

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use amplitude_events_downloader::downloader::rate_limit::Unthrottled;
use amplitude_events_downloader::downloader::RateLimiter;
use amplitude_events_downloader::fetcher::amplitude_config::{AmplitudeConfig, Credentials};
use amplitude_events_downloader::fetcher::amplitude_http::AmplitudeHttpClient;
use amplitude_events_downloader::fetcher::retry::RetryPolicy;
use amplitude_events_downloader::fetcher::{EventSource, FetcherError, PageRequest};

use crate::support::{date, StubServer};

const EMPTY_PAGE: &str = r#"{"events":[]}"#;

fn request() -> PageRequest {
    PageRequest {
        user_id: "alice".to_string(),
        range_start: date(2024, 1, 1),
        range_end: date(2024, 1, 31),
        cursor: None,
    }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        ..RetryPolicy::with_max_retries(max_retries)
    }
}

fn client(base_url: &str, retry: RetryPolicy) -> AmplitudeHttpClient {
    let config = AmplitudeConfig {
        base_url: base_url.to_string(),
        retry,
        ..AmplitudeConfig::default()
    };
    AmplitudeHttpClient::new(
        config,
        Credentials::new("key", "secret").unwrap(),
        Arc::new(Unthrottled),
    )
    .unwrap()
}

#[tokio::test]
async fn test_rolling_window_ceiling_under_concurrent_callers() {
    let window = Duration::from_millis(300);
    let limiter = RateLimiter::new(3, window);
    let start = Instant::now();

    let handles: Vec<_> = (0..7)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire().await;
                start.elapsed()
            })
        })
        .collect();

    let mut grants = Vec::new();
    for handle in handles {
        grants.push(handle.await.unwrap());
    }
    grants.sort();

    // No window of 300ms contains more than 3 grants.
    for pair in grants.windows(4) {
        assert!(
            pair[3] - pair[0] >= window - Duration::from_millis(5),
            "4 grants within one window: {grants:?}"
        );
    }
    assert!(grants[2] < Duration::from_millis(100));
}

#[tokio::test]
async fn test_limiter_clamps_zero_to_one() {
    let limiter = RateLimiter::new(0, Duration::from_millis(50));
    assert_eq!(limiter.max_requests(), 1);
    limiter.acquire().await;
    assert_eq!(limiter.available_permits(), 0);
}

#[tokio::test]
async fn test_limiter_shared_by_http_client() {
    let server = StubServer::start(vec![
        (200, EMPTY_PAGE.to_string()),
        (200, EMPTY_PAGE.to_string()),
    ])
    .await;
    let limiter = Arc::new(RateLimiter::new(1, Duration::from_millis(200)));
    let config = AmplitudeConfig {
        base_url: server.base_url.clone(),
        ..AmplitudeConfig::default()
    };
    let http = AmplitudeHttpClient::new(
        config,
        Credentials::new("key", "secret").unwrap(),
        limiter.clone(),
    )
    .unwrap();

    let start = Instant::now();
    http.fetch_page(&request()).await.unwrap();
    http.fetch_page(&request()).await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(190));
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_429_is_retried_then_succeeds() {
    let server = StubServer::start(vec![
        (429, r#"{"error":"Too many requests"}"#.to_string()),
        (503, "Service Unavailable".to_string()),
        (
            200,
            r#"{"events":[{"uuid":"e1","event_type":"login","event_time":"2024-01-02T10:00:00Z"}]}"#
                .to_string(),
        ),
    ])
    .await;

    let page = client(&server.base_url, fast_retry(5))
        .fetch_page(&request())
        .await
        .unwrap();

    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].user_id, "alice");
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted_fails_entry() {
    let server = StubServer::start(vec![
        (500, "boom".to_string()),
        (500, "boom".to_string()),
        (500, "boom".to_string()),
    ])
    .await;

    let err = client(&server.base_url, fast_retry(1))
        .fetch_page(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::FetchFailed { .. }));
    assert!(!err.is_run_fatal());
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = StubServer::start(vec![(400, r#"{"error":"bad user_id"}"#.to_string())]).await;

    let err = client(&server.base_url, fast_retry(5))
        .fetch_page(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::FetchFailed { .. }));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_not_found_is_run_fatal() {
    let server = StubServer::start(vec![(404, "Not Found".to_string())]).await;

    let err = client(&server.base_url, fast_retry(5))
        .fetch_page(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::NotFound { .. }));
    assert!(err.is_run_fatal());
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = StubServer::start(vec![(200, "<html>maintenance</html>".to_string())]).await;

    let err = client(&server.base_url, fast_retry(5))
        .fetch_page(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::InvalidResponse(_)));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_host_fails_after_retries() {
    // Bind then drop to get a port with nothing listening.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let err = client(&format!("http://{addr}"), fast_retry(1))
        .fetch_page(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::FetchFailed { .. }));
}
