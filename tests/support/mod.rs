//! Shared fixtures for integration tests: a scripted page source and a tiny
//! HTTP server standing in for the export API.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Map;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use amplitude_events_downloader::fetcher::{EventSource, FetcherResult, PageRequest};
use amplitude_events_downloader::{Event, RawPage};

type Script = Box<dyn Fn(&PageRequest) -> FetcherResult<RawPage> + Send + Sync>;

/// Page source driven by a closure, counting calls and peak concurrency
pub struct ScriptedSource {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedSource {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&PageRequest) -> FetcherResult<RawPage> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every user gets one empty, final page
    pub fn empty() -> Self {
        Self::new(|_| Ok(RawPage::default()))
    }

    /// Hold each call open for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requested_users(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.user_id.clone())
            .collect()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch_page(&self, request: &PageRequest) -> FetcherResult<RawPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.script)(request)
    }
}

pub fn event(id: &str, event_type: &str, second: u32) -> Event {
    Event {
        event_id: Some(id.to_string()),
        event_type: event_type.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, second).unwrap(),
        properties: Map::new(),
        user_properties: Map::new(),
        user_id: "alice".to_string(),
    }
}

pub fn page(events: Vec<Event>, cursor: Option<&str>) -> RawPage {
    RawPage {
        events,
        cursor: cursor.map(str::to_string),
        done: false,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn write_manifest(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("user_ids.txt");
    std::fs::write(&path, body).unwrap();
    path
}

/// Names of the files in `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// One request as seen by [`StubServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request target: path and query string
    pub target: String,
    /// Value of the Authorization header
    pub authorization: Option<String>,
}

impl RecordedRequest {
    /// Value of a query parameter (no percent-decoding)
    pub fn query_param(&self, key: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }
}

/// HTTP/1.1 server answering each connection with the next scripted response
///
/// Once the script is exhausted every request gets a 500.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        let task = tokio::spawn({
            let requests = Arc::clone(&requests);
            async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let head = read_head(&mut socket).await;
                    let target = head
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or_default()
                        .to_string();
                    let authorization = head.lines().find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("authorization")
                            .then(|| value.trim().to_string())
                    });
                    requests.lock().unwrap().push(RecordedRequest {
                        target,
                        authorization,
                    });

                    let (status, body) = queue
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or((500, "{}".to_string()));
                    let response = format!(
                        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
