// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Batch transmission and the retry cycle.
//!
//! The sender posts JSON-array batches to the ingestion endpoint and
//! decides, per response, whether a batch is done, dropped, or persisted
//! for later. Persisting schedules a single deferred scan that resubmits
//! stored batches after the resend interval; at most one scan is pending
//! at a time.
//!
//! Transport is abstracted behind the [`Transport`] trait so tests can
//! script responses without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TelemetryConfig;
use crate::error::TransportError;

use super::store::RetryStore;

const TRACK_PATH: &str = "/v2/track";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw HTTP outcome from a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Posts a serialized batch to the ingestion endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, payload: Vec<u8>) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(config: &TelemetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        let url = format!("{}{TRACK_PATH}", config.endpoint_url().trim_end_matches('/'));
        Self { client, url }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, payload: Vec<u8>) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout(REQUEST_TIMEOUT.as_millis() as u64)
                } else if err.is_builder() {
                    TransportError::InvalidEndpoint(err.to_string())
                } else {
                    TransportError::Network(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// Ingestion service response body for partial-success interpretation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionResponse {
    #[allow(dead_code)]
    items_received: u64,
    items_accepted: u64,
    #[serde(default)]
    errors: Vec<IngestionError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionError {
    index: usize,
    status_code: u16,
    #[allow(dead_code)]
    #[serde(default)]
    message: String,
}

/// Final disposition of a batch handed to [`Sender::send`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SendOutcome {
    /// The endpoint accepted the batch (or there was nothing to send).
    Accepted,
    /// Some or all items were written to the retry store.
    Persisted,
    /// The batch was rejected with no retryable portion.
    Dropped,
}

/// Transmits batches and owns the disk retry cycle.
///
/// Cheap to clone; clones share the transport, store, and scan flag.
#[derive(Clone)]
pub struct Sender {
    config: Arc<TelemetryConfig>,
    transport: Arc<dyn Transport>,
    store: Arc<RetryStore>,
    scan_scheduled: Arc<AtomicBool>,
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl Sender {
    pub fn new(config: Arc<TelemetryConfig>) -> Self {
        let transport = Arc::new(HttpTransport::new(&config));
        let store = RetryStore::new(Arc::clone(&config));
        Self::with_transport(config, transport, store)
    }

    /// Sender with an injected transport and store. Used by tests.
    pub fn with_transport(
        config: Arc<TelemetryConfig>,
        transport: Arc<dyn Transport>,
        store: RetryStore,
    ) -> Self {
        Self {
            config,
            transport,
            store: Arc::new(store),
            scan_scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Post a batch of serialized envelopes and resolve its fate.
    ///
    /// Network-level failures and retryable statuses persist the whole
    /// batch; a 206 persists only the items the service flagged with a
    /// retryable per-item status. Never returns an error: undeliverable
    /// telemetry is persisted or dropped, not surfaced.
    pub async fn send(&self, batch: Vec<String>) -> SendOutcome {
        if batch.is_empty() {
            return SendOutcome::Accepted;
        }

        let body = format!("[{}]", batch.join(","));
        let response = match self.transport.post(body.into_bytes()).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, items = batch.len(), "batch transmission failed");
                if err.is_retryable() && self.persist_batch(&batch).await {
                    return SendOutcome::Persisted;
                }
                return SendOutcome::Dropped;
            }
        };

        self.interpret(response, batch).await
    }

    async fn interpret(&self, response: TransportResponse, batch: Vec<String>) -> SendOutcome {
        let status = response.status;

        if status == 206 {
            return self.interpret_partial(&response.body, batch).await;
        }

        if (200..300).contains(&status) {
            debug!(items = batch.len(), "batch accepted");
            return SendOutcome::Accepted;
        }

        if is_retryable_status(status) {
            warn!(status, items = batch.len(), "retryable ingestion status, persisting batch");
            if self.persist_batch(&batch).await {
                return SendOutcome::Persisted;
            }
            return SendOutcome::Dropped;
        }

        warn!(status, items = batch.len(), "batch rejected");
        SendOutcome::Dropped
    }

    /// A 206 carries a per-item breakdown; keep only the retryable rejects.
    async fn interpret_partial(&self, body: &str, batch: Vec<String>) -> SendOutcome {
        let parsed: IngestionResponse = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "unparseable partial-success response, persisting batch");
                if self.persist_batch(&batch).await {
                    return SendOutcome::Persisted;
                }
                return SendOutcome::Dropped;
            }
        };

        if parsed.errors.is_empty() {
            return SendOutcome::Accepted;
        }

        let retryable: Vec<String> = parsed
            .errors
            .iter()
            .filter(|error| is_retryable_status(error.status_code))
            .filter_map(|error| batch.get(error.index).cloned())
            .collect();

        debug!(
            accepted = parsed.items_accepted,
            rejected = parsed.errors.len(),
            retryable = retryable.len(),
            "partial ingestion success"
        );

        if !retryable.is_empty() && self.persist_batch(&retryable).await {
            return SendOutcome::Persisted;
        }
        SendOutcome::Dropped
    }

    async fn persist_batch(&self, batch: &[String]) -> bool {
        let persisted = Arc::clone(&self.store).persist(batch.join("\n")).await;
        if persisted {
            self.schedule_retry_scan();
        }
        persisted
    }

    /// Crash-path persistence. Synchronous, no resend scan: the process is
    /// going down and a later run will pick the file up.
    pub fn save_on_crash(&self, payload: &str) {
        self.store.persist_sync(payload);
    }

    /// Arrange a single store scan after the resend interval. A scan that
    /// is already pending absorbs later requests.
    fn schedule_retry_scan(&self) {
        if self.scan_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let sender = self.clone();
        tokio::spawn(async move {
            let delay = Duration::from_millis(sender.config.resend_interval_ms());
            tokio::time::sleep(delay).await;
            sender.scan_scheduled.store(false, Ordering::SeqCst);
            sender.recover_and_resubmit().await;
        });
    }

    /// Resubmit stored batches oldest first. Posts go through the
    /// transport directly; a failure here leaves the file in place and
    /// schedules another scan rather than writing a duplicate.
    pub async fn recover_and_resubmit(&self) {
        for path in self.store.pending_files() {
            let batch = match self.store.read_batch(&path) {
                Ok(batch) if !batch.is_empty() => batch,
                Ok(_) => {
                    self.store.remove(&path);
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unreadable retry file, removing");
                    self.store.remove(&path);
                    continue;
                }
            };

            let body = format!("[{}]", batch.join(","));
            match self.transport.post(body.into_bytes()).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    debug!(path = %path.display(), items = batch.len(), "resubmitted stored batch");
                    self.store.remove(&path);
                }
                Ok(response) if !is_retryable_status(response.status) => {
                    warn!(
                        path = %path.display(),
                        status = response.status,
                        "stored batch rejected, removing"
                    );
                    self.store.remove(&path);
                }
                Ok(response) => {
                    debug!(status = response.status, "ingestion still unavailable, deferring scan");
                    self.schedule_retry_scan();
                    break;
                }
                Err(err) => {
                    debug!(error = %err, "resubmission failed, deferring scan");
                    self.schedule_retry_scan();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::store::reset_provisioning_registry;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted transport that records everything it is asked to post.
    struct MockTransport {
        responses: Mutex<Vec<Result<TransportResponse, TransportError>>>,
        posts: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new(responses: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                posts: Mutex::new(Vec::new()),
            }
        }

        fn ok(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status,
                body: body.to_owned(),
            })
        }

        fn posts(&self) -> Vec<String> {
            self.posts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(&self, payload: Vec<u8>) -> Result<TransportResponse, TransportError> {
            self.posts
                .lock()
                .unwrap()
                .push(String::from_utf8(payload).unwrap());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Self::ok(200, "{}")
            } else {
                responses.remove(0)
            }
        }
    }

    fn sender_with(
        tmp: &TempDir,
        responses: Vec<Result<TransportResponse, TransportError>>,
    ) -> (Arc<Sender>, Arc<MockTransport>) {
        reset_provisioning_registry();
        let config = Arc::new(TelemetryConfig::new("test-key", "https://ingest.example.com"));
        let transport = Arc::new(MockTransport::new(responses));
        let store = RetryStore::with_dir(Arc::clone(&config), tmp.path().join("retry"));
        let sender = Arc::new(Sender::with_transport(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            store,
        ));
        (sender, transport)
    }

    fn batch(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_batch_is_accepted_without_posting() {
        let tmp = TempDir::new().unwrap();
        let (sender, transport) = sender_with(&tmp, vec![]);

        assert_eq!(sender.send(Vec::new()).await, SendOutcome::Accepted);
        assert!(transport.posts().is_empty());
    }

    #[tokio::test]
    async fn test_batch_posted_as_json_array() {
        let tmp = TempDir::new().unwrap();
        let (sender, transport) = sender_with(&tmp, vec![MockTransport::ok(200, "{}")]);

        let outcome = sender.send(batch(&["{\"a\":1}", "{\"b\":2}"])).await;
        assert_eq!(outcome, SendOutcome::Accepted);
        assert_eq!(transport.posts(), vec!["[{\"a\":1},{\"b\":2}]"]);
    }

    #[tokio::test]
    async fn test_retryable_status_persists_whole_batch() {
        let tmp = TempDir::new().unwrap();
        let (sender, _) = sender_with(&tmp, vec![MockTransport::ok(503, "")]);

        let outcome = sender.send(batch(&["{\"a\":1}", "{\"b\":2}"])).await;
        assert_eq!(outcome, SendOutcome::Persisted);

        let files = sender.store.pending_files();
        assert_eq!(files.len(), 1);
        let stored = sender.store.read_batch(&files[0]).unwrap();
        assert_eq!(stored, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_client_error_drops_batch() {
        let tmp = TempDir::new().unwrap();
        let (sender, _) = sender_with(&tmp, vec![MockTransport::ok(400, "bad request")]);

        let outcome = sender.send(batch(&["{\"a\":1}"])).await;
        assert_eq!(outcome, SendOutcome::Dropped);
        assert!(sender.store.pending_files().is_empty());
    }

    #[tokio::test]
    async fn test_network_error_persists_batch() {
        let tmp = TempDir::new().unwrap();
        let (sender, _) = sender_with(
            &tmp,
            vec![Err(TransportError::Network("connection reset".to_owned()))],
        );

        let outcome = sender.send(batch(&["{\"a\":1}"])).await;
        assert_eq!(outcome, SendOutcome::Persisted);
        assert_eq!(sender.store.pending_files().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_success_persists_only_retryable_items() {
        let tmp = TempDir::new().unwrap();
        let body = r#"{
            "itemsReceived": 3,
            "itemsAccepted": 1,
            "errors": [
                {"index": 0, "statusCode": 400, "message": "invalid"},
                {"index": 2, "statusCode": 500, "message": "server error"}
            ]
        }"#;
        let (sender, _) = sender_with(&tmp, vec![MockTransport::ok(206, body)]);

        let outcome = sender
            .send(batch(&["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]))
            .await;
        assert_eq!(outcome, SendOutcome::Persisted);

        let files = sender.store.pending_files();
        let stored = sender.store.read_batch(&files[0]).unwrap();
        assert_eq!(stored, vec!["{\"c\":3}"]);
    }

    #[tokio::test]
    async fn test_partial_success_with_no_errors_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let body = r#"{"itemsReceived": 2, "itemsAccepted": 2, "errors": []}"#;
        let (sender, _) = sender_with(&tmp, vec![MockTransport::ok(206, body)]);

        let outcome = sender.send(batch(&["{\"a\":1}", "{\"b\":2}"])).await;
        assert_eq!(outcome, SendOutcome::Accepted);
        assert!(sender.store.pending_files().is_empty());
    }

    #[tokio::test]
    async fn test_recover_resubmits_and_removes_on_success() {
        let tmp = TempDir::new().unwrap();
        let (sender, transport) = sender_with(
            &tmp,
            vec![MockTransport::ok(500, ""), MockTransport::ok(200, "{}")],
        );

        sender.send(batch(&["{\"a\":1}", "{\"b\":2}"])).await;
        assert_eq!(sender.store.pending_files().len(), 1);

        sender.recover_and_resubmit().await;
        assert!(sender.store.pending_files().is_empty());
        assert_eq!(transport.posts().len(), 2);
        assert_eq!(transport.posts()[1], "[{\"a\":1},{\"b\":2}]");
    }

    #[tokio::test]
    async fn test_recover_leaves_file_when_still_failing() {
        let tmp = TempDir::new().unwrap();
        let (sender, _) = sender_with(
            &tmp,
            vec![MockTransport::ok(500, ""), MockTransport::ok(503, "")],
        );

        sender.send(batch(&["{\"a\":1}"])).await;
        sender.recover_and_resubmit().await;

        // Still exactly one file, no duplicate written.
        assert_eq!(sender.store.pending_files().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_drops_permanently_rejected_file() {
        let tmp = TempDir::new().unwrap();
        let (sender, _) = sender_with(
            &tmp,
            vec![MockTransport::ok(500, ""), MockTransport::ok(400, "")],
        );

        sender.send(batch(&["{\"a\":1}"])).await;
        sender.recover_and_resubmit().await;
        assert!(sender.store.pending_files().is_empty());
    }

    #[tokio::test]
    async fn test_save_on_crash_writes_without_posting() {
        let tmp = TempDir::new().unwrap();
        let (sender, transport) = sender_with(&tmp, vec![]);

        sender.save_on_crash("{\"a\":1}\n{\"b\":2}");
        assert!(transport.posts().is_empty());

        let files = sender.store.pending_files();
        assert_eq!(files.len(), 1);
        let stored = sender.store.read_batch(&files[0]).unwrap();
        assert_eq!(stored, vec!["{\"a\":1}", "{\"b\":2}"]);
    }
}
