//! The poll-and-forward loop.
//!
//! ```text
//! Polling ──ok──▶ Processing(batch) ──▶ Sleeping ──tick──▶ Polling
//!    └──fetch failed──────────────────────▲   └──interrupt──▶ Stopped
//! ```
//!
//! Every failure below the loop is recovered locally: a failed poll skips
//! the cycle, a malformed message is dropped, a failed send is logged.
//! Panics are caught per message and per loop step.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::config::{BridgeConfig, DEFAULT_POLL_INTERVAL};
use crate::error::{ConfigError, Error};
use crate::mail::{Mailer, create_transport};
use crate::pipeline::{compose, transform};
use crate::signal::{MessageSource, SignalClient};

/// States of the driving loop.
#[derive(Debug)]
pub enum LoopState {
    Polling,
    Processing(Vec<serde_json::Value>),
    Sleeping,
    Stopped,
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Email composed and accepted by the transport.
    Forwarded,
    /// No text and no attachments.
    Skipped,
    /// Malformed, or the send failed.
    Failed,
}

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub source_failed: bool,
    pub fetched: usize,
    pub forwarded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Forwarded => self.forwarded += 1,
            MessageOutcome::Skipped => self.skipped += 1,
            MessageOutcome::Failed => self.failed += 1,
        }
    }
}

/// Forwards messages from one signal account to one mailbox.
pub struct Bridge {
    account: String,
    poll_interval: Duration,
    utc_offset: Option<FixedOffset>,
    source: Arc<dyn MessageSource>,
    mailer: Mailer,
}

impl Bridge {
    pub fn new(account: impl Into<String>, source: Arc<dyn MessageSource>, mailer: Mailer) -> Self {
        Self {
            account: account.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            utc_offset: None,
            source,
            mailer,
        }
    }

    /// Wire up the signal client and mail transport from configuration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, Error> {
        let source = SignalClient::new(config.api_url.clone(), config.http_timeout).map_err(|e| {
            ConfigError::InvalidValue {
                key: "HTTP_TIMEOUT_SECS".into(),
                message: format!("failed to build HTTP client: {e}"),
            }
        })?;
        let transport = create_transport(&config.transport)?;
        let mailer = Mailer::new(
            transport,
            config.email_from.clone(),
            config.email_to.clone(),
        );

        Ok(Self::new(config.account.clone(), Arc::new(source), mailer)
            .with_poll_interval(config.poll_interval)
            .with_utc_offset(config.utc_offset))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Render timestamps in a fixed offset instead of the local zone.
    pub fn with_utc_offset(mut self, offset: Option<FixedOffset>) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(&self) {
        self.run_until(shutdown_signal()).await;
    }

    /// Run until `shutdown` completes. The signal is only observed between
    /// cycles; a cycle in flight always finishes.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let mut state = LoopState::Polling;
        let mut report = CycleReport::default();

        info!(
            account = %self.account,
            interval_secs = self.poll_interval.as_secs_f64(),
            "Starting Signal to Email bridge..."
        );

        loop {
            state = match state {
                LoopState::Polling => {
                    report = CycleReport::default();
                    guarded(self.poll(&mut report))
                        .await
                        .unwrap_or(LoopState::Sleeping)
                }
                LoopState::Processing(batch) => {
                    guarded(self.process_batch(&batch, &mut report)).await;
                    if report.fetched > 0 {
                        info!(
                            fetched = report.fetched,
                            forwarded = report.forwarded,
                            skipped = report.skipped,
                            failed = report.failed,
                            "Poll cycle complete"
                        );
                    }
                    LoopState::Sleeping
                }
                LoopState::Sleeping => {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => LoopState::Stopped,
                        _ = tokio::time::sleep(self.poll_interval) => LoopState::Polling,
                    }
                }
                LoopState::Stopped => {
                    info!("Shutting down...");
                    return;
                }
            };
        }
    }

    /// One poll cycle: fetch, then process every message in order.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        if let LoopState::Processing(batch) = self.poll(&mut report).await {
            self.process_batch(&batch, &mut report).await;
        }
        report
    }

    /// `Polling` step: `Processing(batch)` on success, `Sleeping` when the
    /// fetch failed.
    async fn poll(&self, report: &mut CycleReport) -> LoopState {
        match self.source.fetch_pending(&self.account).await {
            Ok(batch) => {
                report.fetched = batch.len();
                LoopState::Processing(batch)
            }
            Err(e) => {
                error!("Failed to receive messages: {e}");
                report.source_failed = true;
                LoopState::Sleeping
            }
        }
    }

    /// `Processing` step. A panic in one message only fails that message.
    async fn process_batch(&self, batch: &[serde_json::Value], report: &mut CycleReport) {
        for raw in batch {
            let outcome = AssertUnwindSafe(self.process_message(raw))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    error!("Failed to process message: {}", panic_message(&panic));
                    log_raw_message(raw);
                    MessageOutcome::Failed
                });
            report.record(outcome);
        }
    }

    /// Transform, compose and send one raw message.
    pub async fn process_message(&self, raw: &serde_json::Value) -> MessageOutcome {
        let message = match transform(raw, self.source.as_ref(), self.utc_offset).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Skipping message without text or attachments");
                return MessageOutcome::Skipped;
            }
            Err(e) => {
                error!("Failed to process message: {e}");
                log_raw_message(raw);
                return MessageOutcome::Failed;
            }
        };

        let email = compose(&message);
        if !self.mailer.send(&email).await {
            return MessageOutcome::Failed;
        }

        info!(
            "Forwarded message from {} ({}, {} attachments)",
            message.label(),
            if message.text.is_empty() {
                "no text"
            } else {
                "with text"
            },
            message.attachments.len()
        );
        MessageOutcome::Forwarded
    }
}

/// Run one loop step, turning a panic into a logged `None`.
async fn guarded<T>(step: impl Future<Output = T>) -> Option<T> {
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(value) => Some(value),
        Err(panic) => {
            error!("Error in main loop: {}", panic_message(&panic));
            None
        }
    }
}

fn log_raw_message(raw: &serde_json::Value) {
    error!(
        "Message content: {}",
        serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string())
    );
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use lettre::address::Envelope;
    use serde_json::json;

    use super::*;
    use crate::error::{AttachmentError, MailError, SourceError};
    use crate::mail::MailTransport;

    /// Serves one canned batch per poll; `None` simulates a failed poll.
    #[derive(Default)]
    struct StubSource {
        batches: Mutex<Vec<Option<Vec<serde_json::Value>>>>,
        attachments: HashMap<String, Vec<u8>>,
        polls: AtomicUsize,
        panic_on_first_poll: bool,
    }

    impl StubSource {
        fn with_batches(batches: Vec<Option<Vec<serde_json::Value>>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl MessageSource for StubSource {
        async fn fetch_pending(
            &self,
            _account: &str,
        ) -> Result<Vec<serde_json::Value>, SourceError> {
            if self.polls.fetch_add(1, Ordering::SeqCst) == 0 && self.panic_on_first_poll {
                panic!("receive handler blew up");
            }
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Ok(Vec::new());
            }
            batches
                .remove(0)
                .ok_or_else(|| SourceError::Status {
                    url: "http://stub/v1/receive/+1".into(),
                    status: 500,
                })
        }

        async fn fetch_attachment_content(
            &self,
            attachment_id: &str,
        ) -> Result<Vec<u8>, AttachmentError> {
            if attachment_id == "explode" {
                panic!("attachment handler blew up");
            }
            self.attachments
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| AttachmentError::Status {
                    id: attachment_id.to_string(),
                    status: 404,
                })
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        fail: bool,
        delivered: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, _envelope: &Envelope, raw: &[u8]) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Exit {
                    program: "msmtp".into(),
                    status: "exit status: 1".into(),
                    stderr: "boom".into(),
                });
            }
            self.delivered.lock().unwrap().push(raw.to_vec());
            Ok(())
        }
    }

    fn bridge(source: Arc<StubSource>, transport: Arc<RecordingTransport>) -> Bridge {
        let mailer = Mailer::new(
            transport,
            "signal@example.com".parse().unwrap(),
            "me@example.com".parse().unwrap(),
        );
        Bridge::new("+31612345678", source, mailer)
            .with_poll_interval(Duration::from_millis(10))
            .with_utc_offset(FixedOffset::east_opt(0))
    }

    fn text_message(text: &str) -> serde_json::Value {
        json!({"envelope": {
            "sourceNumber": "+15551234567",
            "sourceName": "Alice",
            "timestamp": 1700000000000_i64,
            "dataMessage": {"message": text}
        }})
    }

    #[tokio::test]
    async fn text_message_is_forwarded() {
        let source = Arc::new(StubSource::with_batches(vec![Some(vec![text_message("Hello")])]));
        let transport = Arc::new(RecordingTransport::default());
        let report = bridge(source, Arc::clone(&transport)).run_cycle().await;

        assert_eq!(
            report,
            CycleReport {
                fetched: 1,
                forwarded: 1,
                ..Default::default()
            }
        );
        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let raw = String::from_utf8_lossy(&delivered[0]);
        assert!(raw.contains("Signal Message from Alice (+15551234567) at 2023-11-14 22:13:20"));
    }

    #[tokio::test]
    async fn empty_message_produces_no_email() {
        let empty = json!({"envelope": {"sourceNumber": "+1", "dataMessage": {"message": ""}}});
        let source = Arc::new(StubSource::with_batches(vec![Some(vec![empty])]));
        let transport = Arc::new(RecordingTransport::default());
        let report = bridge(source, Arc::clone(&transport)).run_cycle().await;

        assert_eq!(report.skipped, 1);
        assert!(transport.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn source_failure_is_contained() {
        let source = Arc::new(StubSource::with_batches(vec![None]));
        let transport = Arc::new(RecordingTransport::default());
        let report = bridge(source, transport).run_cycle().await;

        assert!(report.source_failed);
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn bad_message_does_not_stop_siblings() {
        let batch = vec![
            json!({"envelope": "garbage"}),
            text_message("second"),
            json!({"envelope": {"sourceNumber": "+1", "dataMessage": {
                "attachments": [{"id": "explode", "contentType": "image/png"}]
            }}}),
            text_message("fourth"),
        ];
        let source = Arc::new(StubSource::with_batches(vec![Some(batch)]));
        let transport = Arc::new(RecordingTransport::default());
        let report = bridge(source, Arc::clone(&transport)).run_cycle().await;

        assert_eq!(report.fetched, 4);
        assert_eq!(report.forwarded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(transport.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn send_failure_is_reported_not_raised() {
        let source = Arc::new(StubSource::with_batches(vec![Some(vec![
            text_message("one"),
            text_message("two"),
        ])]));
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let report = bridge(source, transport).run_cycle().await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.forwarded, 0);
    }

    #[tokio::test]
    async fn attachment_failure_still_sends() {
        let mut source = StubSource::with_batches(vec![Some(vec![json!({"envelope": {
            "sourceNumber": "+1",
            "dataMessage": {"attachments": [
                {"id": "missing", "contentType": "image/png", "filename": "a.png", "size": 10},
                {"id": "present", "contentType": "image/png", "filename": "b.png", "size": 3}
            ]}
        }})])]);
        source
            .attachments
            .insert("present".into(), b"png".to_vec());
        let transport = Arc::new(RecordingTransport::default());
        let report = bridge(Arc::new(source), Arc::clone(&transport)).run_cycle().await;

        assert_eq!(report.forwarded, 1);
        let delivered = transport.delivered.lock().unwrap();
        let raw = String::from_utf8_lossy(&delivered[0]);
        assert!(raw.contains("b.png"));
        assert!(!raw.contains("a.png"));
    }

    #[tokio::test]
    async fn run_until_stops_on_shutdown() {
        let source = Arc::new(StubSource::with_batches(vec![
            None,
            Some(vec![text_message("after failure")]),
        ]));
        let transport = Arc::new(RecordingTransport::default());
        let b = bridge(Arc::clone(&source), Arc::clone(&transport));

        tokio::time::timeout(
            Duration::from_secs(5),
            b.run_until(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .expect("loop should stop on shutdown");

        assert!(source.polls.load(Ordering::SeqCst) >= 2);
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn immediate_shutdown_still_completes_first_cycle() {
        let source = Arc::new(StubSource::with_batches(vec![Some(vec![text_message("hi")])]));
        let transport = Arc::new(RecordingTransport::default());
        let b = bridge(Arc::clone(&source), Arc::clone(&transport));

        b.run_until(async {}).await;

        assert_eq!(source.polls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn loop_survives_panicking_poll() {
        let source = Arc::new(StubSource {
            panic_on_first_poll: true,
            ..StubSource::with_batches(vec![Some(vec![text_message("after panic")])])
        });
        let transport = Arc::new(RecordingTransport::default());
        let b = bridge(Arc::clone(&source), Arc::clone(&transport));

        tokio::time::timeout(
            Duration::from_secs(5),
            b.run_until(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .expect("loop should stop on shutdown");

        assert!(source.polls.load(Ordering::SeqCst) >= 2);
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn panic_message_extracts_text() {
        let panic: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&panic), "static str");
        let panic: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&panic), "owned");
        let panic: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&panic), "unknown panic");
    }
}
