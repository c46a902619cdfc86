use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::StreamExt;
use log::{error, info, trace, warn};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::HarvesterConfig;
use crate::credentials::AccessToken;
use crate::event::Event;
use crate::metrics::{METRICS, incr};
use crate::publisher::Publisher;
use crate::twitter::source::{EventStream, StreamConnector};

use super::backoff::ReconnectPolicy;

/// Lifecycle of one stream worker.
///
/// Starting → Running → Backoff → Running → ... → Failed.
/// `Failed` and `Stopped` are terminal; a terminated worker is replaced,
/// never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Backoff,
    /// Error budget exhausted
    Failed,
    /// Shut down, or the server closed the stream
    Stopped,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// Why [`StreamWorker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Exhausted,
    /// The server closed the stream. The close counts as an error, so
    /// `consecutive_errors` is at least 1 and seeds the replacement.
    StreamEnded { consecutive_errors: u32 },
    Cancelled,
}

enum Session {
    Ended,
    Cancelled,
    Failed(anyhow::Error),
}

/// Owns one filtered-stream connection for a single (account, box) pair.
///
/// RESPONSIBILITIES:
/// - Connection lifecycle and reconnect backoff
/// - Forwarding geotagged events to the publisher
///
/// NOT RESPONSIBLE FOR:
/// - Replacing itself after failure (the supervisor does that)
/// - Waiting for deliveries: sends are fire-and-forget, the publisher
///   logs their outcome
pub struct StreamWorker {
    config: Arc<HarvesterConfig>,
    token: AccessToken,
    connector: Arc<dyn StreamConnector>,
    publisher: Publisher,
    policy: ReconnectPolicy,
    status: watch::Sender<WorkerStatus>,
    consecutive_errors: u32,
}

impl StreamWorker {
    pub fn new(
        config: Arc<HarvesterConfig>,
        token: AccessToken,
        connector: Arc<dyn StreamConnector>,
        publisher: Publisher,
        policy: ReconnectPolicy,
    ) -> Self {
        let (status, _) = watch::channel(WorkerStatus::Starting);
        Self {
            config,
            token,
            connector,
            publisher,
            policy,
            status,
            consecutive_errors: 0,
        }
    }

    /// Carries the error count of the worker this one replaces: the first
    /// connect then waits out the matching backoff.
    pub fn resume_after(mut self, consecutive_errors: u32) -> Self {
        self.consecutive_errors = consecutive_errors;
        self
    }

    pub fn status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Streams until the error budget is spent, the server closes the
    /// stream, or `shutdown` fires. Backoff sleeps observe `shutdown`.
    ///
    /// Every connect after the first error, including the first connect of
    /// a resumed worker, is preceded by `policy.delay(n)`.
    pub async fn run(mut self, shutdown: CancellationToken) -> WorkerExit {
        let _active = ActiveWorker::enter();
        self.run_loop(&shutdown).await
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> WorkerExit {
        let label = self.config.label.clone();

        loop {
            if self.consecutive_errors > 0 {
                self.set_status(WorkerStatus::Backoff);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return self.stop(WorkerExit::Cancelled),
                    _ = sleep(self.policy.delay(self.consecutive_errors)) => {}
                }
                incr(&METRICS.reconnects);
            }

            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.stop(WorkerExit::Cancelled),
                result = self.connector.connect(&self.config, &self.token) => result,
            };

            let error = match connected {
                Ok(stream) => {
                    self.set_status(WorkerStatus::Running);
                    match self.consume(stream, shutdown).await {
                        Session::Ended => {
                            self.consecutive_errors += 1;
                            incr(&METRICS.stream_errors);
                            if self.policy.exhausted(self.consecutive_errors) {
                                return self.give_up(&anyhow::anyhow!("stream closed by server"));
                            }
                            info!("[{label}] stream closed by server");
                            return self.stop(WorkerExit::StreamEnded {
                                consecutive_errors: self.consecutive_errors,
                            });
                        }
                        Session::Cancelled => return self.stop(WorkerExit::Cancelled),
                        Session::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.consecutive_errors += 1;
            incr(&METRICS.stream_errors);

            if self.policy.exhausted(self.consecutive_errors) {
                return self.give_up(&error);
            }

            warn!(
                "[{label}] disconnected ({}/{}): {error:#}, reconnecting in {:?}",
                self.consecutive_errors,
                self.policy.max_errors,
                self.policy.delay(self.consecutive_errors)
            );
        }
    }

    fn give_up(&self, last: &anyhow::Error) -> WorkerExit {
        error!(
            "[{}] giving up after {} consecutive errors, last: {last:#}",
            self.config.label, self.consecutive_errors
        );
        self.set_status(WorkerStatus::Failed);
        WorkerExit::Exhausted
    }

    async fn consume(&mut self, mut stream: EventStream, shutdown: &CancellationToken) -> Session {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Session::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    self.consecutive_errors = 0;
                    incr(&METRICS.events_received);
                    self.forward(&event);
                }
                Some(Err(e)) => return Session::Failed(e),
                None => return Session::Ended,
            }
        }
    }

    /// Sends geotagged events; drops everything else.
    fn forward(&self, event: &Event) {
        if !event.has_coordinates() {
            incr(&METRICS.events_dropped);
            return;
        }

        trace!("[{}] forwarding {}", self.config.label, event.id().unwrap_or("?"));
        match self.publisher.publish(&self.config.label, event) {
            Ok(_pending) => incr(&METRICS.events_forwarded),
            Err(e) => warn!("[{}] event not forwarded: {e:#}", self.config.label),
        }
    }

    fn set_status(&self, status: WorkerStatus) {
        self.status.send_replace(status);
    }

    fn stop(&self, exit: WorkerExit) -> WorkerExit {
        self.set_status(WorkerStatus::Stopped);
        exit
    }
}

/// Holds the `workers_active` gauge up while a worker runs, including
/// when its task unwinds.
struct ActiveWorker;

impl ActiveWorker {
    fn enter() -> Self {
        METRICS.workers_active.fetch_add(1, Ordering::Relaxed);
        Self
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        METRICS.workers_active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::publisher::RetryPolicy;
    use crate::testing::{RecordingTransport, Script, ScriptedConnector, geotagged, harvester, token, untagged};

    fn publisher(transport: &Arc<RecordingTransport>) -> Publisher {
        Publisher::new(
            transport.clone(),
            "tweets",
            RetryPolicy {
                max_retries: 0,
                backoff: Duration::from_millis(10),
            },
        )
    }

    fn worker(connector: &Arc<ScriptedConnector>, transport: &Arc<RecordingTransport>) -> StreamWorker {
        StreamWorker::new(
            Arc::new(harvester(1)),
            token(),
            connector.clone(),
            publisher(transport),
            ReconnectPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_ten_consecutive_errors() {
        let connector = Arc::new(ScriptedConnector::new(Script::Refuse));
        let transport = Arc::new(RecordingTransport::default());
        let worker = worker(&connector, &transport);
        let status = worker.status();

        let started = Instant::now();
        let exit = worker.run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::Exhausted);
        assert_eq!(*status.borrow(), WorkerStatus::Failed);
        // initial attempt + 9 reconnects, none after the tenth error
        assert_eq!(connector.connects().len(), 10);
        // sum of (2n)^2 for n in 1..=9
        assert_eq!(started.elapsed(), Duration::from_secs(1140));
    }

    #[tokio::test(start_paused = true)]
    async fn received_message_resets_error_count() {
        let mut scripts = vec![Script::Refuse; 9];
        scripts.push(Script::EventsThenError(vec![untagged("1")]));
        let connector = Arc::new(ScriptedConnector::new(Script::Refuse).script("box-1", scripts));
        let transport = Arc::new(RecordingTransport::default());

        let exit = worker(&connector, &transport).run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::Exhausted);
        // 9 failures, one session that resets the count, then 10 more errors
        // (the session's own error plus 9 refusals)
        assert_eq!(connector.connects().len(), 19);
    }

    #[tokio::test]
    async fn forwards_only_geotagged_events() {
        let connector = Arc::new(ScriptedConnector::new(Script::EventsThenHang(vec![
            geotagged("1"),
            untagged("2"),
            serde_json::json!({ "id_str": "3" }),
            geotagged("4"),
            serde_json::json!({ "limit": { "track": 3 } }),
        ])));
        let transport = Arc::new(RecordingTransport::default());
        let worker = worker(&connector, &transport);
        let mut status = worker.status();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(worker.run(shutdown.clone()));

        status.wait_for(|s| *s == WorkerStatus::Running).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.delivered().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        assert_eq!(task.await.unwrap(), WorkerExit::Cancelled);
        let mut ids = transport.delivered_ids();
        ids.sort();
        assert_eq!(ids, ["1", "4"]);
        assert_eq!(*status.borrow(), WorkerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let connector = Arc::new(ScriptedConnector::new(Script::Refuse));
        let transport = Arc::new(RecordingTransport::default());
        let worker = worker(&connector, &transport);
        let mut status = worker.status();

        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let task = tokio::spawn(worker.run(shutdown.clone()));

        status.wait_for(|s| *s == WorkerStatus::Backoff).await.unwrap();
        shutdown.cancel();

        assert_eq!(task.await.unwrap(), WorkerExit::Cancelled);
        // first backoff is 4s; cancellation must not wait it out
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(connector.connects().len(), 1);
    }

    #[tokio::test]
    async fn server_close_ends_the_worker() {
        let connector = Arc::new(ScriptedConnector::new(Script::EventsThenClose(vec![geotagged("1")])));
        let transport = Arc::new(RecordingTransport::default());

        let exit = worker(&connector, &transport).run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::StreamEnded { consecutive_errors: 1 });
        assert_eq!(connector.connects().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_failures_keeps_the_count() {
        let connector = Arc::new(
            ScriptedConnector::new(Script::EventsThenClose(vec![]))
                .script("box-1", [Script::Refuse, Script::Refuse]),
        );
        let transport = Arc::new(RecordingTransport::default());

        let exit = worker(&connector, &transport).run(CancellationToken::new()).await;

        // two refusals, then an empty stream: nothing reset the count
        assert_eq!(exit, WorkerExit::StreamEnded { consecutive_errors: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_worker_backs_off_before_first_connect() {
        let connector = Arc::new(ScriptedConnector::new(Script::EventsThenClose(vec![])));
        let transport = Arc::new(RecordingTransport::default());
        let worker = worker(&connector, &transport).resume_after(3);
        let mut status = worker.status();

        let started = Instant::now();
        let task = tokio::spawn(worker.run(CancellationToken::new()));

        status.wait_for(|s| *s == WorkerStatus::Backoff).await.unwrap();
        assert!(connector.connects().is_empty());

        assert_eq!(task.await.unwrap(), WorkerExit::StreamEnded { consecutive_errors: 4 });
        assert_eq!(started.elapsed(), Duration::from_secs(36));
        assert_eq!(connector.connects().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_closes_exhaust_the_worker() {
        let connector = Arc::new(ScriptedConnector::new(Script::EventsThenClose(vec![])));
        let transport = Arc::new(RecordingTransport::default());

        let exit = worker(&connector, &transport)
            .resume_after(9)
            .run(CancellationToken::new())
            .await;

        assert_eq!(exit, WorkerExit::Exhausted);
        assert_eq!(connector.connects().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_the_same_bounding_box() {
        let connector = Arc::new(
            ScriptedConnector::new(Script::EventsThenHang(vec![]))
                .script("box-1", [Script::Refuse, Script::EventsThenError(vec![])]),
        );
        let transport = Arc::new(RecordingTransport::default());
        let worker = worker(&connector, &transport);
        let mut status = worker.status();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(worker.run(shutdown.clone()));

        while connector.connects().len() < 3 {
            status.changed().await.unwrap();
        }
        shutdown.cancel();
        task.await.unwrap();

        let connects = connector.connects();
        assert!(connects.iter().all(|c| *c == harvester(1)));
    }
}
