//! Publisher
//!
//! Hands qualifying events to the durable producer.
//!
//! Responsibilities:
//! - Serialize events (MessagePack)
//! - Key them by harvester label
//! - Deliver asynchronously, retrying retriable failures
//! - Keep per-key order: a message starts only after the previous
//!   message with the same key has been delivered or given up
//! - Report a `DeliveryResult` for every send
//! - Drain in-flight deliveries on shutdown, within a bound
//!
//! One `Publisher` is created at startup and shared by every stream
//! worker. Cloning is cheap; all clones feed the same transport.

pub mod dry_run;
pub mod kafka;
pub mod transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::task::TaskTracker;

use crate::config::ProducerConfig;
use crate::event::{DeliveryResult, Event, OutboundMessage};
use crate::metrics::{METRICS, incr};

use transport::{DeliveryError, Transport};

/// Linear retry schedule for deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl From<&ProducerConfig> for RetryPolicy {
    fn from(cfg: &ProducerConfig) -> Self {
        Self {
            max_retries: cfg.retries,
            backoff: cfg.retry_backoff,
        }
    }
}

/// Outcome of [`Publisher::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Deliveries still pending when the drain timeout expired
    pub dropped: usize,
}

/// Pending delivery. Awaiting it is optional: an unobserved handle
/// still runs to completion and logs its outcome.
pub struct DeliveryHandle(JoinHandle<DeliveryResult>);

impl IntoFuture for DeliveryHandle {
    type Output = DeliveryResult;
    type IntoFuture = BoxFuture<'static, DeliveryResult>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            match self.0.await {
                Ok(result) => result,
                Err(e) => DeliveryResult::Failed {
                    error: format!("delivery task aborted: {e}"),
                    attempts: 0,
                },
            }
        }
        .boxed()
    }
}

#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    topic: String,
    retry: RetryPolicy,
    in_flight: TaskTracker,
    /// Per key, completion signal of the most recently queued delivery
    lanes: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                topic: topic.into(),
                retry,
                in_flight: TaskTracker::new(),
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Number of deliveries not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Serializes `event` and starts delivering it under `key`.
    ///
    /// Fails only if the event cannot be encoded; delivery failures are
    /// reported through the returned handle.
    pub fn publish(&self, key: &str, event: &Event) -> anyhow::Result<DeliveryHandle> {
        let payload = rmp_serde::to_vec(event.payload())
            .context("failed to encode event as MessagePack")
            .inspect_err(|_| incr(&METRICS.serialize_errors))?;

        Ok(self.send(OutboundMessage {
            topic: self.inner.topic.clone(),
            key: Some(key.to_string()),
            payload,
        }))
    }

    /// Queues an already encoded message. Never blocks.
    ///
    /// Keyed messages are delivered in call order, one at a time per key;
    /// unkeyed messages are delivered independently.
    pub fn send(&self, message: OutboundMessage) -> DeliveryHandle {
        let transport = self.inner.transport.clone();
        let retry = self.inner.retry;
        let (done, previous) = self.enqueue(message.key.as_deref());

        DeliveryHandle(self.inner.in_flight.spawn(async move {
            if let Some(previous) = previous {
                // Err only means the predecessor's task is gone; go ahead.
                let _ = previous.await;
            }
            let result = deliver_with_retry(transport.as_ref(), retry, &message).await;
            record(&message, &result);
            drop(done);
            result
        }))
    }

    /// Registers a delivery on its key's lane. Returns the sender that
    /// releases the next message and the predecessor's receiver.
    fn enqueue(&self, key: Option<&str>) -> (oneshot::Sender<()>, Option<oneshot::Receiver<()>>) {
        let (done, released) = oneshot::channel();
        let Some(key) = key else {
            return (done, None);
        };
        let mut lanes = self.inner.lanes.lock().unwrap_or_else(|e| e.into_inner());
        (done, lanes.insert(key.to_string(), released))
    }

    /// Waits for in-flight deliveries and the transport queue, at most
    /// `drain_timeout` in total. Whatever is still pending afterwards is
    /// reported as dropped.
    pub async fn flush(&self, drain_timeout: Duration) -> FlushReport {
        let deadline = Instant::now() + drain_timeout;
        let pending = self.in_flight();
        if pending > 0 {
            info!("draining {pending} in-flight deliveries (timeout {drain_timeout:?})");
        }

        self.inner.in_flight.close();
        let drained = timeout(drain_timeout, self.inner.in_flight.wait()).await.is_ok();
        self.inner.in_flight.reopen();

        let dropped = if drained { 0 } else { self.in_flight() };
        if dropped > 0 {
            error!("drain timeout expired, dropping {dropped} undelivered messages");
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(e) = self.inner.transport.flush(remaining).await {
            warn!("transport flush incomplete: {e:#}");
        }

        FlushReport { dropped }
    }
}

async fn deliver_with_retry(
    transport: &dyn Transport,
    retry: RetryPolicy,
    message: &OutboundMessage,
) -> DeliveryResult {
    let mut attempts = 0;

    loop {
        attempts += 1;

        match transport.deliver(message).await {
            Ok(delivered) => {
                return DeliveryResult::Delivered {
                    partition: delivered.partition,
                    offset: delivered.offset,
                    attempts,
                };
            }

            Err(DeliveryError::Retriable(reason)) if attempts <= retry.max_retries => {
                incr(&METRICS.delivery_retries);
                warn!(
                    "delivery attempt {attempts}/{} failed: {reason}, retrying in {:?}",
                    retry.max_retries + 1,
                    retry.backoff
                );
                sleep(retry.backoff).await;
            }

            Err(e) => {
                return DeliveryResult::Failed {
                    error: e.to_string(),
                    attempts,
                };
            }
        }
    }
}

/// Logs and counts the final outcome of one send.
fn record(message: &OutboundMessage, result: &DeliveryResult) {
    let key = message.key.as_deref().unwrap_or("-");
    let attempts = result.attempts();

    if result.is_success() {
        incr(&METRICS.messages_delivered);
    } else {
        incr(&METRICS.delivery_failures);
    }

    match result {
        DeliveryResult::Delivered { partition, offset, .. } => {
            debug!(
                "delivered {key} to {}[{partition}]@{offset} after {attempts} attempt(s)",
                message.topic
            );
        }
        DeliveryResult::Failed { error, .. } => {
            error!(
                "message {key} for {} lost after {attempts} attempt(s): {error}",
                message.topic
            );
        }
    }
}
