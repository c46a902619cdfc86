use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use serde::Serialize;

/// Global runtime metrics for the harvester.
///
/// Purpose:
/// - Track live stream workers and respawns
/// - Track stream throughput (received / forwarded / dropped)
/// - Track delivery outcomes at the publisher
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Workers
    pub workers_active: AtomicUsize,
    pub worker_respawns: AtomicUsize,

    // Streams
    pub events_received: AtomicUsize,
    pub events_forwarded: AtomicUsize,
    pub events_dropped: AtomicUsize,
    pub stream_errors: AtomicUsize,
    pub reconnects: AtomicUsize,

    // Publisher
    pub messages_delivered: AtomicUsize,
    pub delivery_retries: AtomicUsize,
    pub delivery_failures: AtomicUsize,
    pub serialize_errors: AtomicUsize,
}

/// Point-in-time copy of [`RuntimeMetrics`], for logging.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub workers_active: usize,
    pub worker_respawns: usize,
    pub events_received: usize,
    pub events_forwarded: usize,
    pub events_dropped: usize,
    pub stream_errors: usize,
    pub reconnects: usize,
    pub messages_delivered: usize,
    pub delivery_retries: usize,
    pub delivery_failures: usize,
    pub serialize_errors: usize,
}

impl RuntimeMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            workers_active: get(&self.workers_active),
            worker_respawns: get(&self.worker_respawns),
            events_received: get(&self.events_received),
            events_forwarded: get(&self.events_forwarded),
            events_dropped: get(&self.events_dropped),
            stream_errors: get(&self.stream_errors),
            reconnects: get(&self.reconnects),
            messages_delivered: get(&self.messages_delivered),
            delivery_retries: get(&self.delivery_retries),
            delivery_failures: get(&self.delivery_failures),
            serialize_errors: get(&self.serialize_errors),
        }
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Shorthand for a relaxed increment.
pub fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}
