//! In-process fakes for the connector and transport seams.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};

use crate::config::{AppCredentials, BoundingBox, HarvesterConfig};
use crate::credentials::AccessToken;
use crate::event::{Delivered, Event, OutboundMessage};
use crate::publisher::transport::{DeliveryError, Transport};
use crate::twitter::source::{EventStream, StreamConnector};

// ------------------------------------------------------------
// Transport
// ------------------------------------------------------------

#[derive(Default)]
pub struct RecordingTransport {
    fail_first: u32,
    reject: bool,
    attempts: AtomicU32,
    flushes: AtomicUsize,
    delivered: Mutex<Vec<OutboundMessage>>,
}

impl RecordingTransport {
    /// Fails the first `n` attempts with a retriable error.
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    /// Fails every attempt with a fatal error.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().unwrap().clone()
    }

    /// Decoded payloads' `id_str`s, in delivery order.
    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .map(|m| {
                let v: Value = rmp_serde::from_slice(&m.payload).unwrap();
                v["id_str"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<Delivered, DeliveryError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject {
            return Err(DeliveryError::Fatal("message too large".into()));
        }
        if attempt <= self.fail_first {
            return Err(DeliveryError::Retriable("broker unavailable".into()));
        }

        let mut delivered = self.delivered.lock().unwrap();
        delivered.push(message.clone());
        Ok(Delivered {
            partition: 0,
            offset: delivered.len() as i64 - 1,
        })
    }

    async fn flush(&self, _timeout: Duration) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ------------------------------------------------------------
// Connector
// ------------------------------------------------------------

/// What one `connect` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Connection refused
    Refuse,
    /// Yields the events, then closes cleanly
    EventsThenClose(Vec<Value>),
    /// Yields the events, then fails mid-stream
    EventsThenError(Vec<Value>),
    /// Yields the events, then stays open forever
    EventsThenHang(Vec<Value>),
    /// `connect` panics
    Panic,
}

/// Connector that replays scripts per harvester label.
///
/// Once a label's queue is empty, `fallback` is used.
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    fallback: Script,
    connects: Mutex<Vec<HarvesterConfig>>,
}

impl ScriptedConnector {
    pub fn new(fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, label: &str, scripts: impl IntoIterator<Item = Script>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(label.to_string())
            .or_default()
            .extend(scripts);
        self
    }

    /// Every configuration `connect` was called with, in order.
    pub fn connects(&self) -> Vec<HarvesterConfig> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connects_for(&self, label: &str) -> Vec<HarvesterConfig> {
        self.connects()
            .into_iter()
            .filter(|c| c.label == label)
            .collect()
    }
}

fn events(values: Vec<Value>) -> impl futures_util::Stream<Item = anyhow::Result<Event>> {
    stream::iter(values.into_iter().map(|v| Ok(Event::new(v))))
}

#[async_trait::async_trait]
impl StreamConnector for ScriptedConnector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn connect(
        &self,
        config: &HarvesterConfig,
        _token: &AccessToken,
    ) -> anyhow::Result<EventStream> {
        self.connects.lock().unwrap().push(config.clone());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&config.label)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone());

        match script {
            Script::Refuse => Err(anyhow!("connection refused")),
            Script::EventsThenClose(values) => Ok(events(values).boxed()),
            Script::EventsThenError(values) => Ok(events(values)
                .chain(stream::once(async { Err(anyhow!("connection reset")) }))
                .boxed()),
            Script::EventsThenHang(values) => Ok(events(values).chain(stream::pending()).boxed()),
            Script::Panic => panic!("scripted connector panic"),
        }
    }
}

// ------------------------------------------------------------
// Fixtures
// ------------------------------------------------------------

pub fn app() -> AppCredentials {
    AppCredentials {
        name: "test-app".into(),
        key: "consumer-key".into(),
        secret: "consumer-secret".into(),
    }
}

pub fn token() -> AccessToken {
    AccessToken {
        token: "token".into(),
        secret: "secret".into(),
    }
}

/// Harvester `box-{n}` on account `alice`, a 1°x1° box offset by `n`.
pub fn harvester(n: usize) -> HarvesterConfig {
    let lon = -100.0 + n as f64;
    HarvesterConfig {
        label: format!("box-{n}"),
        account: "alice".into(),
        bounding_box: BoundingBox::new(lon, 30.0, lon + 1.0, 31.0).unwrap(),
        app: app(),
    }
}

pub fn geotagged(id: &str) -> Value {
    json!({
        "id_str": id,
        "text": "hello",
        "coordinates": { "type": "Point", "coordinates": [-71.06, 42.36] }
    })
}

pub fn untagged(id: &str) -> Value {
    json!({ "id_str": id, "text": "no location", "coordinates": null })
}
