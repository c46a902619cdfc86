use serde_json::Value;

/// A decoded message from a filtered stream.
///
/// The payload is kept as raw JSON: the harvester forwards whatever the
/// stream delivered and performs no schema validation. The only field it
/// inspects is `coordinates`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event(Value);

impl Event {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// True when the event carries a non-null `coordinates` field.
    ///
    /// Only these events are forwarded downstream.
    pub fn has_coordinates(&self) -> bool {
        self.0.get("coordinates").is_some_and(|c| !c.is_null())
    }

    /// Status id, when the message is a status.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id_str").and_then(Value::as_str)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }
}

// ------------------------------------------------------------
// Outbound message
// ------------------------------------------------------------
//
// One per forwarded event. Ephemeral: built by the publisher,
// consumed by the transport.
//
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,

    /// Partition key. The harvester label, so one stream's events
    /// stay in one partition.
    pub key: Option<String>,

    /// MessagePack-encoded event
    pub payload: Vec<u8>,
}

/// Broker position of a successfully written message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub partition: i32,
    pub offset: i64,
}

/// Final outcome of one publisher send, after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryResult {
    Delivered {
        partition: i32,
        offset: i64,
        attempts: u32,
    },
    Failed {
        error: String,
        attempts: u32,
    },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}
