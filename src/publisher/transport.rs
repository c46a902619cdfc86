use std::time::Duration;

use thiserror::Error;

use crate::event::{Delivered, OutboundMessage};

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryError {
    /// Worth another attempt (timeouts, leader changes, full queues)
    #[error("retriable delivery error: {0}")]
    Retriable(String),

    /// Retrying cannot help (oversized message, authorization)
    #[error("fatal delivery error: {0}")]
    Fatal(String),
}

/// The durable producer behind the publisher.
///
/// Implementations must tolerate concurrent calls from every stream
/// worker; batching and ordering within a key are theirs to provide.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// One delivery attempt. Resolves when the broker acknowledges the
    /// message at the configured level, or the attempt fails.
    async fn deliver(&self, message: &OutboundMessage) -> Result<Delivered, DeliveryError>;

    /// Pushes out anything queued inside the transport, waiting at most
    /// `timeout`.
    async fn flush(&self, timeout: Duration) -> anyhow::Result<()>;
}
