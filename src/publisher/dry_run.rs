use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use log::info;

use crate::event::{Delivered, OutboundMessage};

use super::transport::{DeliveryError, Transport};

/// Transport that never touches the network.
///
/// DRY RUN MODE:
/// - No broker connection
/// - Every message is logged and acknowledged with a synthetic offset
pub struct DryRunTransport {
    next_offset: AtomicI64,
}

impl DryRunTransport {
    pub fn new() -> Self {
        info!("publisher running in DRY RUN mode, nothing is produced");
        Self {
            next_offset: AtomicI64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Transport for DryRunTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<Delivered, DeliveryError> {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        info!(
            "DRY RUN → topic={} key={} bytes={} offset={}",
            message.topic,
            message.key.as_deref().unwrap_or("-"),
            message.payload.len(),
            offset
        );
        Ok(Delivered {
            partition: 0,
            offset,
        })
    }

    async fn flush(&self, _timeout: Duration) -> anyhow::Result<()> {
        Ok(())
    }
}
