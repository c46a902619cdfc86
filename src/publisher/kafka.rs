use std::time::Duration;

use anyhow::Context;
use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use crate::config::ProducerConfig;
use crate::event::{Delivered, OutboundMessage};

use super::transport::{DeliveryError, Transport};

/// How long a send may wait for room in the local producer queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka producer transport.
///
/// Batching (`linger.ms`), compression and acknowledgement are done by
/// librdkafka. Its internal retries are disabled: retries are owned by the
/// publisher, which sends one message per key at a time, so a retried
/// message never lands after its successors.
pub struct KafkaTransport {
    producer: FutureProducer,
}

impl KafkaTransport {
    pub fn new(config: &ProducerConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = client_config(config)
            .create()
            .with_context(|| format!("failed to create producer for {}", config.bootstrap_servers))?;

        Ok(Self { producer })
    }
}

/// Maps producer settings onto librdkafka properties.
pub fn client_config(config: &ProducerConfig) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &config.bootstrap_servers)
        .set("acks", config.acks.as_str())
        .set("compression.type", config.compression.as_str())
        .set("linger.ms", config.linger.as_millis().to_string())
        .set("retry.backoff.ms", config.retry_backoff.as_millis().to_string())
        .set("retries", "0");
    cfg
}

fn classify(err: KafkaError) -> DeliveryError {
    let fatal = matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::InvalidMessage
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::Fatal
        )
    );

    if fatal {
        DeliveryError::Fatal(err.to_string())
    } else {
        DeliveryError::Retriable(err.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for KafkaTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<Delivered, DeliveryError> {
        let mut record = FutureRecord::<str, [u8]>::to(&message.topic).payload(&message.payload);
        if let Some(key) = &message.key {
            record = record.key(key.as_str());
        }

        match self.producer.send(record, QUEUE_TIMEOUT).await {
            Ok((partition, offset)) => Ok(Delivered { partition, offset }),
            Err((err, _)) => Err(classify(err)),
        }
    }

    async fn flush(&self, timeout: Duration) -> anyhow::Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .context("producer flush task panicked")?
            .context("producer flush did not complete")
    }
}
