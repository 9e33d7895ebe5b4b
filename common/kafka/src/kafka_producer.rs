use std::sync::Arc;
use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::{ClientContext, Message, Statistics};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::stats::StatsReporter;

pub const DELIVERY_FAILURES: &str = "kafka_producer_delivery_failures_total";

pub struct KafkaContext {
    stats: Option<StatsReporter>,
}

impl ClientContext for KafkaContext {
    fn stats(&self, statistics: Statistics) {
        if let Some(reporter) = &self.stats {
            reporter.record_producer(&statistics);
        }
    }
}

impl ProducerContext for KafkaContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        if let Err((e, message)) = delivery_result {
            metrics::counter!(DELIVERY_FAILURES, "topic" => message.topic().to_owned())
                .increment(1);
            error!(
                topic = message.topic(),
                "failed to deliver message to kafka: {}", e
            );
        }
    }
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to enqueue message for kafka: {error}")]
    Enqueue { error: KafkaError },
    #[error("failed to flush kafka producer: {error}")]
    Flush { error: KafkaError },
}

/// Producer backed by librdkafka's own polling thread: `send` only enqueues,
/// delivery happens in the background until `flush` is called. Cloning
/// shares the underlying client.
#[derive(Clone)]
pub struct OutputProducer {
    inner: Arc<ThreadedProducer<KafkaContext>>,
}

impl OutputProducer {
    pub fn new(config: &KafkaConfig, stats: Option<StatsReporter>) -> Result<Self, KafkaError> {
        let mut client_config = config.client_config();
        client_config
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set(
                "compression.codec",
                config.kafka_compression_codec.to_owned(),
            )
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            )
            .set(
                "queue.buffering.max.messages",
                config.kafka_producer_queue_messages.to_string(),
            );

        if stats.is_some() {
            client_config.set(
                "statistics.interval.ms",
                config.kafka_statistics_interval_ms.to_string(),
            );
        }

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: ThreadedProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { stats })?;

        // "Ping" the Kafka brokers by requesting metadata
        match producer
            .client()
            .fetch_metadata(None, Duration::from_secs(15))
        {
            Ok(metadata) => {
                info!(
                    "Successfully connected to Kafka brokers. Found {} topics.",
                    metadata.topics().len()
                );
            }
            Err(error) => {
                error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
                return Err(error);
            }
        }

        Ok(Self {
            inner: Arc::new(producer),
        })
    }

    pub fn send(&self, topic: &str, payload: &[u8], key: &str) -> Result<(), KafkaProduceError> {
        let record = BaseRecord::to(topic).payload(payload).key(key);
        self.inner
            .send(record)
            .map_err(|(error, _)| KafkaProduceError::Enqueue { error })
    }

    /// Blocks until every queued message is acknowledged, or the timeout elapses.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaProduceError> {
        self.inner
            .flush(timeout)
            .map_err(|error| KafkaProduceError::Flush { error })
    }

    /// Messages enqueued but not yet acknowledged by the brokers.
    pub fn in_flight_count(&self) -> usize {
        usize::try_from(self.inner.in_flight_count()).unwrap_or_default()
    }
}
