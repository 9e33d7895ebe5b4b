//! Seams between the runtime loop and the kafka clients.

use std::time::Duration;

use common_kafka::kafka_consumer::{Delivery, PollingConsumer};
use common_kafka::kafka_producer::{KafkaProduceError, OutputProducer};
use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Kafka(#[from] KafkaError),
    #[error(transparent)]
    Produce(#[from] KafkaProduceError),
    #[error("{0}")]
    Other(String),
}

pub trait Inbound: Send {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// `None` when nothing arrived within `timeout`.
    fn poll(&self, timeout: Duration) -> Option<Result<Delivery, BrokerError>>;
}

pub trait Outbound: Send {
    fn produce(&self, topic: &str, payload: &[u8], key: &str) -> Result<(), BrokerError>;

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Produced but not yet acknowledged.
    fn queued(&self) -> usize;
}

impl Inbound for PollingConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        Ok(PollingConsumer::subscribe(self, topics)?)
    }

    fn poll(&self, timeout: Duration) -> Option<Result<Delivery, BrokerError>> {
        PollingConsumer::poll(self, timeout).map(|result| result.map_err(BrokerError::from))
    }
}

impl Outbound for OutputProducer {
    fn produce(&self, topic: &str, payload: &[u8], key: &str) -> Result<(), BrokerError> {
        Ok(self.send(topic, payload, key)?)
    }

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        Ok(OutputProducer::flush(self, timeout)?)
    }

    fn queued(&self) -> usize {
        self.in_flight_count()
    }
}
