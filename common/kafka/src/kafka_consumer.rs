use std::sync::Arc;
use std::time::Duration;

use rdkafka::{
    consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance},
    error::KafkaError,
    ClientContext, Message, Statistics, TopicPartitionList,
};
use tracing::{error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::stats::StatsReporter;

/// Logs every partition movement of the group, and exports statistics when
/// a reporter is configured.
pub struct SubscriptionContext {
    stats: Option<StatsReporter>,
}

fn log_subscription_action(action: &str, partitions: &TopicPartitionList) {
    for partition in partitions.elements() {
        info!(
            action,
            topic = partition.topic(),
            partition = partition.partition(),
            offset = ?partition.offset(),
            "subscription event"
        );
    }
}

impl ClientContext for SubscriptionContext {
    fn stats(&self, statistics: Statistics) {
        if let Some(reporter) = &self.stats {
            reporter.record_consumer(&statistics);
        }
    }
}

impl ConsumerContext for SubscriptionContext {
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                // librdkafka reports lost partitions through the revoke path
                if base_consumer.assignment_lost() {
                    log_subscription_action("lost", partitions);
                } else {
                    log_subscription_action("revoke", partitions);
                }
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => {
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Assign(partitions) = rebalance {
            log_subscription_action("assign", partitions);
        }
    }
}

/// A single message copied out of the consumer, so it can outlive the poll call.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Blocking consumer for single-threaded poll loops. Cloning shares the
/// underlying client, so a shutdown hook can close it while the loop owns
/// another handle.
#[derive(Clone)]
pub struct PollingConsumer {
    inner: Arc<BaseConsumer<SubscriptionContext>>,
}

impl PollingConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        stats: Option<StatsReporter>,
    ) -> Result<Self, KafkaError> {
        let mut client_config = common_config.client_config();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "max.poll.interval.ms",
                consumer_config
                    .kafka_consumer_max_poll_interval_ms
                    .to_string(),
            );

        if stats.is_some() {
            client_config.set(
                "statistics.interval.ms",
                common_config.kafka_statistics_interval_ms.to_string(),
            );
        }

        let consumer: BaseConsumer<SubscriptionContext> =
            client_config.create_with_context(SubscriptionContext { stats })?;

        Ok(Self {
            inner: Arc::new(consumer),
        })
    }

    pub fn subscribe(&self, topics: &[String]) -> Result<(), KafkaError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.inner.subscribe(&topics)
    }

    /// Waits up to `timeout` for the next message. `None` means nothing arrived in time.
    pub fn poll(&self, timeout: Duration) -> Option<Result<Delivery, KafkaError>> {
        self.inner.poll(timeout).map(|result| {
            result.map(|message| Delivery {
                topic: message.topic().to_owned(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec),
            })
        })
    }

    /// Leaves the consumer group and destroys the client if this is the last
    /// handle. Returns false when other clones keep the client alive; it is
    /// then released when the last of them drops.
    pub fn close(self) -> bool {
        self.inner.unsubscribe();
        match Arc::try_unwrap(self.inner) {
            Ok(consumer) => {
                drop(consumer);
                info!("closed kafka consumer");
                true
            }
            Err(inner) => {
                warn!(
                    handles = Arc::strong_count(&inner) - 1,
                    "kafka consumer still in use, client released when the last handle drops"
                );
                false
            }
        }
    }
}
