//! Export of librdkafka client statistics as prometheus gauges.
//!
//! Gauge names match the ones the JVM Kafka clients expose through JMX, so the
//! same dashboards work for every operator regardless of its implementation.

use metrics::gauge;
use rdkafka::Statistics;

pub const RECORDS_CONSUMED_TOTAL: &str =
    "kafka_consumer_consumer_fetch_manager_metrics_records_consumed_total";
pub const BYTES_CONSUMED_TOTAL: &str =
    "kafka_consumer_consumer_fetch_manager_metrics_bytes_consumed_total";
pub const RECORDS_SENT_TOTAL: &str = "kafka_producer_producer_metrics_record_send_total";
pub const BYTES_SENT_TOTAL: &str = "kafka_producer_producer_topic_metrics_byte_total";

#[derive(Clone, Debug)]
pub struct StatsReporter {
    group_id: String,
}

impl StatsReporter {
    pub fn new(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_owned(),
        }
    }

    fn client_id(&self, stats: &Statistics) -> String {
        format!("{}_{}", self.group_id, stats.client_id)
    }

    pub fn record_consumer(&self, stats: &Statistics) {
        let client_id = self.client_id(stats);

        gauge!(RECORDS_CONSUMED_TOTAL, "client_id" => client_id.clone(), "topic" => "")
            .set(stats.rxmsgs as f64);
        gauge!(BYTES_CONSUMED_TOTAL, "client_id" => client_id.clone(), "topic" => "")
            .set(stats.rx_bytes as f64);

        for (topic, topic_stats) in &stats.topics {
            let (records, bytes) = topic_stats
                .partitions
                .values()
                .fold((0.0, 0.0), |(records, bytes), p| {
                    (records + p.rxmsgs as f64, bytes + p.rxbytes as f64)
                });
            gauge!(RECORDS_CONSUMED_TOTAL, "client_id" => client_id.clone(), "topic" => topic.clone())
                .set(records);
            gauge!(BYTES_CONSUMED_TOTAL, "client_id" => client_id.clone(), "topic" => topic.clone())
                .set(bytes);
        }
    }

    pub fn record_producer(&self, stats: &Statistics) {
        let client_id = self.client_id(stats);

        gauge!(RECORDS_SENT_TOTAL, "client_id" => client_id.clone()).set(stats.txmsgs as f64);
        gauge!(BYTES_SENT_TOTAL, "client_id" => client_id.clone(), "topic" => "")
            .set(stats.tx_bytes as f64);

        for (topic, topic_stats) in &stats.topics {
            let bytes: f64 = topic_stats
                .partitions
                .values()
                .map(|p| p.txbytes as f64)
                .sum();
            gauge!(BYTES_SENT_TOTAL, "client_id" => client_id.clone(), "topic" => topic.clone())
                .set(bytes);
        }
    }
}
