use envconfig::Envconfig;
use rdkafka::ClientConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    // Only used when no zookeeper quorum is configured, otherwise the brokers are discovered
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "30000")]
    pub kafka_statistics_interval_ms: u32, // Only applied when statistics are exported
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(from = "CONFIG_APPLICATION_ID")]
    pub kafka_consumer_group: String,

    // earliest, latest
    #[envconfig(from = "CONSUMER_AUTO_OFFSET_RESET_CONFIG", default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    // Handlers may block for a long time (model inference, remote calls), so we
    // allow very long gaps between polls before the group evicts us.
    #[envconfig(default = "6000000")]
    pub kafka_consumer_max_poll_interval_ms: u32,
}

impl KafkaConfig {
    /// Settings shared by consumers and producers.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &self.kafka_hosts);

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        client_config
    }

    /// Returns a copy pointing at the given brokers, as returned by discovery.
    pub fn with_brokers(&self, brokers: &[String]) -> Self {
        Self {
            kafka_hosts: brokers.join(","),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kafka_config() -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_tls: false,
            kafka_producer_linger_ms: 20,
            kafka_producer_queue_mib: 400,
            kafka_producer_queue_messages: 1000,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
            kafka_statistics_interval_ms: 30000,
        }
    }

    #[test]
    fn test_with_brokers_joins_addresses() {
        let config = kafka_config().with_brokers(&[
            "broker-1:9092".to_string(),
            "broker-2:9092".to_string(),
        ]);
        assert_eq!(config.kafka_hosts, "broker-1:9092,broker-2:9092");
        assert_eq!(
            config.client_config().get("bootstrap.servers"),
            Some("broker-1:9092,broker-2:9092")
        );
    }

    #[test]
    fn test_tls_settings() {
        let mut config = kafka_config();
        assert_eq!(config.client_config().get("security.protocol"), None);

        config.kafka_tls = true;
        assert_eq!(config.client_config().get("security.protocol"), Some("ssl"));
    }
}
