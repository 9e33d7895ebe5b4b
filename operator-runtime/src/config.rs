use std::path::PathBuf;
use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Deployment environment, as set by the flow engine for every operator instance.
#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    // Brokers are discovered through zookeeper when set, KAFKA_HOSTS is used otherwise
    #[envconfig(from = "ZK_QUORUM")]
    pub zk_quorum: Option<String>,

    #[envconfig(from = "ZK_BROKERS_PATH", default = "/brokers/ids")]
    pub zk_brokers_path: String,

    #[envconfig(from = "OUTPUT", default = "output")]
    pub output: String,

    #[envconfig(from = "PIPELINE_ID")]
    pub pipeline_id: String,

    #[envconfig(from = "OPERATOR_ID")]
    pub operator_id: String,

    // JSON document, see OperatorConfig
    #[envconfig(from = "CONFIG")]
    pub config: String,

    #[envconfig(from = "METRICS", default = "false")]
    pub metrics: bool,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "METRICS_PORT", default = "5555")]
    pub metrics_port: u16,

    #[envconfig(from = "DATA_PATH", default = "/opt/data")]
    pub data_path: String,

    #[envconfig(default = "1000")]
    pub poll_timeout_ms: u64,

    #[envconfig(default = "60000")]
    pub flush_timeout_ms: u64,

    #[envconfig(default = "1000")]
    pub watchdog_check_interval_ms: u64,

    // Liveness checks only start after this delay, signals are honoured immediately
    #[envconfig(default = "5")]
    pub watchdog_start_delay_secs: u64,

    #[envconfig(default = "30")]
    pub runtime_join_timeout_secs: u64,

    pub prestop_file: Option<String>,
}

impl Config {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_path)
    }

    pub fn operator_config(&self) -> Result<OperatorConfig, serde_json::Error> {
        serde_json::from_str(&self.config)
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    DeviceId,
    OperatorId,
    ImportId,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub dest: String,
    pub source: String,
}

/// One declared input. `filter_value` may list several values separated by commas.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputTopic {
    pub name: String,
    pub filter_type: FilterType,
    pub filter_value: String,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

/// The JSON object passed in `CONFIG`.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    #[serde(default = "empty_object")]
    pub config: Value,
    pub input_topics: Vec<InputTopic>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl OperatorConfig {
    pub const DEFAULT_LOGGER_LEVEL: &'static str = "warning";

    pub fn logger_level(&self) -> &str {
        self.config
            .get("logger_level")
            .and_then(Value::as_str)
            .unwrap_or(Self::DEFAULT_LOGGER_LEVEL)
    }

    /// Level directive for `EnvFilter`, accepting the level names used by existing deployments (`warning`, `critical`).
    pub fn log_directive(&self) -> String {
        match self.logger_level().to_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    }

    /// Deserializes the handler specific settings from the `config` object.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.config.clone())
    }
}
