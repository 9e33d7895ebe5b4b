//! Broker address discovery through the zookeeper broker registry.
//!
//! Every live broker registers an ephemeral child under the brokers path
//! (usually `/brokers/ids`), holding a JSON document with its advertised
//! `host` and `port`.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use zookeeper::{WatchedEvent, Watcher, ZkError, ZooKeeper};

const SESSION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("zookeeper request failed: {0}")]
    Zookeeper(#[from] ZkError),
    #[error("invalid broker registration at {path}: {source}")]
    InvalidRegistration {
        path: String,
        source: serde_json::Error,
    },
    #[error("no brokers registered under {0}")]
    NoBrokers(String),
}

#[derive(Deserialize)]
struct BrokerRegistration {
    host: String,
    port: u16,
}

struct SessionLogger;

impl Watcher for SessionLogger {
    fn handle(&self, event: WatchedEvent) {
        debug!(state = ?event.keeper_state, "zookeeper session event");
    }
}

/// Parses one registration node into a `host:port` address.
pub fn parse_registration(path: &str, data: &[u8]) -> Result<String, DiscoveryError> {
    let registration: BrokerRegistration =
        serde_json::from_slice(data).map_err(|source| DiscoveryError::InvalidRegistration {
            path: path.to_owned(),
            source,
        })?;
    Ok(format!("{}:{}", registration.host, registration.port))
}

/// Lists the addresses of all brokers registered under `path`.
pub fn resolve_broker_addresses(quorum: &str, path: &str) -> Result<Vec<String>, DiscoveryError> {
    let zk = ZooKeeper::connect(quorum, SESSION_TIMEOUT, SessionLogger)?;

    let mut brokers = Vec::new();
    for id in zk.get_children(path, false)? {
        let node = format!("{path}/{id}");
        let (data, _) = zk.get_data(&node, false)?;
        brokers.push(parse_registration(&node, &data)?);
    }
    zk.close()?;

    if brokers.is_empty() {
        return Err(DiscoveryError::NoBrokers(path.to_owned()));
    }

    info!(?brokers, "discovered kafka brokers");
    Ok(brokers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registration() {
        let data = br#"{"listener_security_protocol_map":{"PLAINTEXT":"PLAINTEXT"},"endpoints":["PLAINTEXT://kafka-0:9092"],"jmx_port":-1,"host":"kafka-0","timestamp":"1700000000000","port":9092,"version":4}"#;
        assert_eq!(
            parse_registration("/brokers/ids/0", data).unwrap(),
            "kafka-0:9092"
        );
    }

    #[test]
    fn test_parse_registration_rejects_garbage() {
        let err = parse_registration("/brokers/ids/1", b"not json").unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::InvalidRegistration { ref path, .. } if path == "/brokers/ids/1"
        ));
    }
}
