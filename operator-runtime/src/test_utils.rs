//! In-memory broker clients for exercising the runtime without kafka.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common_kafka::kafka_consumer::Delivery;

use crate::broker::{BrokerError, Inbound, Outbound};
use crate::runtime::RuntimeHandle;

#[derive(Default)]
struct InboundState {
    pending: VecDeque<Result<Delivery, BrokerError>>,
    subscribed: Vec<String>,
    offset: i64,
    stop_when_drained: Option<RuntimeHandle>,
}

/// Serves queued messages in order; polling an empty queue waits out the timeout, capped at 10ms.
#[derive(Clone, Default)]
pub struct MemoryInbound {
    state: Arc<Mutex<InboundState>>,
}

impl MemoryInbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, topic: &str, payload: &[u8]) {
        self.push_delivery(topic, Some(payload.to_vec()));
    }

    /// A record without a value, as left behind by tombstones.
    pub fn push_empty(&self, topic: &str) {
        self.push_delivery(topic, None);
    }

    fn push_delivery(&self, topic: &str, payload: Option<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.offset += 1;
        let offset = state.offset;
        state.pending.push_back(Ok(Delivery {
            topic: topic.to_string(),
            partition: 0,
            offset,
            payload,
        }));
    }

    pub fn push_json(&self, topic: &str, message: &serde_json::Value) {
        self.push(topic, &serde_json::to_vec(message).unwrap());
    }

    pub fn push_error(&self, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back(Err(BrokerError::Other(reason.to_string())));
    }

    /// Stops the runtime once every queued message was delivered.
    pub fn stop_when_drained(&self, handle: RuntimeHandle) {
        self.state.lock().unwrap().stop_when_drained = Some(handle);
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }
}

impl Inbound for MemoryInbound {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        self.state.lock().unwrap().subscribed = topics.to_vec();
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Option<Result<Delivery, BrokerError>> {
        let mut state = self.state.lock().unwrap();
        match state.pending.pop_front() {
            Some(delivery) => Some(delivery),
            None => {
                if let Some(handle) = &state.stop_when_drained {
                    handle.stop();
                }
                drop(state);
                std::thread::sleep(timeout.min(Duration::from_millis(10)));
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducedRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl ProducedRecord {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Default)]
struct OutboundState {
    queued: Vec<ProducedRecord>,
    delivered: Vec<ProducedRecord>,
    flushes: usize,
    fail_produce: bool,
}

/// Keeps produced records queued until `flush`.
#[derive(Clone, Default)]
pub struct MemoryOutbound {
    state: Arc<Mutex<OutboundState>>,
}

impl MemoryOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_produce(&self) {
        self.state.lock().unwrap().fail_produce = true;
    }

    pub fn delivered(&self) -> Vec<ProducedRecord> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Delivered and still queued records, in produce order.
    pub fn produced(&self) -> Vec<ProducedRecord> {
        let state = self.state.lock().unwrap();
        state
            .delivered
            .iter()
            .chain(state.queued.iter())
            .cloned()
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().unwrap().flushes
    }
}

impl Outbound for MemoryOutbound {
    fn produce(&self, topic: &str, payload: &[u8], key: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_produce {
            return Err(BrokerError::Other("queue full".to_string()));
        }
        state.queued.push(ProducedRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        let queued = std::mem::take(&mut state.queued);
        state.delivered.extend(queued);
        state.flushes += 1;
        Ok(())
    }

    fn queued(&self) -> usize {
        self.state.lock().unwrap().queued.len()
    }
}
