//! The poll, route, produce and flush loop.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerError, Inbound, Outbound};
use crate::envelope::Envelope;
use crate::filter::{FilterHandler, IdentifyError};
use crate::handler::{Handler, Invocation};
use crate::join::{join_bounded, JoinError};
use crate::metrics_consts::{
    HANDLER_TIME, MESSAGES_DROPPED, MESSAGES_RECEIVED, PRODUCER_FLUSHES, RESULTS_PRODUCED,
    RESULT_ERRORS,
};

const FLUSH_QUEUE_THRESHOLD: usize = 10;
const FLUSH_IDLE_CYCLES: u32 = 3;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("no sources to subscribe to")]
    NoSources,
    #[error("failed to subscribe: {0}")]
    Subscribe(BrokerError),
    #[error("failed to consume: {0}")]
    Delivery(BrokerError),
    #[error("unreadable message at {topic}:{offset}: {reason}")]
    Payload {
        topic: String,
        offset: i64,
        reason: String,
    },
    #[error("failed to produce: {0}")]
    Produce(BrokerError),
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Initializing,
    Subscribed,
    Running,
    Stopping,
    Stopped,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Initializing,
            1 => Phase::Subscribed,
            2 => Phase::Running,
            3 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }
}

#[derive(Debug)]
struct RuntimeState {
    stop: AtomicBool,
    phase: AtomicU8,
}

impl RuntimeState {
    fn set_phase(&self, phase: Phase) {
        debug!(?phase, "runtime phase change");
        self.phase.store(phase as u8, Ordering::SeqCst);
    }
}

/// Marks the runtime stopped however the loop exits, panics included.
struct StoppedOnDrop(Arc<RuntimeState>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.set_phase(Phase::Stopped);
    }
}

/// Cross-thread view of a runtime, for the watchdog and the probes.
#[derive(Clone, Debug)]
pub struct RuntimeHandle {
    state: Arc<RuntimeState>,
}

impl RuntimeHandle {
    /// Cooperative: observed once the current loop iteration completes.
    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.phase() != Phase::Stopped
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.state.phase.load(Ordering::SeqCst))
    }
}

/// Decides when to block on a producer flush, from the queue depth seen after each iteration.
///
/// A flush happens once more than ten messages are queued, or when the depth did not change
/// for three iterations in a row. An empty queue resets the tracker.
#[derive(Debug, Default)]
pub struct FlushTracker {
    depth: usize,
    idle: u32,
}

impl FlushTracker {
    pub fn observe(&mut self, queued: usize) -> bool {
        if queued == 0 {
            self.reset();
            return false;
        }
        if queued == self.depth {
            self.idle += 1;
        } else {
            self.idle = 0;
            self.depth = queued;
        }
        if self.depth > FLUSH_QUEUE_THRESHOLD || self.idle == FLUSH_IDLE_CYCLES {
            self.reset();
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.depth = 0;
        self.idle = 0;
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub output_topic: String,
    pub pipeline_id: String,
    pub operator_id: String,
    pub poll_timeout: Duration,
    pub flush_timeout: Duration,
}

pub struct OperatorRuntime<H, I, O> {
    handler: H,
    filters: FilterHandler,
    consumer: I,
    producer: O,
    settings: RuntimeSettings,
    state: Arc<RuntimeState>,
}

impl<H, I, O> OperatorRuntime<H, I, O>
where
    H: Handler,
    I: Inbound,
    O: Outbound,
{
    pub fn new(handler: H, filters: FilterHandler, consumer: I, producer: O, settings: RuntimeSettings) -> Self {
        Self {
            handler,
            filters,
            consumer,
            producer,
            settings,
            state: Arc::new(RuntimeState {
                stop: AtomicBool::new(false),
                phase: AtomicU8::new(Phase::Initializing as u8),
            }),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            state: self.state.clone(),
        }
    }

    /// Subscribes and loops until stopped or a fatal error occurs.
    pub fn run(mut self) -> Result<(), RuntimeError> {
        let _stopped = StoppedOnDrop(self.state.clone());
        let result = self.start();
        if let Err(e) = &result {
            error!("operator runtime failed: {e}");
        }
        result
    }

    fn start(&mut self) -> Result<(), RuntimeError> {
        let sources = self.filters.sources();
        if sources.is_empty() {
            return Err(RuntimeError::NoSources);
        }
        self.consumer
            .subscribe(&sources)
            .map_err(RuntimeError::Subscribe)?;
        info!(?sources, filters = self.filters.len(), "subscribed");
        self.state.set_phase(Phase::Subscribed);

        self.state.set_phase(Phase::Running);
        let result = self.run_loop();
        self.state.set_phase(Phase::Stopping);
        result
    }

    fn run_loop(&mut self) -> Result<(), RuntimeError> {
        let mut flush = FlushTracker::default();
        while !self.state.stop.load(Ordering::SeqCst) {
            let routed = self.route();

            if flush.observe(self.producer.queued()) {
                metrics::counter!(PRODUCER_FLUSHES).increment(1);
                if let Err(e) = self.producer.flush(self.settings.flush_timeout) {
                    warn!("producer flush incomplete: {e}");
                }
            }

            if routed.is_err() {
                self.state.stop.store(true, Ordering::SeqCst);
                return routed;
            }
        }
        info!("operator runtime stopped");
        Ok(())
    }

    fn route(&mut self) -> Result<(), RuntimeError> {
        let delivery = match self.consumer.poll(self.settings.poll_timeout) {
            None => return Ok(()),
            Some(Err(e)) => return Err(RuntimeError::Delivery(e)),
            Some(Ok(delivery)) => delivery,
        };
        metrics::counter!(MESSAGES_RECEIVED).increment(1);

        let unreadable = |reason: String| RuntimeError::Payload {
            topic: delivery.topic.clone(),
            offset: delivery.offset,
            reason,
        };
        let payload = delivery
            .payload
            .as_deref()
            .ok_or_else(|| unreadable("empty payload".to_string()))?;
        let message: Value =
            serde_json::from_slice(payload).map_err(|e| unreadable(e.to_string()))?;

        for result in self.call_handler(&delivery.topic, &message)? {
            let envelope = Envelope::new(
                &self.settings.pipeline_id,
                &self.settings.operator_id,
                result,
                Utc::now(),
            );
            let payload = serde_json::to_vec(&envelope)?;
            self.producer
                .produce(&self.settings.output_topic, &payload, &self.settings.operator_id)
                .map_err(RuntimeError::Produce)?;
            metrics::counter!(RESULTS_PRODUCED).increment(1);
        }
        Ok(())
    }

    fn call_handler(&mut self, topic: &str, message: &Value) -> Result<Vec<Value>, RuntimeError> {
        let projections = match self.filters.identify(topic, message) {
            Ok(projections) => projections,
            Err(IdentifyError::NoFilter(_)) => {
                metrics::counter!(MESSAGES_DROPPED, "reason" => "no_filter").increment(1);
                return Ok(Vec::new());
            }
            Err(e) => {
                error!("message identification failed: {e}");
                metrics::counter!(MESSAGES_DROPPED, "reason" => "identification").increment(1);
                return Ok(Vec::new());
            }
        };

        let device_id = message.get("device_id").and_then(Value::as_str);
        let mut results = Vec::new();
        for projection in projections {
            match projection.data {
                Ok(data) => {
                    for filter_id in &projection.filter_ids {
                        let invocation = Invocation {
                            data: &data,
                            selector: self.filters.selector(filter_id),
                            device_id,
                            filter_id,
                        };
                        let started = Instant::now();
                        let output = self
                            .handler
                            .handle(invocation)
                            .map_err(RuntimeError::Handler)?;
                        metrics::histogram!(HANDLER_TIME).record(started.elapsed().as_secs_f64());
                        results.extend(output.into_values());
                    }
                }
                Err(e) => {
                    error!(filters = ?projection.filter_ids, "{e}");
                    metrics::counter!(RESULT_ERRORS).increment(1);
                    let output = self
                        .handler
                        .on_result_error(&e, message)
                        .map_err(RuntimeError::Handler)?;
                    results.extend(output.into_values());
                }
            }
        }
        Ok(results)
    }
}

impl<H, I, O> OperatorRuntime<H, I, O>
where
    H: Handler + 'static,
    I: Inbound + 'static,
    O: Outbound + 'static,
{
    /// Runs the loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<RuntimeThread> {
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name("operator-runtime".into())
            .spawn(move || self.run())?;
        Ok(RuntimeThread { handle, thread })
    }
}

pub struct RuntimeThread {
    handle: RuntimeHandle,
    thread: JoinHandle<Result<(), RuntimeError>>,
}

impl RuntimeThread {
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    pub fn join(self, timeout: Duration) -> Result<Result<(), RuntimeError>, JoinError> {
        join_bounded("operator runtime", self.thread, timeout)
    }
}
