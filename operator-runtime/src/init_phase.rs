//! Warm-up window after the first start of a deployment.
//!
//! While the window is open, results are annotated so downstream consumers
//! know the operator has not seen enough data yet. The tracker is owned by
//! the runtime loop thread.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::persistence::{StateStore, StoreError, INIT_PHASE_RESET, INIT_PHASE_SENT, OPERATOR_START_TIME};
use crate::timestamps::timestamp_to_str;

pub const INIT_PHASE_FIELD: &str = "initial_phase";

#[derive(Error, Debug)]
pub enum InitPhaseError {
    #[error("operator start time has not been recorded")]
    MissingStartTime,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct InitPhaseTracker {
    store: StateStore,
    phase_duration: Duration,
    start_time: DateTime<Utc>,
    reset_done: bool,
    first_message_sent: bool,
}

impl InitPhaseTracker {
    /// Requires the start time written by [`crate::start_time::setup_operator_start_time`].
    pub fn new(store: StateStore, phase_duration: Duration) -> Result<Self, InitPhaseError> {
        let start_time = store
            .load(&OPERATOR_START_TIME)?
            .ok_or(InitPhaseError::MissingStartTime)?;
        let reset_done = store.load_or(&INIT_PHASE_RESET, false)?;
        let first_message_sent = store.load_or(&INIT_PHASE_SENT, false)?;
        Ok(Self {
            store,
            phase_duration,
            start_time,
            reset_done,
            first_message_sent,
        })
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn phase_end(&self) -> DateTime<Utc> {
        self.start_time + self.phase_duration
    }

    // Timestamps older than the start time count as in phase.
    pub fn operator_is_in_init_phase(&self, timestamp: DateTime<Utc>) -> bool {
        let active = timestamp - self.start_time < self.phase_duration && !self.reset_done;
        if active {
            debug!(%timestamp, start_time = %self.start_time, "still in initialisation phase");
        }
        active
    }

    /// Whole minutes left in the window at `timestamp`, never negative.
    pub fn remaining_minutes(&self, timestamp: DateTime<Utc>) -> i64 {
        let remaining = self.phase_duration - (timestamp - self.start_time);
        remaining.num_seconds().div_euclid(60).max(0)
    }

    pub fn generate_init_msg(&self, timestamp: DateTime<Utc>, mut value: Map<String, Value>) -> Map<String, Value> {
        let text = format!(
            "Die Anwendung befindet sich noch bis ca. {} in der Initialisierungsphase (noch {} Minuten)",
            timestamp_to_str(&self.phase_end()),
            self.remaining_minutes(timestamp)
        );
        value.insert(INIT_PHASE_FIELD.to_string(), Value::String(text));
        value
    }

    pub fn first_init_msg_needs_to_send(&self) -> bool {
        !self.reset_done && !self.first_message_sent
    }

    /// The caller produces the message, then calls [`Self::record_first_init_msg_sent`].
    pub fn generate_first_init_msg(&self, timestamp: DateTime<Utc>, value: Map<String, Value>) -> Map<String, Value> {
        self.generate_init_msg(timestamp, value)
    }

    pub fn record_first_init_msg_sent(&mut self) -> Result<(), InitPhaseError> {
        if !self.first_message_sent {
            self.store.save(&INIT_PHASE_SENT, &true)?;
            self.first_message_sent = true;
        }
        Ok(())
    }

    pub fn init_phase_needs_to_be_reset(&self) -> bool {
        !self.reset_done
    }

    /// Ends the window for good and clears the annotation on `value`.
    pub fn reset_init_phase(&mut self, mut value: Map<String, Value>) -> Result<Map<String, Value>, InitPhaseError> {
        if !self.reset_done {
            debug!("resetting init phase");
            self.store.save(&INIT_PHASE_RESET, &true)?;
            self.reset_done = true;
        }
        value.insert(INIT_PHASE_FIELD.to_string(), Value::String(String::new()));
        Ok(value)
    }
}
