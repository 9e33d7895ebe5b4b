use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wrapper around every result an operator publishes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub pipeline_id: String,
    pub operator_id: String,
    pub analytics: Value,
    pub time: String,
}

impl Envelope {
    pub fn new(pipeline_id: &str, operator_id: &str, analytics: Value, now: DateTime<Utc>) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            operator_id: operator_id.to_string(),
            analytics,
            time: format_time(now),
        }
    }
}

/// Naive UTC ISO-8601 with microseconds and a trailing `Z`. Fixed width, so envelopes from one
/// operator sort lexicographically by time.
pub fn format_time(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
