use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::{Config, OperatorConfig};
use crate::filter::{ExtractError, Selector};
use crate::join::JoinError;

/// Deployment context handed to the handler factory.
#[derive(Clone, Debug)]
pub struct OperatorContext {
    pub pipeline_id: String,
    pub operator_id: String,
    pub data_path: PathBuf,
    pub operator_config: OperatorConfig,
}

impl OperatorContext {
    pub fn new(config: &Config, operator_config: OperatorConfig) -> Self {
        Self {
            pipeline_id: config.pipeline_id.clone(),
            operator_id: config.operator_id.clone(),
            data_path: config.data_path(),
            operator_config,
        }
    }

    /// Handler specific settings from the `config` object of `CONFIG`.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.operator_config.typed_config()
    }
}

/// One matched filter for one inbound message.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub data: &'a Map<String, Value>,
    pub selector: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub filter_id: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    Nothing,
    One(Value),
    Many(Vec<Value>),
}

impl HandlerOutput {
    pub fn into_values(self) -> Vec<Value> {
        match self {
            HandlerOutput::Nothing => Vec::new(),
            HandlerOutput::One(value) => vec![value],
            HandlerOutput::Many(values) => values,
        }
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::One(value)
    }
}

impl From<Vec<Value>> for HandlerOutput {
    fn from(values: Vec<Value>) -> Self {
        HandlerOutput::Many(values)
    }
}

impl From<Option<Value>> for HandlerOutput {
    fn from(value: Option<Value>) -> Self {
        value.map_or(HandlerOutput::Nothing, HandlerOutput::One)
    }
}

/// A thread owned by the handler that must be stopped and joined on shutdown.
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str;

    fn stop(&self);

    fn join(&self, timeout: Duration) -> Result<(), JoinError>;
}

/// User code plugged into the runtime. Called from the runtime loop thread only.
///
/// An error returned from either method is fatal: the runtime stops and the
/// watchdog shuts the process down.
pub trait Handler: Send {
    /// Input shapes this handler distinguishes. Empty means every filter resolves to no selector.
    fn selectors(&self) -> Vec<Selector> {
        Vec::new()
    }

    /// Registered with the watchdog once the handler is built.
    fn background_tasks(&self) -> Vec<Arc<dyn BackgroundTask>> {
        Vec::new()
    }

    fn handle(&mut self, invocation: Invocation<'_>) -> anyhow::Result<HandlerOutput>;

    /// A mapped field could not be extracted from `message` for one group of filters.
    fn on_result_error(
        &mut self,
        _error: &ExtractError,
        _message: &Value,
    ) -> anyhow::Result<HandlerOutput> {
        Ok(HandlerOutput::Nothing)
    }
}
