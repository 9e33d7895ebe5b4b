use operator_runtime::filter::Selector;
use operator_runtime::{Handler, HandlerOutput, Invocation, OperatorContext};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

const SAMPLE_DATA_END: i64 = 5;

#[derive(Deserialize, Debug)]
#[serde(default)]
struct CustomConfig {
    myconfig: String,
}

impl Default for CustomConfig {
    fn default() -> Self {
        Self {
            myconfig: "default".to_string(),
        }
    }
}

/// Forwards the mapped `value` of every matching message unchanged.
struct Passthrough;

impl Passthrough {
    fn new(context: &OperatorContext) -> anyhow::Result<Self> {
        let config: CustomConfig = context.typed_config()?;
        info!(myconfig = %config.myconfig, "configured");
        Ok(Self)
    }
}

impl Handler for Passthrough {
    fn selectors(&self) -> Vec<Selector> {
        vec![Selector::new("selector1", &["value"])]
    }

    fn handle(&mut self, invocation: Invocation<'_>) -> anyhow::Result<HandlerOutput> {
        info!(selector = ?invocation.selector, data = ?invocation.data, "received");
        if invocation.data.get("value").and_then(Value::as_i64) == Some(SAMPLE_DATA_END) {
            info!("reached the end of the sample data, stop the operator with CTRL+C");
        }
        Ok(Value::Object(invocation.data.clone()).into())
    }
}

fn main() -> anyhow::Result<()> {
    operator_runtime::app::run("passthrough-operator", env!("CARGO_PKG_VERSION"), Passthrough::new)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use operator_runtime::config::{FilterType, InputTopic, Mapping};
    use operator_runtime::filter::FilterHandler;
    use operator_runtime::runtime::{OperatorRuntime, RuntimeSettings};
    use operator_runtime::test_utils::{MemoryInbound, MemoryOutbound};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sample_data_passes_through() {
        let topic = InputTopic {
            name: "topic".to_string(),
            filter_type: FilterType::DeviceId,
            filter_value: "test".to_string(),
            mappings: vec![Mapping {
                dest: "value".to_string(),
                source: "value.sensor".to_string(),
            }],
        };
        let handler = Passthrough;
        let filters = FilterHandler::from_input_topics(&[topic], "pipeline", &handler.selectors()).unwrap();

        let inbound = MemoryInbound::new();
        let outbound = MemoryOutbound::new();
        for value in 1..=SAMPLE_DATA_END {
            inbound.push_json(
                "topic",
                &json!({"device_id": "test", "service_id": "topic", "value": {"sensor": value}}),
            );
        }
        let runtime = OperatorRuntime::new(
            handler,
            filters,
            inbound.clone(),
            outbound.clone(),
            RuntimeSettings {
                output_topic: "output".to_string(),
                pipeline_id: "pipeline".to_string(),
                operator_id: "operator".to_string(),
                poll_timeout: Duration::from_millis(10),
                flush_timeout: Duration::from_secs(1),
            },
        );
        inbound.stop_when_drained(runtime.handle());
        runtime.run().unwrap();

        let values: Vec<Value> = outbound
            .produced()
            .iter()
            .map(|record| record.json()["analytics"].clone())
            .collect();
        assert_eq!(
            values,
            (1..=SAMPLE_DATA_END).map(|v| json!({"value": v})).collect::<Vec<_>>()
        );
    }
}
