use std::time::Duration;

const SHUTDOWNS_INITIATED: &str = "watchdog_shutdowns_initiated_total";
const SHUTDOWNS_COMPLETED: &str = "watchdog_shutdowns_completed_total";
const HOOK_DURATION: &str = "watchdog_hook_duration_seconds";
const HOOK_FAILURES: &str = "watchdog_hook_failures_total";

/// Shutdown telemetry of one watchdog, labelled with its service name.
pub(crate) struct ShutdownMetrics {
    service: String,
}

impl ShutdownMetrics {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    pub fn initiated(&self, trigger: &str, reason: &str) {
        metrics::counter!(
            SHUTDOWNS_INITIATED,
            "service" => self.service.clone(),
            "trigger" => trigger.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn completed(&self, clean: bool) {
        metrics::counter!(SHUTDOWNS_COMPLETED, "service" => self.service.clone(), "clean" => clean.to_string())
            .increment(1);
    }

    pub fn hook_finished(&self, phase: &'static str, component: &str, elapsed: Duration, ok: bool) {
        metrics::histogram!(
            HOOK_DURATION,
            "service" => self.service.clone(),
            "phase" => phase,
            "component" => component.to_string()
        )
        .record(elapsed.as_secs_f64());
        if !ok {
            metrics::counter!(
                HOOK_FAILURES,
                "service" => self.service.clone(),
                "phase" => phase,
                "component" => component.to_string()
            )
            .increment(1);
        }
    }
}
