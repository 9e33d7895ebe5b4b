//! Lifecycle error types returned by the watchdog.

use thiserror::Error;

/// Errors returned by [`WatchdogGuard::join`](crate::WatchdogGuard::join).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A monitored component reported itself as no longer alive.
    #[error("component '{tag}' died unexpectedly")]
    ComponentDied { tag: String },

    /// Installing an OS signal handler failed.
    #[error("failed to install handler for {signal}: {source}")]
    SignalHandler {
        signal: &'static str,
        source: std::io::Error,
    },

    /// The dedicated watchdog thread could not be started.
    #[error("failed to start watchdog thread: {0}")]
    Spawn(std::io::Error),

    /// The dedicated watchdog thread panicked.
    #[error("watchdog thread panicked")]
    MonitorPanicked,
}
