//! Process watchdog: liveness polling, OS signal trapping and coordinated
//! shutdown. The monitor runs on a dedicated OS thread with an isolated tokio
//! runtime, so it stays responsive while the components it watches block
//! their own threads.

mod error;
mod metrics;
mod probes;
mod signals;
mod watchdog;

pub use error::LifecycleError;
pub use probes::{LivenessHandler, LivenessStatus, ReadinessHandler};
pub use signals::ShutdownSignal;
pub use watchdog::{HookError, ShutdownReason, Watchdog, WatchdogBuilder, WatchdogGuard};
