//! Watchdog: liveness polling, signal trapping and ordered shutdown of registered components.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::metrics::ShutdownMetrics;
use crate::probes::{LivenessHandler, Monitor, ReadinessHandler};
use crate::signals::ShutdownSignal;

pub type HookError = Box<dyn std::error::Error + Send + Sync>;
type Hook = Box<dyn FnOnce() -> Result<(), HookError> + Send>;

/// Why the watchdog initiated a clean shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(ShutdownSignal),
    Requested,
    Prestop,
}

enum Trigger {
    Shutdown(ShutdownReason),
    Died(String),
}

pub struct WatchdogBuilder {
    name: String,
    signals: Vec<ShutdownSignal>,
    check_interval: Duration,
    prestop_file: Option<PathBuf>,
}

impl WatchdogBuilder {
    /// Signals that trigger a shutdown. Defaults to SIGTERM, SIGINT and SIGABRT.
    pub fn with_signals(mut self, signals: &[ShutdownSignal]) -> Self {
        self.signals = signals.to_vec();
        self
    }

    /// How often liveness predicates are polled once the start delay elapsed.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// K8s pre-stop hook: shutdown begins once this file exists.
    pub fn with_prestop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prestop_file = Some(path.into());
        self
    }

    pub fn build(self) -> Watchdog {
        Watchdog {
            name: self.name,
            signals: self.signals,
            check_interval: self.check_interval,
            prestop_file: self.prestop_file,
            started: Arc::new(AtomicBool::new(false)),
            shutdown_token: CancellationToken::new(),
            monitors: Vec::new(),
            shutdown_hooks: Vec::new(),
            join_hooks: Vec::new(),
        }
    }
}

/// Watches registered components from a dedicated OS thread.
///
/// Shutdown runs every stop hook in registration order, then every join hook
/// in registration order. Hooks are expected to bound their own blocking time.
pub struct Watchdog {
    name: String,
    signals: Vec<ShutdownSignal>,
    check_interval: Duration,
    prestop_file: Option<PathBuf>,
    started: Arc<AtomicBool>,
    shutdown_token: CancellationToken,
    monitors: Vec<Monitor>,
    shutdown_hooks: Vec<(String, Hook)>,
    join_hooks: Vec<(String, Hook)>,
}

impl Watchdog {
    pub fn builder(name: &str) -> WatchdogBuilder {
        WatchdogBuilder {
            name: name.to_string(),
            signals: vec![
                ShutdownSignal::Terminate,
                ShutdownSignal::Interrupt,
                ShutdownSignal::Abort,
            ],
            check_interval: Duration::from_secs(1),
            prestop_file: None,
        }
    }

    /// A component whose predicate returns false is considered dead and triggers shutdown.
    pub fn register_monitor<F>(&mut self, tag: &str, is_alive: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        debug!(component = tag, "Watchdog: monitor registered");
        self.monitors.push(Monitor {
            tag: tag.to_string(),
            is_alive: Arc::new(is_alive),
        });
    }

    /// Called first on shutdown: ask the component to stop, without waiting for it.
    pub fn register_shutdown<F>(&mut self, tag: &str, stop: F)
    where
        F: FnOnce() -> Result<(), HookError> + Send + 'static,
    {
        self.shutdown_hooks.push((tag.to_string(), Box::new(stop)));
    }

    /// Called after every stop hook ran: wait for the component and release its resources.
    pub fn register_join<F>(&mut self, tag: &str, join: F)
    where
        F: FnOnce() -> Result<(), HookError> + Send + 'static,
    {
        self.join_hooks.push((tag.to_string(), Box::new(join)));
    }

    pub fn readiness_handler(&self) -> ReadinessHandler {
        ReadinessHandler::new(self.started.clone(), self.shutdown_token.clone())
    }

    pub fn liveness_handler(&self) -> LivenessHandler {
        LivenessHandler::new(self.monitors.clone())
    }

    /// Cancelling this token requests a clean shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Future that resolves when shutdown begins; pass to `axum::serve(..).with_graceful_shutdown(..)`.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let token = self.shutdown_token.clone();
        async move {
            token.cancelled().await;
        }
    }

    /// Installs the signal handlers and starts watching. Liveness checks begin after `delay`;
    /// signals are honoured immediately.
    pub fn start(self, delay: Duration) -> Result<WatchdogGuard, LifecycleError> {
        let started = self.started.clone();
        let handle = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || self.run(delay))
            .map_err(LifecycleError::Spawn)?;
        started.store(true, Ordering::SeqCst);
        Ok(WatchdogGuard { handle })
    }

    fn run(mut self, delay: Duration) -> Result<ShutdownReason, LifecycleError> {
        let _span = tracing::info_span!("watchdog", app = %self.name).entered();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(LifecycleError::Spawn)?;
        let trigger = rt.block_on(self.wait_for_trigger(delay))?;
        self.shutdown_token.cancel();
        let metrics = ShutdownMetrics::new(&self.name);

        let (trigger_component, trigger_reason) = match &trigger {
            Trigger::Shutdown(ShutdownReason::Signal(signal)) => ("system", signal.name()),
            Trigger::Shutdown(ShutdownReason::Requested) => ("system", "requested"),
            Trigger::Shutdown(ShutdownReason::Prestop) => ("system", "prestop"),
            Trigger::Died(tag) => (tag.as_str(), "died"),
        };
        metrics.initiated(trigger_component, trigger_reason);
        match &trigger {
            Trigger::Died(_) => warn!(
                trigger_component,
                trigger_reason, "Watchdog: shutdown initiated, component died unexpectedly"
            ),
            Trigger::Shutdown(_) => info!(
                trigger_component,
                trigger_reason, "Watchdog: shutdown initiated"
            ),
        }

        let shutdown_clock = Instant::now();
        let shutdown_hooks = std::mem::take(&mut self.shutdown_hooks);
        let join_hooks = std::mem::take(&mut self.join_hooks);
        let mut clean = true;
        for (phase, hooks) in [("stop", shutdown_hooks), ("join", join_hooks)] {
            for (tag, hook) in hooks {
                clean &= run_hook(&metrics, phase, &tag, hook);
            }
        }

        let clean = clean && matches!(trigger, Trigger::Shutdown(_));
        metrics.completed(clean);
        info!(
            clean,
            total_duration_secs = shutdown_clock.elapsed().as_secs_f64(),
            "Watchdog: shutdown complete"
        );

        match trigger {
            Trigger::Shutdown(reason) => Ok(reason),
            Trigger::Died(tag) => Err(LifecycleError::ComponentDied { tag }),
        }
    }

    async fn wait_for_trigger(&self, delay: Duration) -> Result<Trigger, LifecycleError> {
        let (signal_tx, mut signal_rx) = mpsc::channel(self.signals.len().max(1));
        for signal in &self.signals {
            let mut stream = signal.install()?;
            let tx = signal_tx.clone();
            let signal = *signal;
            tokio::spawn(async move {
                if stream.recv().await.is_some() {
                    drop(tx.send(signal).await);
                }
            });
        }
        drop(signal_tx);

        tokio::select! {
            biased;

            Some(signal) = signal_rx.recv() => {
                info!(signal = signal.name(), "Watchdog: received signal");
                Ok(Trigger::Shutdown(ShutdownReason::Signal(signal)))
            }
            _ = self.shutdown_token.cancelled() => Ok(Trigger::Shutdown(ShutdownReason::Requested)),
            _ = wait_for_prestop(self.prestop_file.clone()) => {
                Ok(Trigger::Shutdown(ShutdownReason::Prestop))
            }
            tag = self.wait_for_death(delay) => Ok(Trigger::Died(tag)),
        }
    }

    async fn wait_for_death(&self, delay: Duration) -> String {
        tokio::time::sleep(delay).await;
        let mut interval = tokio::time::interval(self.check_interval);
        loop {
            interval.tick().await;
            if let Some(dead) = self.monitors.iter().find(|m| !(m.is_alive)()) {
                return dead.tag.clone();
            }
        }
    }
}

fn run_hook(metrics: &ShutdownMetrics, phase: &'static str, tag: &str, hook: Hook) -> bool {
    let started = Instant::now();
    let result = hook();
    let elapsed = started.elapsed();
    metrics.hook_finished(phase, tag, elapsed, result.is_ok());
    match result {
        Ok(()) => {
            debug!(
                component = tag,
                phase,
                duration_secs = elapsed.as_secs_f64(),
                "Watchdog: hook finished"
            );
            true
        }
        Err(e) => {
            error!(component = tag, phase, "Watchdog: hook failed: {e}");
            false
        }
    }
}

async fn wait_for_prestop(path: Option<PathBuf>) {
    let Some(path) = path else {
        return std::future::pending().await;
    };
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if path.exists() {
            info!(path = %path.display(), "Watchdog: prestop file detected");
            return;
        }
    }
}

/// Returned by [`Watchdog::start`]; the main thread blocks on [`WatchdogGuard::join`].
pub struct WatchdogGuard {
    handle: JoinHandle<Result<ShutdownReason, LifecycleError>>,
}

impl WatchdogGuard {
    /// Blocks until shutdown completed. A dead component is reported as an error
    /// after every hook ran.
    pub fn join(self) -> Result<ShutdownReason, LifecycleError> {
        self.handle
            .join()
            .map_err(|_| LifecycleError::MonitorPanicked)?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
