use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lifecycle::{LifecycleError, ShutdownReason, Watchdog};

/// Fast polling, no signal handlers: tests must not race each other on process signals.
fn test_watchdog() -> Watchdog {
    Watchdog::builder("test")
        .with_signals(&[])
        .with_check_interval(Duration::from_millis(10))
        .build()
}

/// Records hook invocations so tests can assert the shutdown order.
#[derive(Clone, Default)]
struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
    fn hook(&self, name: &str) -> impl FnOnce() -> Result<(), lifecycle::HookError> + Send {
        let log = self.0.clone();
        let name = name.to_string();
        move || {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[test]
fn dead_component_runs_hooks_and_reports_error() {
    let alive = Arc::new(AtomicBool::new(true));
    let log = HookLog::default();

    let mut watchdog = test_watchdog();
    let flag = alive.clone();
    watchdog.register_monitor("runtime", move || flag.load(Ordering::SeqCst));
    watchdog.register_shutdown("runtime", log.hook("stop runtime"));
    watchdog.register_shutdown("poller", log.hook("stop poller"));
    watchdog.register_join("runtime", log.hook("join runtime"));
    watchdog.register_join("producer", log.hook("flush producer"));

    let guard = watchdog.start(Duration::ZERO).unwrap();
    alive.store(false, Ordering::SeqCst);

    let err = guard.join().unwrap_err();
    assert!(matches!(err, LifecycleError::ComponentDied { ref tag } if tag == "runtime"));
    assert_eq!(
        log.entries(),
        vec!["stop runtime", "stop poller", "join runtime", "flush producer"]
    );
}

#[test]
fn liveness_checks_wait_for_start_delay() {
    let mut watchdog = test_watchdog();
    watchdog.register_monitor("runtime", || false);

    let started = Instant::now();
    let guard = watchdog.start(Duration::from_millis(300)).unwrap();
    assert!(guard.join().is_err());
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[test]
fn requested_shutdown_is_clean() {
    let log = HookLog::default();
    let mut watchdog = test_watchdog();
    watchdog.register_monitor("runtime", || true);
    watchdog.register_shutdown("runtime", log.hook("stop"));
    let token = watchdog.shutdown_token();

    let guard = watchdog.start(Duration::ZERO).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(!guard.is_finished());

    token.cancel();
    assert_eq!(guard.join().unwrap(), ShutdownReason::Requested);
    assert_eq!(log.entries(), vec!["stop"]);
}

#[test]
fn failing_hook_does_not_skip_the_rest() {
    let log = HookLog::default();
    let mut watchdog = test_watchdog();
    watchdog.register_shutdown("broken", || Err("cannot stop".into()));
    watchdog.register_join("consumer", log.hook("close consumer"));
    let token = watchdog.shutdown_token();

    let guard = watchdog.start(Duration::ZERO).unwrap();
    token.cancel();
    assert_eq!(guard.join().unwrap(), ShutdownReason::Requested);
    assert_eq!(log.entries(), vec!["close consumer"]);
}

#[test]
fn prestop_file_triggers_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shutdown");

    let watchdog = Watchdog::builder("test")
        .with_signals(&[])
        .with_prestop_file(&path)
        .build();
    let guard = watchdog.start(Duration::ZERO).unwrap();

    std::fs::write(&path, b"").unwrap();
    assert_eq!(guard.join().unwrap(), ShutdownReason::Prestop);
}

#[test]
fn readiness_follows_watchdog_lifetime() {
    let watchdog = test_watchdog();
    let readiness = watchdog.readiness_handler();
    let token = watchdog.shutdown_token();
    assert_eq!(readiness.check(), StatusCode::SERVICE_UNAVAILABLE);

    let guard = watchdog.start(Duration::ZERO).unwrap();
    assert!(readiness.is_ready());
    assert_eq!(readiness.check(), StatusCode::OK);

    token.cancel();
    guard.join().unwrap();
    assert_eq!(readiness.check(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn liveness_reports_per_component_status() {
    let alive = Arc::new(AtomicBool::new(true));
    let mut watchdog = test_watchdog();
    let flag = alive.clone();
    watchdog.register_monitor("runtime", move || flag.load(Ordering::SeqCst));
    watchdog.register_monitor("poller", || true);

    let liveness = watchdog.liveness_handler();
    let status = liveness.check();
    assert!(status.healthy);
    assert_eq!(status.components.len(), 2);

    alive.store(false, Ordering::SeqCst);
    let status = liveness.check();
    assert!(!status.healthy);
    assert_eq!(status.components.get("runtime"), Some(&false));
    assert_eq!(status.components.get("poller"), Some(&true));
    assert_eq!(
        status.into_response().status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
