//! K8s probe handlers backed by the watchdog's own state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;

pub(crate) type AliveFn = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Monitor {
    pub tag: String,
    pub is_alive: AliveFn,
}

/// Ready between [`Watchdog::start`](crate::Watchdog::start) and the beginning of shutdown.
#[derive(Clone)]
pub struct ReadinessHandler {
    started: Arc<AtomicBool>,
    shutdown_token: CancellationToken,
}

impl ReadinessHandler {
    pub(crate) fn new(started: Arc<AtomicBool>, shutdown_token: CancellationToken) -> Self {
        Self {
            started,
            shutdown_token,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown_token.is_cancelled()
    }

    pub fn check(&self) -> StatusCode {
        match self.is_ready() {
            true => StatusCode::OK,
            false => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Evaluates the same predicates the watchdog polls, on every request.
#[derive(Clone)]
pub struct LivenessHandler {
    monitors: Arc<Vec<Monitor>>,
}

impl LivenessHandler {
    pub(crate) fn new(monitors: Vec<Monitor>) -> Self {
        Self {
            monitors: Arc::new(monitors),
        }
    }

    pub fn check(&self) -> LivenessStatus {
        let components: HashMap<String, bool> = self
            .monitors
            .iter()
            .map(|m| (m.tag.clone(), (m.is_alive)()))
            .collect();
        LivenessStatus {
            healthy: components.values().all(|alive| *alive),
            components,
        }
    }
}

#[derive(Debug)]
pub struct LivenessStatus {
    pub healthy: bool,
    pub components: HashMap<String, bool>,
}

impl IntoResponse for LivenessStatus {
    fn into_response(self) -> Response {
        let mut dead: Vec<&str> = self
            .components
            .iter()
            .filter(|(_, alive)| !**alive)
            .map(|(tag, _)| tag.as_str())
            .collect();
        dead.sort_unstable();
        match self.healthy {
            true => (StatusCode::OK, "alive".to_string()),
            false => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("dead: {}", dead.join(", ")),
            ),
        }
        .into_response()
    }
}
